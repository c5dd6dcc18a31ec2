use std::time::Duration;

use drover_core::default_identity;
use drover_model::Layout;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub layout: Layout,
    /// Value written under the leader key while this master leads.
    pub identity: String,
    pub leader_ttl: Duration,
    /// Pause between election attempts, including after a term ended by a
    /// broken forwarder watch.
    pub leader_backoff: Duration,
    /// Lifetime of a kill marker.
    pub kill_ttl: Duration,
    /// Time the campaign gets to step down after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            identity: default_identity().to_string(),
            leader_ttl: Duration::from_secs(5),
            leader_backoff: Duration::from_secs(1),
            kill_ttl: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
