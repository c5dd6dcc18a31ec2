//! Master-side operations.
//!
//! [`TaskRegistry`] is what an API layer calls to manage tasks, wait on
//! their outcome and page through their execution log. [`WorkerDirectory`]
//! lists live workers. [`MasterNode`] campaigns for leadership under a
//! supervisor and, while it leads, runs the [`AlertForwarder`] that
//! surfaces task warnings exactly once per fleet.

mod error;
pub use error::ControlError;

mod config;
pub use config::MasterConfig;

mod registry;
pub use registry::{TaskOutcome, TaskRegistry};

mod directory;
pub use directory::WorkerDirectory;

mod forward;
pub use forward::{AlertForwarder, Warnings};

mod node;
pub use node::MasterNode;
