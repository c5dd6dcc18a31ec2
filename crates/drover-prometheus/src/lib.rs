//! Prometheus metrics backend for drover workers.
//!
//! [`PrometheusMetrics`] implements [`drover_core::MetricsBackend`] on a
//! private registry.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use drover_core::MetricsHandle;
//! use drover_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let handle: MetricsHandle = Arc::new(metrics.clone());
//! // hand `handle` to WorkerNode::with_metrics, then scrape:
//! let body = metrics.encode_text()?;
//! # let _ = (handle, body);
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `drover_tasks_started_total{task_type}` - Counter
//! - `drover_tasks_completed_total{task_type, outcome}` - Counter
//! - `drover_task_duration_seconds{task_type}` - Histogram
//! - `drover_lock_conflicts_total{task_type}` - Counter
//! - `drover_events_dropped_total{kind}` - Counter
//!
//! No `/metrics` endpoint is served here; expose [`PrometheusMetrics::gather`]
//! through whatever HTTP stack the binary already has.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
