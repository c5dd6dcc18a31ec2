//! Child-process workloads for drover workers.
//!
//! [`ProcWorkload`] runs one external program per task, appending the task
//! name as the last argument, and ties the child's lifetime to the
//! execution's cancellation token.

#[cfg(feature = "proc")]
mod proc;
#[cfg(feature = "proc")]
pub use proc::{ProcConfig, ProcWorkload};

mod util;
pub use util::kill_graceful;
