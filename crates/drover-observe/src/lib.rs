//! Process-wide tracing setup for drover binaries.
//!
//! With the `subscriber` feature, [`Journal`] turns supervisor events into
//! tracing records.
//!
//! ```no_run
//! use drover_observe::{LoggerConfig, logger_init};
//!
//! let cfg = LoggerConfig::from_env().unwrap_or_default();
//! logger_init(&cfg).expect("logger");
//! ```

mod config;
mod error;
mod format;
mod init;

pub use config::{FORMAT_ENV, LEVEL_ENV, LoggerConfig};
pub use error::LoggerError;
pub use format::LoggerFormat;
pub use init::logger_init;

#[cfg(feature = "subscriber")]
mod subscriber;
#[cfg(feature = "subscriber")]
pub use subscriber::{Journal, describe};
