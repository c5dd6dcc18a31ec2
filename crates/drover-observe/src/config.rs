use std::io::IsTerminal;

use crate::{LoggerError, LoggerFormat};

/// Filter directive variable, e.g. `info,drover.sched=debug`.
pub const LEVEL_ENV: &str = "DROVER_LOG";
/// Output format variable: `text`, `json` or `journald`.
pub const FORMAT_ENV: &str = "DROVER_LOG_FORMAT";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directives.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
        }
    }
}

impl LoggerConfig {
    /// Defaults overridden by [`LEVEL_ENV`] and [`FORMAT_ENV`] when set.
    pub fn from_env() -> Result<Self, LoggerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggerError> {
        let mut cfg = Self::default();
        if let Some(level) = lookup(LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            cfg.level = level;
        }
        if let Some(format) = lookup(FORMAT_ENV) {
            cfg.format = format.parse()?;
        }
        Ok(cfg)
    }
}
