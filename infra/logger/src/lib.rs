//! # Notice Logger
//!
//! Installs the process-wide `tracing` subscriber for notice services: a compact
//! console layer and optional rolling files written by a non-blocking worker.
//!
//! The level set in code or configuration is only a default; `RUST_LOG` overrides it.
//!
//! ## Example
//!
//! ```rust
//! use notice_logger::{LevelFilter, Logger};
//!
//! let _logger = Logger::builder()
//!     .name("notice")
//!     .level(LevelFilter::DEBUG)
//!     .init()
//!     .unwrap();
//! ```

mod builder;
mod config;
mod error;

pub use crate::builder::{ConsoleOnly, LoggerBuilder, Named, Unnamed, WithFiles};
pub use crate::config::{LoggingConfig, RotationKind};
pub use crate::error::{LoggerError, LoggerErrorExt};
pub use tracing::level_filters::LevelFilter;
pub use tracing_appender::rolling::Rotation;

use tracing_appender::non_blocking::WorkerGuard;

/// Handle to the installed subscriber.
///
/// Dropping it flushes and stops the rolling file worker, so hold it until shutdown.
#[must_use = "Dropping this handle stops the file writer"]
#[derive(Debug)]
pub struct Logger {
    guard: Option<WorkerGuard>,
}

impl Logger {
    const fn new(guard: Option<WorkerGuard>) -> Self {
        Self { guard }
    }

    /// Starts configuring the global subscriber.
    #[must_use = "The builder must be initialized with .init()"]
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// Installs the global subscriber described by a [`LoggingConfig`].
    ///
    /// # Errors
    /// [`LoggerError::InvalidConfiguration`] for an unknown level, otherwise the same
    /// errors as [`LoggerBuilder::init`].
    pub fn from_config(config: &LoggingConfig) -> Result<Self, LoggerError> {
        let level = config.level.parse::<LevelFilter>().map_err(|e| LoggerError::InvalidConfiguration {
            message: format!("unknown level '{}': {e}", config.level).into(),
            context: Some(config.name.clone().into()),
        })?;

        let mut builder = Self::builder().name(config.name.as_str()).level(level).console(config.console);
        if let Some(filter) = &config.filter {
            builder = builder.env_filter(filter.as_str());
        }

        match &config.directory {
            Some(directory) => builder
                .path(directory)
                .rotation(config.rotation.into())
                .max_files(config.max_files)
                .json(config.json)
                .init(),
            None => builder.init(),
        }
    }

    /// Whether a rolling file writer is attached.
    #[must_use]
    pub const fn writes_files(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::info!("logger shutting down, flushing log files");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_unknown_level_is_rejected() {
        let config = LoggingConfig { level: "chatty".to_owned(), ..LoggingConfig::default() };

        let err = Logger::from_config(&config).unwrap_err();

        assert!(matches!(err, LoggerError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("chatty"));
    }

    #[test]
    #[serial]
    fn test_disabled_outputs_are_rejected() {
        let config = LoggingConfig { console: false, ..LoggingConfig::default() };
        assert!(matches!(Logger::from_config(&config), Err(LoggerError::InvalidConfiguration { .. })));
    }
}
