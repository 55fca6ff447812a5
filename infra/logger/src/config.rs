use crate::Rotation;
use serde::Deserialize;
use std::path::PathBuf;

/// Logging section of an application configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub name: String,
    /// `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub level: String,
    pub console: bool,
    pub json: bool,
    /// Rolling files are only written when set.
    pub directory: Option<PathBuf>,
    pub rotation: RotationKind,
    pub max_files: usize,
    /// Directive-style filter, e.g. `notice_bus=debug`.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            name: "notice".to_owned(),
            level: "info".to_owned(),
            console: true,
            json: false,
            directory: None,
            rotation: RotationKind::default(),
            max_files: crate::builder::DEFAULT_MAX_FILES,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationKind {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<RotationKind> for Rotation {
    fn from(kind: RotationKind) -> Self {
        match kind {
            RotationKind::Minutely => Self::MINUTELY,
            RotationKind::Hourly => Self::HOURLY,
            RotationKind::Daily => Self::DAILY,
            RotationKind::Never => Self::NEVER,
        }
    }
}
