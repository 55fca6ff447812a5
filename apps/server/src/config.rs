use config::{Config, Environment, File};
use notice_bus::EventBusConfig;
use notice_logger::LoggingConfig;
use serde::Deserialize;
use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Default configuration file, looked up as `server.toml` in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "server";
/// Prefix of environment overrides, e.g. `NOTICE__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "NOTICE";

#[notice_derive::notice_error]
pub enum ConfigError {
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub bus: EventBusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 8080 }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true)
}

/// Loads the application configuration.
///
/// Settings come from the TOML file at `path` and are then overridden by `NOTICE__`
/// environment variables, `__` separating nested keys. Without an explicit path the
/// default `server` file is optional and missing sections fall back to defaults.
///
/// # Errors
/// Returns [`ConfigError::Config`] if an explicit file is missing or any value does
/// not fit [`AppConfig`].
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_with(path, environment())
}

fn load_with(path: Option<&Path>, env: Environment) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use notice_bus::{DispatchStrategy, ExecutorKind};
    use std::fs;
    use tempfile::tempdir;

    fn no_env() -> Environment {
        environment().source(Some(config::Map::new()))
    }

    #[test]
    fn test_file_sections_are_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(
            &path,
            "[server]\nport = 9000\n\n[bus]\nidentifier = \"orders\"\ndispatch = \"immediate\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = load_with(Some(&path), no_env()).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.bus.identifier, "orders");
        assert_eq!(config.bus.dispatch, DispatchStrategy::Immediate);
        assert_eq!(config.bus.executor, ExecutorKind::Direct);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "[server]\nport = 9000\n").unwrap();

        let mut vars = config::Map::new();
        vars.insert("NOTICE__SERVER__PORT".to_owned(), "9100".to_owned());
        vars.insert("NOTICE__BUS__EXECUTOR".to_owned(), "tokio".to_owned());
        let config = load_with(Some(&path), environment().source(Some(vars))).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.bus.executor, ExecutorKind::Tokio);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempdir().unwrap();
        let err = load_with(Some(&dir.path().join("absent.toml")), no_env()).unwrap_err();
        assert!(err.to_string().contains("failed to read configuration"));
    }

    #[test]
    fn test_bad_value_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "[bus]\ndispatch = \"sideways\"\n").unwrap();

        assert!(load_with(Some(&path), no_env()).is_err());
    }
}
