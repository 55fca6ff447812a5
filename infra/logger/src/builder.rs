use crate::error::{LoggerError, LoggerErrorExt};
use crate::{LevelFilter, Logger, Rotation};
use private::Sealed;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub(crate) const DEFAULT_MAX_FILES: usize = 10;
const LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) console: bool,
    pub(crate) path: Option<PathBuf>,
    pub(crate) level: LevelFilter,
    pub(crate) rotation: Rotation,
    pub(crate) max_files: usize,
    pub(crate) json: bool,
    pub(crate) env_filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            console: true,
            path: None,
            level: LevelFilter::INFO,
            rotation: Rotation::DAILY,
            max_files: DEFAULT_MAX_FILES,
            json: false,
            env_filter: None,
        }
    }
}

/// Builder state: no service name yet.
#[derive(Debug)]
pub struct Unnamed;
/// Builder state: service name set.
#[derive(Debug)]
pub struct Named(String);
/// Builder state: console only.
#[derive(Debug)]
pub struct ConsoleOnly;
/// Builder state: writes rolling files too.
#[derive(Debug)]
pub struct WithFiles;

mod private {
    pub trait Sealed {}
}
impl Sealed for Unnamed {}
impl Sealed for Named {}
impl Sealed for ConsoleOnly {}
impl Sealed for WithFiles {}

/// Configures the global tracing subscriber.
///
/// The service name is mandatory and file-only options are only reachable after
/// [`LoggerBuilder::path`], both enforced by the type parameters.
#[derive(Debug)]
pub struct LoggerBuilder<N: Sealed = Unnamed, F: Sealed = ConsoleOnly> {
    pub(crate) settings: Settings,
    name: N,
    files: PhantomData<F>,
}

impl LoggerBuilder {
    pub(crate) fn new() -> Self {
        Self { settings: Settings::default(), name: Unnamed, files: PhantomData }
    }
}

impl<F: Sealed> LoggerBuilder<Unnamed, F> {
    /// Names the service; also the prefix of rolling log files.
    pub fn name(self, name: impl Into<String>) -> LoggerBuilder<Named, F> {
        LoggerBuilder { settings: self.settings, name: Named(name.into()), files: PhantomData }
    }
}

impl LoggerBuilder<Named, WithFiles> {
    /// Number of rotated files to keep.
    #[must_use = "The builder must be initialized with .init()"]
    pub const fn max_files(mut self, max: usize) -> Self {
        self.settings.max_files = max;
        self
    }

    #[must_use = "The builder must be initialized with .init()"]
    pub const fn rotation(mut self, rotation: Rotation) -> Self {
        self.settings.rotation = rotation;
        self
    }

    /// Writes files as JSON lines.
    #[must_use = "The builder must be initialized with .init()"]
    pub const fn json(mut self, enabled: bool) -> Self {
        self.settings.json = enabled;
        self
    }
}

impl<F: Sealed> LoggerBuilder<Named, F> {
    #[must_use = "The builder must be initialized with .init()"]
    pub const fn level(mut self, level: LevelFilter) -> Self {
        self.settings.level = level;
        self
    }

    /// Directive-style default filter, e.g. `notice_bus=debug,tower_http=info`.
    ///
    /// `RUST_LOG` still wins when set. An unparsable filter fails [`LoggerBuilder::init`].
    #[must_use = "The builder must be initialized with .init()"]
    pub fn env_filter(mut self, filter: impl Into<String>) -> Self {
        self.settings.env_filter = Some(filter.into());
        self
    }

    #[must_use = "The builder must be initialized with .init()"]
    pub const fn console(mut self, enabled: bool) -> Self {
        self.settings.console = enabled;
        self
    }

    /// Also writes rolling log files into `path`.
    pub fn path(self, path: impl Into<PathBuf>) -> LoggerBuilder<Named, WithFiles> {
        let mut settings = self.settings;
        settings.path = Some(path.into());
        LoggerBuilder { settings, name: self.name, files: PhantomData }
    }

    /// Installs the global subscriber.
    ///
    /// Keep the returned [`Logger`] alive until shutdown: it owns the file writer's
    /// background worker.
    ///
    /// # Errors
    /// * [`LoggerError::InvalidConfiguration`] for a blank name, zero `max_files`, a bad
    ///   filter, or when neither console nor file output is enabled.
    /// * [`LoggerError::Io`] or [`LoggerError::Appender`] if the log directory cannot be used.
    /// * [`LoggerError::Subscriber`] if a global subscriber is already installed.
    pub fn init(self) -> Result<Logger, LoggerError> {
        let Self { settings, name: Named(name), .. } = self;
        validate(&settings, &name)?;
        let filter = env_filter(&settings)?;

        let mut layers = Vec::new();
        if settings.console {
            layers.push(layer().compact().with_ansi(true).boxed());
        }

        let guard = match settings.path {
            Some(path) => {
                fs::create_dir_all(&path).context(format!("cannot create {}", path.display()))?;
                let appender = RollingFileAppender::builder()
                    .rotation(settings.rotation)
                    .filename_prefix(&name)
                    .filename_suffix(LOG_FILE_SUFFIX)
                    .max_log_files(settings.max_files)
                    .build(&path)
                    .context(format!("cannot write to {}", path.display()))?;
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let file = layer().with_writer(writer).with_ansi(false);
                layers.push(if settings.json { file.json().boxed() } else { file.boxed() });
                Some(guard)
            },
            None => None,
        };

        if layers.is_empty() {
            return Err(LoggerError::InvalidConfiguration {
                message: "no output enabled; enable the console or set a log path".into(),
                context: Some(name.into()),
            });
        }

        tracing_subscriber::registry().with(filter).with(layers).try_init()?;
        Ok(Logger::new(guard))
    }
}

fn validate(settings: &Settings, name: &str) -> Result<(), LoggerError> {
    if name.trim().is_empty() {
        return Err(LoggerError::InvalidConfiguration {
            message: "logger name must not be blank".into(),
            context: None,
        });
    }
    if settings.max_files == 0 {
        return Err(LoggerError::InvalidConfiguration {
            message: "max_files must be greater than zero".into(),
            context: Some(name.to_owned().into()),
        });
    }
    Ok(())
}

fn env_filter(settings: &Settings) -> Result<EnvFilter, LoggerError> {
    let builder = EnvFilter::builder().with_default_directive(settings.level.into());
    let from_env = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some_and(|value| !value.is_empty());
    match &settings.env_filter {
        Some(directives) if !from_env => builder.parse(directives).map_err(|e| {
            LoggerError::InvalidConfiguration {
                message: format!("invalid filter '{directives}': {e}").into(),
                context: None,
            }
        }),
        _ => Ok(builder.from_env_lossy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let builder = Logger::builder().name("notice").env_filter("notice_bus=debug");

        assert!(builder.settings.console);
        assert_eq!(builder.settings.level, LevelFilter::INFO);
        assert_eq!(builder.settings.max_files, DEFAULT_MAX_FILES);
        assert_eq!(builder.settings.env_filter.as_deref(), Some("notice_bus=debug"));
        assert!(builder.settings.path.is_none());
    }

    #[test]
    fn test_file_options_follow_path() {
        let builder = Logger::builder()
            .name("notice")
            .level(LevelFilter::DEBUG)
            .path("logs")
            .max_files(3)
            .json(true);

        assert_eq!(builder.settings.level, LevelFilter::DEBUG);
        assert_eq!(builder.settings.max_files, 3);
        assert!(builder.settings.json);
        assert_eq!(builder.settings.path.as_deref(), Some(std::path::Path::new("logs")));
    }

    #[test]
    fn test_validation() {
        assert!(validate(&Settings::default(), " ").is_err());
        assert!(validate(&Settings { max_files: 0, ..Settings::default() }, "notice").is_err());
        assert!(validate(&Settings::default(), "notice").is_ok());
    }

    #[test]
    #[serial_test::serial]
    fn test_bad_filter_is_rejected() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let settings = Settings { env_filter: Some("notice_bus=loud".to_owned()), ..Settings::default() };
        assert!(matches!(env_filter(&settings), Err(LoggerError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_no_output_is_rejected() {
        let result = Logger::builder().name("silent").console(false).init();
        assert!(matches!(result, Err(LoggerError::InvalidConfiguration { .. })));
    }
}
