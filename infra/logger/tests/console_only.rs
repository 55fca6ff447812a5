use notice_logger::{Logger, LoggingConfig};

#[test]
fn console_only_config_writes_no_files() {
    let logger = Logger::from_config(&LoggingConfig { name: "console-only".to_owned(), ..LoggingConfig::default() })
        .expect("logger should initialize");

    assert!(!logger.writes_files());
    tracing::info!(target: "notice", "console only");
}
