//! Global subscriber installation. Runs in its own test binary so no other
//! test has installed a subscriber first.

#![allow(clippy::unwrap_used)]

use supla_server_core::config::LoggingConfig;
use supla_server_core::utils::logging::init_logging;
use tracing::Level;

#[test]
fn logger_installs_once() {
    let config = LoggingConfig {
        app_name: "supla-logging-test".into(),
        log_level: Level::DEBUG,
        json_format: true,
        span_events: true,
    };
    init_logging(&config).unwrap();

    let second = init_logging(&config).unwrap_err().to_string();
    assert!(second.contains("Failed to install logger"), "{second}");
}
