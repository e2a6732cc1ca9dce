//! The shipped sample configuration stays loadable.

use std::{path::Path, time::Duration};

use havoc_monitor::{ConfigError, MonitorConfig};

fn example_path() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/havoc.example.toml")
}

#[test]
fn example_config_loads() {
    let config = MonitorConfig::from_file(&example_path()).expect("example config");

    assert_eq!(config.catalog().cheap, vec!["havoc-survey"]);
    assert!(config.catalog().expensive.is_empty());
    assert_eq!(config.session_config().idle_timeout, Duration::from_secs(30));
    assert_eq!(config.cycle_target().bind_address, "0.0.0.0:0");
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = MonitorConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn check_flag_reports_through_log() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_havoc-monitor"))
        .arg("--check")
        .arg("--config")
        .arg(example_path())
        .arg("--log-level")
        .arg("info")
        .output()
        .expect("run havoc-monitor");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("configuration ok"), "stdout: {stdout}");
    assert!(stdout.contains("INFO"), "not a log line: {stdout}");
}
