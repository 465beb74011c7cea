//! Integration tests for configuration parsing
//!
//! Tests printer configuration handling, including:
//! - Minimal and full TOML documents
//! - Defaults for omitted sections
//! - Invalid configuration handling
//! - Save/load round trip through the filesystem

use printer::config::{PrinterConfig, load_config};
use std::time::Duration;
use tempfile::tempdir;

const MINIMAL_CONFIG: &str = r#"
[general]
log_level = "info"
"#;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"
notifications = false

[transfer]
timeout_secs = 20
interface = 1
permission_wait_secs = 5

[device]
vendor_id = 0x04b8
product_id = 0x0202
"#;

#[test]
fn test_minimal_config_uses_defaults() {
    let config = PrinterConfig::parse(MINIMAL_CONFIG).unwrap();

    assert_eq!(config.general.log_level, "info");
    assert!(config.general.notifications);
    assert_eq!(config.transfer.timeout_secs, 100);
    assert_eq!(config.transfer.interface, 0);
    assert_eq!(config.transfer.permission_wait(), Duration::from_secs(30));
    assert!(config.device.target().is_none());
}

#[test]
fn test_full_config() {
    let config = PrinterConfig::parse(FULL_CONFIG).unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert!(!config.general.notifications);
    assert_eq!(config.transfer.permission_wait(), Duration::from_secs(5));
    assert_eq!(config.device.target(), Some((0x04b8, 0x0202)));

    let settings = config.manager_settings();
    assert_eq!(settings.interface, 1);
    assert_eq!(settings.transfer_timeout, Duration::from_secs(20));
}

#[test]
fn test_partial_transfer_section() {
    let config = PrinterConfig::parse(
        r#"
[general]
log_level = "warn"

[transfer]
timeout_secs = 3
"#,
    )
    .unwrap();

    assert_eq!(config.transfer.timeout_secs, 3);
    assert_eq!(config.transfer.interface, 0);
    assert_eq!(config.transfer.permission_wait_secs, 30);
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        // Missing [general]
        "[transfer]\ntimeout_secs = 10\n",
        // Unknown log level
        "[general]\nlog_level = \"loud\"\n",
        // Zero timeout
        "[general]\nlog_level = \"info\"\n[transfer]\ntimeout_secs = 0\n",
        // Half a device
        "[general]\nlog_level = \"info\"\n[device]\nvendor_id = 1208\n",
        // Id out of range
        "[general]\nlog_level = \"info\"\n[device]\nvendor_id = 70000\nproduct_id = 1\n",
        // Not TOML
        "this is not toml",
    ];

    for case in cases {
        assert!(
            PrinterConfig::parse(case).is_err(),
            "expected rejection of {:?}",
            case
        );
    }
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("printer.toml");

    let mut config = PrinterConfig::default();
    config.general.log_level = "trace".to_string();
    config.transfer.timeout_secs = 42;
    config.device.vendor_id = Some(1234);
    config.device.product_id = Some(5678);
    config.save(&path).unwrap();

    let loaded = PrinterConfig::load(Some(path.clone())).unwrap();
    assert_eq!(loaded.general.log_level, "trace");
    assert_eq!(loaded.transfer.timeout_secs, 42);
    assert_eq!(loaded.device.target(), Some((1234, 5678)));

    let via_str = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(via_str.transfer.timeout_secs, 42);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempdir().unwrap();
    let result = PrinterConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}
