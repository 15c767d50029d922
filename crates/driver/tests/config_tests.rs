//! Integration tests for configuration loading
//!
//! Covers reading config files from disk, round-tripping through `save`,
//! and rejecting invalid files.

use driver::{DriverConfig, DriverOptions};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[driver]
log_level = "debug"

[profiles]
store_url = "http://profiles.local:8080"
fetch_timeout_secs = 3
local_dir = "/var/lib/scan-driver/profiles"

[usb]
transfer_timeout_ms = 2500
scan_chunk_size = 131072
operation_timeout_secs = 0
filters = ["0x04a9:*", "0x04b8:0x0001"]
class_filters = [6]
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("driver.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = DriverConfig::load(Some(path)).unwrap();

    assert_eq!(config.driver.log_level, "debug");
    assert_eq!(
        config.profiles.store_url().unwrap().as_str(),
        "http://profiles.local:8080/"
    );
    assert_eq!(config.profiles.fetch_timeout(), Duration::from_secs(3));
    assert_eq!(config.usb.filters.len(), 2);
    assert_eq!(config.usb.class_filters, vec![6]);

    let options = DriverOptions::from(&config.usb);
    assert_eq!(options.transfer_timeout, Duration::from_millis(2500));
    assert_eq!(options.scan_chunk_size, 128 * 1024);
    assert!(options.operation_timeout.is_none());
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = DriverConfig::load(Some(path)).unwrap();

    assert_eq!(config.driver.log_level, "info");
    assert!(config.profiles.local_dir.is_none());
    assert_eq!(config.usb.scan_chunk_size, 64 * 1024);
    assert_eq!(config.usb.class_filters, vec![0x06, 0x07, 0xFF]);
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("driver.toml");

    let mut config = DriverConfig::default();
    config.usb.filters = vec!["0x04a9:0x1234".to_string()];
    config.usb.operation_timeout_secs = 15;
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.usb.filters, config.usb.filters);
    assert_eq!(
        DriverOptions::from(&loaded.usb).operation_timeout,
        Some(Duration::from_secs(15))
    );
}

#[test]
fn test_invalid_files_are_rejected() {
    let dir = TempDir::new().unwrap();

    let cases = [
        "[driver]\nlog_level = \"loud\"\n",
        "[profiles]\nstore_url = \"not a url\"\n",
        "[usb]\nscan_chunk_size = 0\n",
        "[profiles]\nfetch_timeout_secs = 0\n",
        "[usb]\nfilters = [\"04a9:1234\"]\n",
        "[usb\n",
    ];
    for content in cases {
        let path = write_config(&dir, content);
        assert!(
            DriverConfig::load(Some(path)).is_err(),
            "accepted invalid config: {}",
            content
        );
    }
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = DriverConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}
