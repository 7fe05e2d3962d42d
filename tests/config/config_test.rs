//! Tests for TOML configuration

use hmd_tracker::{PredictionSource, TrackerConfig, TrackerError};

use crate::test_utils::create_temp_dir;

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = create_temp_dir();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[device]
keep_alive_refresh_ms = 2000

[fusion]
yaw_correction = true
prediction_source = "smoothed"
accel_gain = 0.1
"#,
    )
    .expect("write config");

    let config = TrackerConfig::load(&path).expect("load");
    assert_eq!(config.device.keep_alive_refresh_ms, 2000);
    assert_eq!(config.device.keep_alive_hold_ms, 10_000);
    assert_eq!(config.device.vendor_id, 0x2833);
    assert!(config.fusion.yaw_correction);
    assert!(config.fusion.gravity_correction);
    assert_eq!(config.fusion.prediction_source, PredictionSource::Smoothed);
    assert!((config.fusion.accel_gain - 0.1).abs() < 1e-7);
}

#[test]
fn test_hex_device_ids() {
    let config = TrackerConfig::from_toml_str("[device]\nvendor_id = 0x1234\nproduct_id = 0x0002\n")
        .expect("parse");
    assert_eq!(config.device.vendor_id, 0x1234);
    assert_eq!(config.device.product_id, 2);
}

#[test]
fn test_empty_document_is_default() {
    assert_eq!(TrackerConfig::from_toml_str("").expect("parse"), TrackerConfig::default());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = TrackerConfig::from_toml_str("[fusion\naccel_gain = ").unwrap_err();
    assert!(matches!(err, TrackerError::Config(_)));
}

#[test]
fn test_validation_rejects_bad_values() {
    let err = TrackerConfig::from_toml_str("[fusion]\naccel_gain = -1.0\n").unwrap_err();
    assert!(err.to_string().contains("accel_gain"));

    let err = TrackerConfig::from_toml_str("[fusion]\nprediction_horizon = 0.0\n").unwrap_err();
    assert!(err.to_string().contains("prediction_horizon"));

    let err = TrackerConfig::from_toml_str("[device]\nkeep_alive_refresh_ms = 20000\n").unwrap_err();
    assert!(err.to_string().contains("keep_alive_refresh_ms"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = create_temp_dir();
    let err = TrackerConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TrackerError::Io(_)));
}

#[test]
fn test_serialized_config_parses_back() {
    let mut config = TrackerConfig::default();
    config.fusion.prediction_source = PredictionSource::Smoothed;
    config.device.min_read_timeout_ms = 50;

    let text = config.to_toml_string().expect("serialize");
    assert_eq!(TrackerConfig::from_toml_str(&text).expect("parse"), config);
}

#[test]
fn test_default_path_ends_with_app_dir() {
    if let Some(path) = TrackerConfig::default_path() {
        assert!(path.ends_with("hmd-tracker/config.toml"));
    }
}
