// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use attendance_scanner::Config;
use attendance_scanner::backends::camera::CameraPlatformType;
use attendance_scanner::backends::decode::DecodeBackendKind;
use attendance_scanner::errors::ConfigError;
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.cooldown(), Duration::from_millis(2000));
    assert_eq!(config.backend, DecodeBackendKind::Continuous);
    assert!(config.host_origin().is_secure());
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("config.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let config = Config {
        cooldown_ms: 3500,
        backend: DecodeBackendKind::SingleShot,
        platform: CameraPlatformType::Virtual,
        preferred_device: Some("/dev/video2".to_string()),
        detection_box: None,
        ..Default::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.arbiter_config().preferred_device.as_deref(), Some("/dev/video2"));
    assert_eq!(loaded.session_config().cooldown, Duration::from_millis(3500));
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "backend": "manual-input", "fps": 5 }"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.backend, DecodeBackendKind::ManualInput);
    assert_eq!(config.fps, 5);
    assert_eq!(config.cooldown_ms, Config::default().cooldown_ms);
    assert_eq!(config.decode_options().fps, 5);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    std::fs::write(&path, r#"{ "cooldown_ms": 0 }"#).unwrap();
    assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, r#"{ "cooldown_ms": 18446744073709551615 }"#).unwrap();
    assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, r#"{ "prune_factor": 4294967295 }"#).unwrap();
    assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "not json").unwrap();
    assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_insecure_origin_is_reported() {
    let config = Config {
        origin: "http://scanner.example.edu".to_string(),
        ..Default::default()
    };
    assert!(!config.host_origin().is_secure());
}
