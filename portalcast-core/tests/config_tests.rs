//! Integration tests for configuration system

use std::time::Duration;

use portalcast_core::config::{
    sample_config, CaptureConfig, ConfigFile, CursorMode, PersistMode, Preset, RenegotiationMode,
};
use portalcast_core::formats::PixelLayout;
use tempfile::TempDir;

#[test]
fn test_preset_from_string() {
    assert_eq!("720p30".parse::<Preset>().ok(), Some(Preset::P720_30));
    assert_eq!("1080p60".parse::<Preset>().ok(), Some(Preset::P1080_60));
    assert_eq!("2160p60".parse::<Preset>().ok(), Some(Preset::P4K_60));
    assert_eq!(
        "1600x900@75".parse::<Preset>().ok(),
        Some(Preset::Custom {
            width: 1600,
            height: 900,
            fps: 75
        })
    );
    assert!("invalid".parse::<Preset>().is_err());
}

#[test]
fn test_mode_parsing() {
    assert_eq!("buffers".parse::<RenegotiationMode>().ok(), Some(RenegotiationMode::Buffers));
    assert_eq!("FORMAT".parse::<RenegotiationMode>().ok(), Some(RenegotiationMode::Format));
    assert!("sometimes".parse::<RenegotiationMode>().is_err());
    assert_eq!("metadata".parse::<CursorMode>().ok(), Some(CursorMode::Metadata));
    assert_eq!(CursorMode::Embedded.bits(), 2);
    assert_eq!(PersistMode::Persistent.as_u32(), 2);
}

#[test]
fn test_sample_config_parses() {
    let file: ConfigFile = toml::from_str(&sample_config()).unwrap();
    assert_eq!(file.portal.cursor_mode, CursorMode::Embedded);
    assert_eq!(file.stream.preset, Preset::P1080_60);
    assert_eq!(file.stream.layouts[0], PixelLayout::Bgrx);
    assert_eq!(file.renegotiation.mode, RenegotiationMode::Off);
    assert_eq!(file.renegotiation.presets, [Preset::P1080_60, Preset::P720_60]);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let file = ConfigFile::load_from(dir.path().join("nope.toml")).unwrap();
    assert_eq!(file.stream.min_buffers, 8);
    assert_eq!(file.stream.max_buffers, 64);
    assert_eq!(file.renegotiation.interval_ms, 5000);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[renegotiation]\nmode = \"format\"\ninterval_ms = 250\n").unwrap();

    let file = ConfigFile::load_from(&path).unwrap();
    assert_eq!(file.renegotiation.mode, RenegotiationMode::Format);
    assert_eq!(file.renegotiation.interval_ms, 250);
    assert_eq!(file.stream.preset, Preset::P1080_60);
    assert_eq!(file.portal.restore_token, None);
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[stream\npreset = ").unwrap();

    let err = ConfigFile::load_from(&path).unwrap_err();
    assert_eq!(err.kind(), portalcast_core::error::ErrorKind::Config);
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut file = ConfigFile::default();
    file.portal.restore_token = Some("tok-123".to_string());
    file.portal.persist_mode = PersistMode::Transient;
    file.stream.preset = Preset::P720_60;
    file.stream.layouts = vec![PixelLayout::Rgba];
    file.renegotiation.mode = RenegotiationMode::Buffers;
    file.save_to(&path).unwrap();

    let loaded = ConfigFile::load_from(&path).unwrap();
    assert_eq!(loaded.portal.restore_token.as_deref(), Some("tok-123"));
    assert_eq!(loaded.portal.persist_mode, PersistMode::Transient);
    assert_eq!(loaded.stream.preset, Preset::P720_60);
    assert_eq!(loaded.stream.layouts, vec![PixelLayout::Rgba]);
    assert_eq!(loaded.renegotiation.mode, RenegotiationMode::Buffers);
}

#[test]
fn test_capture_config_from_file() {
    let mut file = ConfigFile::default();
    file.portal.cursor_mode = CursorMode::Hidden;
    file.stream.min_buffers = 4;
    file.renegotiation.interval_ms = 1500;
    file.renegotiation.mode = RenegotiationMode::Format;

    let config = CaptureConfig::from_file(&file);
    assert_eq!(config.portal.cursor_mode, CursorMode::Hidden);
    assert_eq!(config.min_buffers, 4);
    assert_eq!(config.renegotiation.interval, Duration::from_millis(1500));
    assert_eq!(config.renegotiation.mode, RenegotiationMode::Format);
}

#[test]
fn test_empty_layout_list_keeps_defaults() {
    let mut file = ConfigFile::default();
    file.stream.layouts.clear();
    let config = CaptureConfig::from_file(&file);
    assert!(!config.layouts.is_empty());
}

#[test]
fn test_validation_warnings() {
    let config = CaptureConfig::default();
    assert!(config.validate().is_empty());
    assert!(config.validate_strict().is_ok());

    let mut config = CaptureConfig::default()
        .with_renegotiation(RenegotiationMode::Format)
        .with_interval(Duration::from_millis(10));
    config.min_buffers = 80;
    config.max_buffers = 100;
    let warnings = config.validate();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.contains("very short")));

    let config = CaptureConfig::default().with_preset(Preset::Custom {
        width: 0,
        height: 720,
        fps: 30,
    });
    assert!(config.validate_strict().is_err());
}

#[test]
fn test_out_of_range_presets_rejected() {
    let oversized: Preset = "10000x10000@60".parse().unwrap();
    assert!(oversized.check_bounds().is_err());
    assert!(CaptureConfig::default().with_preset(oversized).validate_strict().is_err());

    let too_fast: Preset = "1920x1080@500".parse().unwrap();
    assert!(CaptureConfig::default().with_preset(too_fast).validate_strict().is_err());

    let still_image: Preset = "1920x1080@0".parse().unwrap();
    assert!(still_image.check_bounds().is_err());

    let largest: Preset = "8192x8192@360".parse().unwrap();
    assert!(CaptureConfig::default().with_preset(largest).validate_strict().is_ok());
}

#[test]
fn test_out_of_range_renegotiation_preset_rejected() {
    let mut config = CaptureConfig::default().with_renegotiation(RenegotiationMode::Format);
    config.renegotiation.presets[1] = Preset::Custom {
        width: 9000,
        height: 720,
        fps: 60,
    };

    let err = config.validate_strict().unwrap_err();
    assert!(err.contains("Renegotiation preset"));
}

#[test]
fn test_identical_renegotiation_presets_warn() {
    let mut config = CaptureConfig::default().with_renegotiation(RenegotiationMode::Format);
    config.renegotiation.presets = [Preset::P1080_30, Preset::P1080_60];

    let warnings = config.validate();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("same size"));
    assert!(config.validate_strict().is_ok());
}
