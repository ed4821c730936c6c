//! Configuration types for portalcast
//!
//! Provides size presets, portal request options, renegotiation policy and
//! the runtime configuration assembled from the config file and CLI flags.

mod file;

pub use file::{sample_config, ConfigFile};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::formats::PixelLayout;
use crate::stream::negotiate::{MAX_DIMENSION, MAX_FRAMERATE};
use crate::types::BufferParams;

/// Resolution/framerate preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Preset {
    /// 1280x720 @ 30fps
    #[serde(rename = "720p30")]
    P720_30,
    /// 1280x720 @ 60fps
    #[serde(rename = "720p60")]
    P720_60,
    /// 1920x1080 @ 30fps
    #[serde(rename = "1080p30")]
    P1080_30,
    /// 1920x1080 @ 60fps (default)
    #[default]
    #[serde(rename = "1080p60")]
    P1080_60,
    /// 2560x1440 @ 60fps
    #[serde(rename = "1440p60")]
    P1440_60,
    /// 3840x2160 @ 60fps
    #[serde(rename = "4k60")]
    P4K_60,
    /// Custom resolution/framerate
    Custom {
        width: u32,
        height: u32,
        fps: u32,
    },
}

impl Preset {
    /// Get width in pixels
    pub fn width(&self) -> u32 {
        match self {
            Self::P720_30 | Self::P720_60 => 1280,
            Self::P1080_30 | Self::P1080_60 => 1920,
            Self::P1440_60 => 2560,
            Self::P4K_60 => 3840,
            Self::Custom { width, .. } => *width,
        }
    }

    /// Get height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::P720_30 | Self::P720_60 => 720,
            Self::P1080_30 | Self::P1080_60 => 1080,
            Self::P1440_60 => 1440,
            Self::P4K_60 => 2160,
            Self::Custom { height, .. } => *height,
        }
    }

    /// Get framerate
    pub fn fps(&self) -> u32 {
        match self {
            Self::P720_30 | Self::P1080_30 => 30,
            Self::P720_60 | Self::P1080_60 | Self::P1440_60 | Self::P4K_60 => 60,
            Self::Custom { fps, .. } => *fps,
        }
    }

    /// Check that the size and framerate can be offered to a producer
    pub fn check_bounds(&self) -> Result<(), String> {
        let (width, height) = self.resolution();
        if !(1..=MAX_DIMENSION).contains(&width) || !(1..=MAX_DIMENSION).contains(&height) {
            return Err(format!(
                "Size {}x{} is outside 1x1..{}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            ));
        }
        if !(1..=MAX_FRAMERATE).contains(&self.fps()) {
            return Err(format!(
                "Framerate {} is outside 1..{}",
                self.fps(),
                MAX_FRAMERATE
            ));
        }
        Ok(())
    }

    /// Get resolution as (width, height) tuple
    pub fn resolution(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P720_30 => write!(f, "720p30"),
            Self::P720_60 => write!(f, "720p60"),
            Self::P1080_30 => write!(f, "1080p30"),
            Self::P1080_60 => write!(f, "1080p60"),
            Self::P1440_60 => write!(f, "1440p60"),
            Self::P4K_60 => write!(f, "4K60"),
            Self::Custom { width, height, fps } => write!(f, "{}x{}@{}", width, height, fps),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "720p30" => Ok(Self::P720_30),
            "720p60" => Ok(Self::P720_60),
            "1080p30" => Ok(Self::P1080_30),
            "1080p60" => Ok(Self::P1080_60),
            "1440p60" | "2k60" => Ok(Self::P1440_60),
            "4k60" | "2160p60" => Ok(Self::P4K_60),
            other => parse_custom(other).ok_or_else(|| format!("Unknown preset: {}", s)),
        }
    }
}

/// Parse `WIDTHxHEIGHT@FPS`
fn parse_custom(s: &str) -> Option<Preset> {
    let (size, fps) = s.split_once('@')?;
    let (width, height) = size.split_once('x')?;
    Some(Preset::Custom {
        width: width.parse().ok()?,
        height: height.parse().ok()?,
        fps: fps.parse().ok()?,
    })
}

/// Cursor capture mode, as the portal's `cursor_mode` bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Hide cursor in capture
    Hidden,
    /// Show cursor embedded in capture frames
    #[default]
    Embedded,
    /// Cursor metadata only (compositor-dependent)
    Metadata,
}

impl CursorMode {
    /// Bit value used by the ScreenCast portal
    pub fn bits(&self) -> u32 {
        match self {
            Self::Hidden => 1,
            Self::Embedded => 2,
            Self::Metadata => 4,
        }
    }
}

impl std::str::FromStr for CursorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hidden" => Ok(Self::Hidden),
            "embedded" => Ok(Self::Embedded),
            "metadata" => Ok(Self::Metadata),
            _ => Err(format!("Unknown cursor mode: {}", s)),
        }
    }
}

/// Whether the portal should remember the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    /// Do not persist (default)
    #[default]
    None,
    /// Persist while the application runs
    Transient,
    /// Persist until explicitly revoked
    Persistent,
}

impl PersistMode {
    /// Value used by the ScreenCast portal
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

/// What a renegotiation tick re-declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenegotiationMode {
    /// Never renegotiate
    #[default]
    Off,
    /// Offer the current layout at the next preset size
    Format,
    /// Re-declare the buffer parameters only
    Buffers,
}

impl std::fmt::Display for RenegotiationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Format => write!(f, "format"),
            Self::Buffers => write!(f, "buffers"),
        }
    }
}

impl std::str::FromStr for RenegotiationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "format" => Ok(Self::Format),
            "buffers" | "buffer" => Ok(Self::Buffers),
            _ => Err(format!("Unknown renegotiation mode: {}", s)),
        }
    }
}

/// Portal request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalOptions {
    /// Requested cursor mode (sent only if the portal advertises it)
    pub cursor_mode: CursorMode,
    /// Persist mode (sent only to portal version 4 and later)
    pub persist_mode: PersistMode,
    /// Token from an earlier session
    pub restore_token: Option<String>,
}

/// Renegotiation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenegotiationPolicy {
    /// What each tick re-declares
    pub mode: RenegotiationMode,
    /// Time between ticks while streaming
    pub interval: Duration,
    /// Sizes alternated by format renegotiation
    pub presets: [Preset; 2],
}

impl Default for RenegotiationPolicy {
    fn default() -> Self {
        Self {
            mode: RenegotiationMode::Off,
            interval: Duration::from_secs(5),
            presets: [Preset::P1080_60, Preset::P720_60],
        }
    }
}

/// Complete capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Portal request options
    pub portal: PortalOptions,
    /// Preferred stream size and framerate
    pub preset: Preset,
    /// Accepted layouts, in preference order
    pub layouts: Vec<PixelLayout>,
    /// Minimum buffers declared to the producer
    pub min_buffers: u32,
    /// Maximum buffers declared to the producer
    pub max_buffers: u32,
    /// Renegotiation policy
    pub renegotiation: RenegotiationPolicy,
    /// Skip the portal and connect to this node on the local daemon
    pub local_node: Option<u32>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            portal: PortalOptions::default(),
            preset: Preset::default(),
            layouts: default_layouts(),
            min_buffers: BufferParams::MIN_BUFFERS,
            max_buffers: BufferParams::MAX_BUFFERS,
            renegotiation: RenegotiationPolicy::default(),
            local_node: None,
        }
    }
}

/// Layouts offered when nothing is configured
pub fn default_layouts() -> Vec<PixelLayout> {
    vec![
        PixelLayout::Bgrx,
        PixelLayout::Bgra,
        PixelLayout::Rgbx,
        PixelLayout::Rgba,
    ]
}

impl CaptureConfig {
    /// Build a runtime config from the config file
    pub fn from_file(file: &ConfigFile) -> Self {
        let mut config = Self::default();
        config.portal = PortalOptions {
            cursor_mode: file.portal.cursor_mode,
            persist_mode: file.portal.persist_mode,
            restore_token: file.portal.restore_token.clone(),
        };
        config.preset = file.stream.preset;
        if !file.stream.layouts.is_empty() {
            config.layouts = file.stream.layouts.clone();
        }
        config.min_buffers = file.stream.min_buffers;
        config.max_buffers = file.stream.max_buffers;
        config.renegotiation = RenegotiationPolicy {
            mode: file.renegotiation.mode,
            interval: Duration::from_millis(file.renegotiation.interval_ms),
            presets: file.renegotiation.presets,
        };
        config
    }

    /// Set the preferred stream preset
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    /// Set the cursor mode
    pub fn with_cursor_mode(mut self, mode: CursorMode) -> Self {
        self.portal.cursor_mode = mode;
        self
    }

    /// Set the restore token
    pub fn with_restore_token(mut self, token: impl Into<String>) -> Self {
        self.portal.restore_token = Some(token.into());
        self
    }

    /// Set the renegotiation mode
    pub fn with_renegotiation(mut self, mode: RenegotiationMode) -> Self {
        self.renegotiation.mode = mode;
        self
    }

    /// Set the renegotiation interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.renegotiation.interval = interval;
        self
    }

    /// Bypass the portal and connect to a node on the local daemon
    pub fn with_local_node(mut self, node_id: u32) -> Self {
        self.local_node = Some(node_id);
        self
    }

    /// Validate configuration and return warnings
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.layouts.is_empty() {
            warnings.push("No pixel layouts configured; nothing can be negotiated".to_string());
        }
        if self.min_buffers > self.max_buffers {
            warnings.push(format!(
                "min_buffers ({}) exceeds max_buffers ({}); min will be clamped",
                self.min_buffers, self.max_buffers
            ));
        }
        if self.max_buffers > BufferParams::MAX_BUFFERS {
            warnings.push(format!(
                "max_buffers ({}) exceeds the limit of {}; it will be clamped",
                self.max_buffers,
                BufferParams::MAX_BUFFERS
            ));
        }
        if self.renegotiation.mode != RenegotiationMode::Off
            && self.renegotiation.interval < Duration::from_millis(100)
        {
            warnings.push(format!(
                "Renegotiation interval of {:?} is very short",
                self.renegotiation.interval
            ));
        }
        if self.renegotiation.mode == RenegotiationMode::Format
            && self.renegotiation.presets[0].resolution() == self.renegotiation.presets[1].resolution()
        {
            warnings.push("Both renegotiation presets have the same size".to_string());
        }

        warnings
    }

    /// Validate, turning the first blocking warning into an error
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.layouts.is_empty() {
            return Err("No pixel layouts configured".to_string());
        }
        self.preset.check_bounds()?;
        for preset in &self.renegotiation.presets {
            preset
                .check_bounds()
                .map_err(|e| format!("Renegotiation preset: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_resolution() {
        assert_eq!(Preset::P720_60.resolution(), (1280, 720));
        assert_eq!(Preset::P1080_60.resolution(), (1920, 1080));
        assert_eq!(Preset::P4K_60.fps(), 60);
    }

    #[test]
    fn test_custom_preset_parse() {
        assert_eq!(
            "800x600@30".parse::<Preset>(),
            Ok(Preset::Custom {
                width: 800,
                height: 600,
                fps: 30
            })
        );
        assert!("800x@30".parse::<Preset>().is_err());
    }

    #[test]
    fn test_cursor_bits() {
        assert_eq!(CursorMode::Hidden.bits(), 1);
        assert_eq!(CursorMode::Embedded.bits(), 2);
        assert_eq!(CursorMode::Metadata.bits(), 4);
    }

    #[test]
    fn test_default_config_validates() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_empty());
        assert!(config.validate_strict().is_ok());
    }

    #[test]
    fn test_empty_layouts_rejected() {
        let mut config = CaptureConfig::default();
        config.layouts.clear();
        assert!(config.validate_strict().is_err());
    }
}
