//! Configuration file loading
//!
//! Loads user configuration from `~/.config/portalcast/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{default_layouts, CursorMode, PersistMode, Preset, RenegotiationMode};
use crate::error::{CaptureError, Result};
use crate::formats::PixelLayout;
use crate::types::BufferParams;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Portal request settings
    #[serde(default)]
    pub portal: PortalSettings,

    /// Stream format settings
    #[serde(default)]
    pub stream: StreamSettings,

    /// Renegotiation settings
    #[serde(default)]
    pub renegotiation: RenegotiationSettings,
}

/// Portal request settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Cursor mode (hidden, embedded, metadata)
    #[serde(default)]
    pub cursor_mode: CursorMode,

    /// Persist mode (none, transient, persistent)
    #[serde(default)]
    pub persist_mode: PersistMode,

    /// Restore token from a previous session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_token: Option<String>,
}

/// Stream format settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Preferred size/framerate preset
    #[serde(default)]
    pub preset: Preset,

    /// Accepted pixel layouts, most preferred first
    #[serde(default = "default_layouts")]
    pub layouts: Vec<PixelLayout>,

    /// Minimum buffer count declared to the producer
    #[serde(default = "default_min_buffers")]
    pub min_buffers: u32,

    /// Maximum buffer count declared to the producer
    #[serde(default = "default_max_buffers")]
    pub max_buffers: u32,
}

/// Renegotiation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenegotiationSettings {
    /// off, format or buffers
    #[serde(default)]
    pub mode: RenegotiationMode,

    /// Milliseconds between renegotiations while streaming
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// The two sizes alternated by format renegotiation
    #[serde(default = "default_presets")]
    pub presets: [Preset; 2],
}

fn default_min_buffers() -> u32 {
    BufferParams::MIN_BUFFERS
}

fn default_max_buffers() -> u32 {
    BufferParams::MAX_BUFFERS
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_presets() -> [Preset; 2] {
    [Preset::P1080_60, Preset::P720_60]
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            preset: Preset::default(),
            layouts: default_layouts(),
            min_buffers: default_min_buffers(),
            max_buffers: default_max_buffers(),
        }
    }
}

impl Default for RenegotiationSettings {
    fn default() -> Self {
        Self {
            mode: RenegotiationMode::default(),
            interval_ms: default_interval_ms(),
            presets: default_presets(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("portalcast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("portalcast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/portalcast/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# portalcast configuration

[portal]
# Cursor mode: hidden, embedded, metadata
# Only sent if the portal advertises the mode.
cursor_mode = "embedded"

# Persist mode: none, transient, persistent (portal version 4+)
persist_mode = "none"

# Restore token printed by a previous `portalcast cast` run
# restore_token = ""

[stream]
# Preferred size: 720p30, 720p60, 1080p30, 1080p60, 1440p60, 4k60
preset = "1080p60"

# Accepted pixel layouts, most preferred first
layouts = ["BGRx", "BGRA", "RGBx", "RGBA"]

# Buffer count range declared to the producer (max is capped at 64)
min_buffers = 8
max_buffers = 64

[renegotiation]
# off: never, format: alternate sizes, buffers: re-declare buffer params
mode = "off"

# Time between renegotiations while streaming
interval_ms = 5000

# Sizes alternated by format renegotiation
presets = ["1080p60", "720p60"]
"#
    .to_string()
}
