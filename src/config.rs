// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `<config dir>/attendance-scanner/config.json`. Every
//! field has a default, so a missing file or missing keys are fine.

use crate::app::frame_processor::DetectionBox;
use crate::app::session::SessionConfig;
use crate::backends::camera::arbiter::ArbiterConfig;
use crate::backends::camera::{CameraPlatformType, Framerate, HostOrigin, StreamRequest};
use crate::backends::decode::{DecodeBackendKind, DecodeOptions};
use crate::constants;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current configuration format version
pub const CONFIG_VERSION: u32 = 1;

/// Directory name under the user's config dir
pub const APP_DIR: &str = "attendance-scanner";

/// Longest accepted duplicate-scan cooldown (one hour)
const MAX_COOLDOWN_MS: u64 = 60 * 60 * 1000;

/// Largest accepted prune factor
const MAX_PRUNE_FACTOR: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Format version the file was written with
    pub version: u32,
    /// Duplicate-scan cooldown
    pub cooldown_ms: u64,
    /// Debounce entries older than `prune_factor × cooldown` are purged
    pub prune_factor: u32,
    /// Grace period for a preempted stream to stop
    pub drain_grace_ms: u64,
    /// Duration of the success state
    pub success_pulse_ms: u64,
    /// Decode backend variant
    pub backend: DecodeBackendKind,
    /// Camera platform (V4L2 or virtual)
    pub platform: CameraPlatformType,
    /// Device id to prefer when several cameras are present
    pub preferred_device: Option<String>,
    /// Decode attempts per second
    pub fps: u32,
    /// Region searched for codes; `null` searches the whole frame
    pub detection_box: Option<DetectionBox>,
    /// Longest side frames are downscaled to before decoding
    pub max_decode_dimension: u32,
    /// Requested capture width
    pub capture_width: u32,
    /// Requested capture height
    pub capture_height: u32,
    /// Origin of the hosting context, checked before camera access
    pub origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cooldown_ms: constants::DEFAULT_COOLDOWN.as_millis() as u64,
            prune_factor: constants::DEFAULT_PRUNE_FACTOR,
            drain_grace_ms: constants::DEFAULT_DRAIN_GRACE.as_millis() as u64,
            success_pulse_ms: constants::DEFAULT_SUCCESS_PULSE.as_millis() as u64,
            backend: DecodeBackendKind::default(),
            platform: CameraPlatformType::default(),
            preferred_device: None,
            fps: constants::DEFAULT_DECODE_FPS,
            detection_box: Some(DetectionBox::default()),
            max_decode_dimension: constants::MAX_DECODE_DIMENSION,
            capture_width: constants::capture::WIDTH,
            capture_height: constants::capture::HEIGHT,
            origin: constants::DEFAULT_ORIGIN.to_string(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Load from the default location; defaults when there is none
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory on this system, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        if config.version > CONFIG_VERSION {
            warn!(
                found = config.version,
                supported = CONFIG_VERSION,
                "Config written by a newer version, unknown keys are ignored"
            );
        }
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(&Config {
            version: CONFIG_VERSION,
            ..self.clone()
        })?;
        json.push('\n');
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Reject values the scanner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cooldown_ms == 0 || self.cooldown_ms > MAX_COOLDOWN_MS {
            return Err(ConfigError::Invalid(format!(
                "cooldown_ms {} is out of range (1-{})",
                self.cooldown_ms, MAX_COOLDOWN_MS
            )));
        }
        if self.prune_factor > MAX_PRUNE_FACTOR {
            return Err(ConfigError::Invalid(format!(
                "prune_factor {} is out of range (0-{})",
                self.prune_factor, MAX_PRUNE_FACTOR
            )));
        }
        if self.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "fps {} is out of range (0-120)",
                self.fps
            )));
        }
        if let Some(b) = &self.detection_box {
            if b.width == 0 || b.height == 0 {
                return Err(ConfigError::Invalid("detection_box must not be empty".into()));
            }
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(ConfigError::Invalid("capture size must not be empty".into()));
        }
        if self.origin.trim().is_empty() {
            return Err(ConfigError::Invalid("origin must not be empty".into()));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn success_pulse(&self) -> Duration {
        Duration::from_millis(self.success_pulse_ms)
    }

    pub fn host_origin(&self) -> HostOrigin {
        HostOrigin::parse(&self.origin)
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            drain_grace: self.drain_grace(),
            preferred_device: self.preferred_device.clone(),
            stream: StreamRequest {
                width: self.capture_width,
                height: self.capture_height,
                framerate: Framerate::from_int(constants::capture::FRAMERATE),
            },
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            success_pulse: self.success_pulse(),
            cooldown: self.cooldown(),
            prune_factor: self.prune_factor,
        }
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            fps: self.fps,
            detection_box: self.detection_box,
            ..Default::default()
        }
    }
}
