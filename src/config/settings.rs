//! Application settings and configuration management

use crate::audio::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOG_TARGET: &str = "pocket_player::config::settings";

/// Device name that selects the software clock sink instead of ALSA.
pub const NULL_DEVICE: &str = "null";

/// Application settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Output device: an ALSA PCM name, or "null" for silent real-time playback
    #[serde(default = "default_output_device")]
    pub output_device: String,
    /// Pool sizing and timing of the decode-ahead pipeline
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_output_device() -> String {
    "default".to_string()
}

/// Error types for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    ParseError(String),
    ValidationError(String),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(s) => write!(f, "Parse error: {}", s),
            ConfigError::ValidationError(s) => write!(f, "Validation error: {}", s),
        }
    }
}

impl Error for ConfigError {}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_device: default_output_device(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(target: LOG_TARGET, "No config at {}, using defaults.", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        debug!(target: LOG_TARGET, "Loaded config from {}.", path.display());
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("pocket-player").join("config.json")
    }

    /// True when playback should go to the clock sink
    pub fn uses_null_device(&self) -> bool {
        self.output_device == NULL_DEVICE
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_device.is_empty() {
            return Err(ConfigError::ValidationError("Output device cannot be empty".to_string()));
        }

        self.pipeline
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
