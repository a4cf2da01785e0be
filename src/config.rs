//! Configuration file handling.
//!
//! A TOML file passed with `--config` supplies the requested mode and session
//! settings. Every field is optional; missing ones take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConvertError;
use crate::traits::{FourCC, ModeRequest};

/// Device name the capture loop looks for by default.
pub const DEFAULT_DEVICE_NAME: &str = "Astra Pro HD Camera";

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Mode to capture.
    #[serde(default)]
    pub request: RequestConfig,
    /// Session tuning.
    #[serde(default)]
    pub session: SessionConfig,
    /// Diagnostics.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The requested capture mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    /// Substring of the device name.
    pub device_name: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format tag, e.g. `YUYV` or `Y8I`.
    pub format: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_owned(),
            width: 1280,
            height: 720,
            format: "YUYV".to_owned(),
        }
    }
}

/// Capture session settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long to wait for a frame, in milliseconds.
    pub timeout_ms: u64,
    /// Conversion threads per frame.
    pub workers: usize,
    /// Maximum number of modes discovery lists.
    pub max_modes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            workers: 1,
            max_modes: 128,
        }
    }
}

impl SessionConfig {
    /// Frame wait window.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// Returns the defaults when no path is given. A given path must exist
    /// and parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The mode request described by this configuration.
    pub fn to_request(&self) -> Result<ModeRequest, ConfigError> {
        let fourcc: FourCC = self.request.format.parse()?;
        Ok(ModeRequest {
            name: self.request.device_name.clone(),
            width: self.request.width,
            height: self.request.height,
            fourcc,
        })
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.workers == 0 {
            return Err(ConfigError::Invalid("session.workers must be at least 1".to_owned()));
        }
        if self.session.max_modes == 0 {
            return Err(ConfigError::Invalid("session.max_modes must be at least 1".to_owned()));
        }
        self.to_request().map(|_| ())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this structure.
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// The requested pixel format tag is malformed.
    #[error(transparent)]
    Format(#[from] ConvertError),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
