//! Stream configuration
//!
//! Loaded from `~/.config/camstream/config.toml` (or an explicit path). Every
//! field has a default, so an empty or missing file yields a working setup for
//! ESP32-CAM style firmware.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::mjpeg::Framing;

/// Boundary literal emitted by the camera firmware
pub const DEFAULT_BOUNDARY: &str = "--123456789000000000000987654321";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// HTTP port of the stream endpoint
    pub port: u16,
    /// Path of the stream endpoint
    pub path: String,
    /// Multipart boundary marker, matched literally
    pub boundary: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// How long `stop()` waits for the stream thread before abandoning it
    pub stop_timeout_ms: u64,
    pub decode_workers: usize,
    /// Frames waiting for a decode worker; extra frames are dropped
    pub decode_queue: usize,
    /// Divisor applied on the second decode attempt
    pub downsample_factor: u32,
    pub max_frame_bytes: usize,
    /// Frames larger than this only decode on the downsampled attempt
    pub max_full_width: u32,
    pub max_full_height: u32,
    /// Rejections and decode failures logged in full per session
    pub diagnostic_samples: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: 81,
            path: "/stream".to_string(),
            boundary: DEFAULT_BOUNDARY.to_string(),
            user_agent: "MJPEG-Client".to_string(),
            connect_timeout_secs: 10,
            stop_timeout_ms: 1000,
            decode_workers: 2,
            decode_queue: 4,
            downsample_factor: 2,
            max_frame_bytes: 4 * 1024 * 1024,
            max_full_width: 1600,
            max_full_height: 1200,
            diagnostic_samples: 5,
        }
    }
}

impl StreamConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StreamConfig = toml::from_str(&content)?;
        info!("Loaded stream config from {:?}", path);
        Ok(config.sanitized())
    }

    /// Load from `path`, or the default location if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camstream").join("config.toml"))
    }

    /// Stream URL for a camera host
    pub fn stream_url(&self, host: &str) -> String {
        format!("http://{}:{}{}", host, self.port, self.path)
    }

    pub fn framing(&self) -> Framing {
        Framing::new(self.boundary.as_bytes()).with_max_frame_bytes(self.max_frame_bytes)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Clamp values that would otherwise stall or break the pipeline
    pub(crate) fn sanitized(mut self) -> Self {
        self.decode_workers = self.decode_workers.max(1);
        self.decode_queue = self.decode_queue.max(1);
        self.downsample_factor = self.downsample_factor.max(2);
        if self.boundary.is_empty() {
            self.boundary = DEFAULT_BOUNDARY.to_string();
        }
        self
    }
}
