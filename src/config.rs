//! Application configuration
//!
//! Loaded from a TOML file (by default in the platform config directory)
//! with environment overrides layered on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{format::DEFAULT_CANDIDATES, CandidateFormat};
use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::DEFAULT_READINESS_SENTINEL;

/// Environment variable overriding the ingest endpoint
pub const ENV_ENDPOINT: &str = "RELAY_ENDPOINT";

/// Environment variable carrying the session token
pub const ENV_CSRF_TOKEN: &str = "RELAY_CSRF_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub formats: FormatsConfig,
    pub channel: ChannelConfig,
    pub playback: PlaybackConfig,
    pub ui: UiConfig,
}

/// Capture device constraints and encoder cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub enable_audio: bool,
    /// Interval between emitted chunks
    pub chunk_interval_ms: u64,
    /// Video device node (v4l2)
    pub video_device: String,
    /// Audio input name passed to ffmpeg
    pub audio_device: String,
    pub ffmpeg_path: String,
    /// Show a local preview window while capturing
    pub preview: bool,
    pub preview_surface: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            enable_audio: false,
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            video_device: "/dev/video0".to_string(),
            audio_device: "default".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            preview: false,
            preview_surface: "source".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }
}

/// Encode descriptors in preference order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatsConfig {
    pub candidates: Vec<String>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FormatsConfig {
    pub fn candidates(&self) -> Vec<CandidateFormat> {
        CandidateFormat::list(self.candidates.iter().cloned())
    }
}

/// Ingest socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub csrf_token: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            csrf_token: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Playback handoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub manifest_path: String,
    /// HTTP base serving the manifest, path included; the endpoint's
    /// origin when unset
    pub manifest_base: Option<String>,
    pub readiness_sentinel: String,
    /// Program launched with the manifest URL; empty means log only
    pub player_command: String,
    /// Arguments before the manifest URL; `{surface}` is replaced with
    /// `output_surface`
    pub player_args: Vec<String>,
    pub output_surface: String,
    pub autoplay: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            manifest_path: DEFAULT_MANIFEST_PATH.to_string(),
            manifest_base: None,
            readiness_sentinel: DEFAULT_READINESS_SENTINEL.to_string(),
            player_command: "ffplay".to_string(),
            player_args: ["-autoexit", "-window_title", "{surface}"]
                .map(String::from)
                .to_vec(),
            output_surface: "output".to_string(),
            autoplay: true,
        }
    }
}

/// Local control API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
    /// Directory of static assets served at `/`
    pub static_dir: Option<PathBuf>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_UI_PORT,
            static_dir: None,
        }
    }
}

impl AppConfig {
    /// Platform default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "camera-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, or the default location if it exists, then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::read(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&text)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            self.channel.endpoint = endpoint;
        }
        if let Ok(token) = std::env::var(ENV_CSRF_TOKEN) {
            self.channel.csrf_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::Config("capture width and height must be non-zero".into()));
        }
        if self.formats.candidates.is_empty() {
            return Err(Error::Config("at least one candidate format is required".into()));
        }
        if !self.playback.manifest_path.starts_with('/') {
            return Err(Error::Config(format!(
                "manifest_path must be absolute: {}",
                self.playback.manifest_path
            )));
        }
        Ok(())
    }
}
