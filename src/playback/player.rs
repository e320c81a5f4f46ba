//! Adaptive-streaming players
//!
//! Bitrate selection and segment fetching belong to the player; the relay
//! only points it at the manifest.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use url::Url;

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

const SURFACE_PLACEHOLDER: &str = "{surface}";

/// Player binding a manifest to an output surface
#[async_trait]
pub trait Player: Send {
    async fn initialize(&mut self, surface: &str, manifest: &Url, autoplay: bool) -> Result<(), PlaybackError>;
}

/// Launches an external player program with the manifest URL
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
        }
    }
}

impl CommandPlayer {
    /// Configured arguments with `{surface}` filled in, then the manifest
    fn command_args(&self, surface: &str, manifest: &Url) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(SURFACE_PLACEHOLDER, surface))
            .chain(std::iter::once(manifest.to_string()))
            .collect()
    }
}

#[async_trait]
impl Player for CommandPlayer {
    async fn initialize(&mut self, surface: &str, manifest: &Url, autoplay: bool) -> Result<(), PlaybackError> {
        if !autoplay {
            tracing::info!(manifest = %manifest, "autoplay disabled, player not launched");
            return Ok(());
        }

        let child = Command::new(&self.program)
            .args(self.command_args(surface, manifest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::LaunchFailed(format!("{}: {}", self.program, e)))?;

        tracing::info!(program = %self.program, pid = ?child.id(), surface, "player launched");
        self.child = Some(child);
        Ok(())
    }
}

/// One recorded initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub surface: String,
    pub manifest: Url,
    pub autoplay: bool,
}

/// Player that only logs, keeping a history of requests
#[derive(Clone, Default)]
pub struct LogPlayer {
    requests: Arc<Mutex<Vec<PlaybackRequest>>>,
}

impl LogPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<PlaybackRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Player for LogPlayer {
    async fn initialize(&mut self, surface: &str, manifest: &Url, autoplay: bool) -> Result<(), PlaybackError> {
        tracing::info!(surface, manifest = %manifest, autoplay, "playback ready");
        self.requests.lock().push(PlaybackRequest {
            surface: surface.to_string(),
            manifest: manifest.clone(),
            autoplay,
        });
        Ok(())
    }
}

/// Player selected by configuration: empty command means log only
pub fn player_from_config(config: &PlaybackConfig) -> Box<dyn Player> {
    if config.player_command.trim().is_empty() {
        Box::new(LogPlayer::new())
    } else {
        Box::new(CommandPlayer::new(config.player_command.clone(), config.player_args.clone()))
    }
}
