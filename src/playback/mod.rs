//! Playback handoff
//!
//! Once the server reports the playlist as ready, the display switches
//! from live preview to the packaged stream served at a well-known
//! manifest path.

pub mod player;

use url::Url;

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::network::ConnectionTarget;

pub use player::{player_from_config, CommandPlayer, LogPlayer, PlaybackRequest, Player};

/// Resolve the manifest location under an explicit base or the ingest
/// endpoint's HTTP origin. The base's path is kept as a prefix.
pub fn resolve_manifest_url(
    config: &PlaybackConfig,
    target: &ConnectionTarget,
) -> Result<Url, PlaybackError> {
    let mut base = match &config.manifest_base {
        Some(base) => Url::parse(base).map_err(|e| PlaybackError::InvalidManifest(format!("{}: {}", base, e)))?,
        None => target
            .http_origin()
            .map_err(|e| PlaybackError::InvalidManifest(e.to_string()))?,
    };

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(config.manifest_path.trim_start_matches('/'))
        .map_err(|e| PlaybackError::InvalidManifest(format!("{}: {}", config.manifest_path, e)))
}

/// One-shot switch to playback
pub struct PlaybackHandoff {
    manifest_url: Url,
    surface: String,
    autoplay: bool,
    player: Box<dyn Player>,
    initialized: bool,
}

impl PlaybackHandoff {
    pub fn new(manifest_url: Url, surface: impl Into<String>, autoplay: bool, player: Box<dyn Player>) -> Self {
        Self {
            manifest_url,
            surface: surface.into(),
            autoplay,
            player,
            initialized: false,
        }
    }

    pub fn from_config(
        config: &PlaybackConfig,
        target: &ConnectionTarget,
        player: Box<dyn Player>,
    ) -> Result<Self, PlaybackError> {
        let manifest_url = resolve_manifest_url(config, target)?;
        Ok(Self::new(manifest_url, config.output_surface.clone(), config.autoplay, player))
    }

    /// Initialize the player on first call. Returns whether this call did.
    pub async fn on_ready(&mut self) -> Result<bool, PlaybackError> {
        if self.initialized {
            tracing::debug!("playback already initialized, readiness ignored");
            return Ok(false);
        }

        self.initialized = true;
        self.player
            .initialize(&self.surface, &self.manifest_url, self.autoplay)
            .await?;
        Ok(true)
    }

    pub fn manifest_url(&self) -> &Url {
        &self.manifest_url
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new("ws://localhost:4000/socket", Some("tok")).unwrap()
    }

    #[test]
    fn test_manifest_on_endpoint_origin() {
        let url = resolve_manifest_url(&PlaybackConfig::default(), &target()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/dash/manifest.mpd");
    }

    #[test]
    fn test_manifest_on_explicit_base() {
        let config = PlaybackConfig {
            manifest_base: Some("https://cdn.example.com/live/".into()),
            ..PlaybackConfig::default()
        };
        let url = resolve_manifest_url(&config, &target()).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/live/dash/manifest.mpd");

        let config = PlaybackConfig {
            manifest_base: Some("https://cdn.example.com/live".into()),
            ..PlaybackConfig::default()
        };
        let url = resolve_manifest_url(&config, &target()).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/live/dash/manifest.mpd");
    }

    #[tokio::test]
    async fn test_initializes_once() {
        let player = LogPlayer::new();
        let mut handoff = PlaybackHandoff::from_config(&PlaybackConfig::default(), &target(), Box::new(player.clone())).unwrap();

        assert!(handoff.on_ready().await.unwrap());
        assert!(!handoff.on_ready().await.unwrap());
        assert!(handoff.is_initialized());

        let requests = player.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].surface, "output");
        assert_eq!(requests[0].manifest.path(), "/dash/manifest.mpd");
        assert!(requests[0].autoplay);
    }
}
