//! Capture subsystem
//!
//! A capture engine answers which descriptors it can encode and acquires
//! a live source; the source builds an encoder that emits one chunk per
//! interval into a [`ChunkSink`].

pub mod chunk;
pub mod device;
pub mod ffmpeg;
pub mod session;
pub mod synthetic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::ChosenFormat;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

pub use chunk::{ChunkSink, MediaChunk};
pub use ffmpeg::FfmpegEngine;
pub use session::CaptureSession;
pub use synthetic::SyntheticEngine;

/// Video part of an acquisition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

/// Device acquisition request: `{ video: { width, height }, audio }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn new(width: u32, height: u32, audio: bool) -> Self {
        Self {
            video: VideoConstraints { width, height },
            audio,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.width, config.height, config.enable_audio)
    }
}

/// Platform capture engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the full descriptor can be encoded locally
    fn is_type_supported(&self, descriptor: &str) -> bool;

    /// Acquire the camera (and microphone when requested)
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaSource>, CaptureError>;
}

/// An acquired live source
pub trait MediaSource: Send {
    fn description(&self) -> String;

    /// Route the live picture to a local preview surface
    fn bind_preview(&mut self, surface: &str);

    /// Build an encoder for the negotiated format
    fn encoder(&self, format: &ChosenFormat) -> Result<Box<dyn ChunkEncoder>, CaptureError>;
}

/// Encoder cutting its output into fixed-interval chunks
#[async_trait]
pub trait ChunkEncoder: Send {
    async fn start(&mut self, interval: Duration, sink: ChunkSink) -> Result<(), CaptureError>;

    /// Stop encoding; any buffered tail is emitted before this returns
    async fn stop(&mut self) -> Result<(), CaptureError>;
}
