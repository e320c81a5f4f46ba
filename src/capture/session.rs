//! Capture session
//!
//! Owns the acquired source and the encoder bound to the chosen format.

use std::time::Duration;

use crate::capture::{ChunkEncoder, ChunkSink, MediaChunk, MediaConstraints, MediaEngine, MediaSource};
use crate::codec::ChosenFormat;
use crate::error::CaptureError;

/// Encoder activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Inactive,
    Active,
}

/// Live source plus encoder for one relay session
pub struct CaptureSession {
    source: Box<dyn MediaSource>,
    encoder: Box<dyn ChunkEncoder>,
    sink: ChunkSink,
    state: EncoderState,
}

impl CaptureSession {
    /// Acquire the device and build the encoder.
    ///
    /// Fails with `DeviceUnavailable` when the camera cannot be opened.
    pub async fn open(
        engine: &dyn MediaEngine,
        constraints: MediaConstraints,
        format: ChosenFormat,
        preview_surface: Option<&str>,
    ) -> Result<Self, CaptureError> {
        tracing::info!(
            engine = engine.name(),
            width = constraints.video.width,
            height = constraints.video.height,
            audio = constraints.audio,
            "acquiring capture device"
        );

        let mut source = engine.acquire(&constraints).await?;
        if let Some(surface) = preview_surface {
            source.bind_preview(surface);
        }

        let encoder = source.encoder(&format)?;
        tracing::info!(source = %source.description(), format = %format.descriptor(), "capture session ready");

        Ok(Self {
            source,
            encoder,
            sink: ChunkSink::new(),
            state: EncoderState::Inactive,
        })
    }

    /// Start emitting a chunk every `interval`. No-op when already active.
    pub async fn start(&mut self, interval: Duration) -> Result<(), CaptureError> {
        if self.state == EncoderState::Active {
            return Ok(());
        }
        if interval.is_zero() {
            return Err(CaptureError::ZeroInterval);
        }

        self.encoder.start(interval, self.sink.clone()).await?;
        self.state = EncoderState::Active;
        tracing::info!(interval_ms = interval.as_millis() as u64, "encoder started");
        Ok(())
    }

    /// Stop the encoder, flushing its final chunk. No-op when inactive.
    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        if self.state == EncoderState::Inactive {
            return Ok(());
        }

        self.state = EncoderState::Inactive;
        self.encoder.stop().await?;
        tracing::info!(chunks = self.sink.emitted(), "encoder stopped");
        Ok(())
    }

    /// Register the sole consumer of emitted chunks
    pub fn on_chunk<F>(&mut self, handler: F)
    where
        F: FnMut(MediaChunk) + Send + 'static,
    {
        if self.sink.set_handler(Box::new(handler)) {
            tracing::warn!("chunk consumer replaced");
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == EncoderState::Active
    }

    pub fn source_description(&self) -> String {
        self.source.description()
    }
}
