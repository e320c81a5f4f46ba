//! Synthetic capture engine
//!
//! Produces a deterministic byte pattern instead of camera output. Used by
//! tests and by the `--synthetic` mode of the relay binary to exercise an
//! ingest endpoint without hardware.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::capture::{ChunkEncoder, ChunkSink, MediaConstraints, MediaEngine, MediaSource};
use crate::codec::{ChosenFormat, MediaDescriptor};
use crate::error::CaptureError;

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Engine with an injectable support matrix and device/encoder outcomes
#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    /// Exact descriptors accepted; `None` accepts anything parseable
    supported: Option<Vec<String>>,
    available: bool,
    encoder_starts: bool,
    chunk_size: usize,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self {
            supported: None,
            available: true,
            encoder_starts: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Engine whose device acquisition always fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_supported<I, S>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported = Some(descriptors.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Device acquisition succeeds but every encoder start fails
    pub fn with_broken_encoder(mut self) -> Self {
        self.encoder_starts = false;
        self
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_type_supported(&self, descriptor: &str) -> bool {
        match &self.supported {
            Some(list) => list.iter().any(|d| d == descriptor),
            None => MediaDescriptor::parse(descriptor).is_ok(),
        }
    }

    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaSource>, CaptureError> {
        if !self.available {
            return Err(CaptureError::DeviceUnavailable("synthetic device disabled".into()));
        }

        Ok(Box::new(SyntheticSource {
            constraints: *constraints,
            chunk_size: self.chunk_size,
            encoder_starts: self.encoder_starts,
            preview: None,
        }))
    }
}

struct SyntheticSource {
    constraints: MediaConstraints,
    chunk_size: usize,
    encoder_starts: bool,
    preview: Option<String>,
}

impl MediaSource for SyntheticSource {
    fn description(&self) -> String {
        format!(
            "synthetic {}x{}{}",
            self.constraints.video.width,
            self.constraints.video.height,
            if self.constraints.audio { " +audio" } else { "" }
        )
    }

    fn bind_preview(&mut self, surface: &str) {
        tracing::debug!(surface, "synthetic preview bound");
        self.preview = Some(surface.to_string());
    }

    fn encoder(&self, format: &ChosenFormat) -> Result<Box<dyn ChunkEncoder>, CaptureError> {
        tracing::debug!(format = %format.descriptor(), "synthetic encoder created");
        Ok(Box::new(SyntheticEncoder {
            chunk_size: self.chunk_size,
            starts: self.encoder_starts,
            running: None,
        }))
    }
}

struct Running {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Emits `chunk_size` bytes per interval, plus a partial tail on stop
pub struct SyntheticEncoder {
    chunk_size: usize,
    starts: bool,
    running: Option<Running>,
}

#[async_trait]
impl ChunkEncoder for SyntheticEncoder {
    async fn start(&mut self, interval: Duration, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }
        if !self.starts {
            return Err(CaptureError::EncoderSpawn("synthetic encoder disabled".into()));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let chunk_size = self.chunk_size;

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            let mut last_tick = Instant::now();
            let mut fill: u8 = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        last_tick = Instant::now();
                        sink.emit(Bytes::from(vec![fill; chunk_size]), started.elapsed().as_micros() as u64);
                        fill = fill.wrapping_add(1);
                    }
                    _ = &mut stop_rx => break,
                }
            }

            // Tail proportional to the time since the last full interval
            let fraction = last_tick.elapsed().as_secs_f64() / interval.as_secs_f64();
            let tail = ((chunk_size as f64) * fraction.min(1.0)) as usize;
            if tail > 0 {
                sink.emit(Bytes::from(vec![fill; tail]), started.elapsed().as_micros() as u64);
            }
        });

        self.running = Some(Running { stop_tx, handle });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.stop_tx.send(());
        running
            .handle
            .await
            .map_err(|e| CaptureError::EncoderFailed(e.to_string()))
    }
}

impl Drop for SyntheticEncoder {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::format::DEFAULT_CANDIDATES;

    #[test]
    fn test_support_matrix() {
        let open = SyntheticEngine::new();
        assert!(open.is_type_supported(DEFAULT_CANDIDATES[0]));
        assert!(!open.is_type_supported(DEFAULT_CANDIDATES[2]));

        let narrowed = SyntheticEngine::new().with_supported([DEFAULT_CANDIDATES[4]]);
        assert!(!narrowed.is_type_supported(DEFAULT_CANDIDATES[0]));
        assert!(narrowed.is_type_supported(DEFAULT_CANDIDATES[4]));
    }

    #[tokio::test]
    async fn test_acquire_reports_unavailable() {
        let engine = SyntheticEngine::unavailable();
        let result = engine.acquire(&MediaConstraints::new(640, 480, true)).await;
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }
}
