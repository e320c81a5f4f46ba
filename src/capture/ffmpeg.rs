//! FFmpeg capture engine
//!
//! Captures from a v4l2 camera (and optionally an ALSA input) by running
//! ffmpeg with a fragmented container on stdout. The byte stream is cut
//! into one chunk per interval, the same way a browser recorder slices
//! its output.

use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::capture::device::{check_video_device, default_audio_input};
use crate::capture::{ChunkEncoder, ChunkSink, MediaConstraints, MediaEngine, MediaSource};
use crate::codec::{Codec, Container, ChosenFormat, MediaDescriptor};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Read size for the encoder's stdout
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long ffmpeg gets to finalize after `q` before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Encoders and muxers compiled into the local ffmpeg
#[derive(Debug, Clone, Default)]
pub struct FfmpegCapabilities {
    encoders: HashSet<String>,
    muxers: HashSet<String>,
}

impl FfmpegCapabilities {
    /// Ask the ffmpeg binary what it can do. An unusable binary yields
    /// empty capabilities, so nothing negotiates.
    pub fn probe(ffmpeg_path: &str) -> Self {
        let run = |flag: &str| {
            std::process::Command::new(ffmpeg_path)
                .args(["-hide_banner", flag])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .ok()
                .filter(|out| out.status.success())
                .map(|out| String::from_utf8_lossy(&out.stdout).into_owned())
                .unwrap_or_default()
        };

        let capabilities = Self::from_listings(&run("-encoders"), &run("-muxers"));
        if capabilities.encoders.is_empty() {
            tracing::warn!(ffmpeg = ffmpeg_path, "ffmpeg reported no encoders");
        }
        capabilities
    }

    /// Parse `ffmpeg -encoders` and `ffmpeg -muxers` listings
    pub fn from_listings(encoders: &str, muxers: &str) -> Self {
        Self {
            encoders: listing_names(encoders).collect(),
            muxers: listing_names(muxers)
                .flat_map(|n| n.split(',').map(str::to_string).collect::<Vec<_>>())
                .collect(),
        }
    }

    /// Preferred available encoder for a codec
    pub fn encoder_for(&self, codec: Codec) -> Option<&'static str> {
        codec
            .encoders()
            .iter()
            .copied()
            .find(|name| self.encoders.contains(*name))
    }

    pub fn supports(&self, descriptor: &str) -> bool {
        let Ok(parsed) = MediaDescriptor::parse(descriptor) else {
            return false;
        };

        if !self.muxers.contains(parsed.container.muxer()) {
            return false;
        }

        if parsed.codecs.is_empty() {
            return self.encoder_for(default_video_codec(parsed.container)).is_some();
        }

        parsed.codecs.iter().all(|c| self.encoder_for(*c).is_some())
    }
}

/// Entry names after the `--`/`------` separator line of an ffmpeg listing
fn listing_names(listing: &str) -> impl Iterator<Item = String> + '_ {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("--"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
}

fn default_video_codec(container: Container) -> Codec {
    match container {
        Container::Mp4 => Codec::H264,
        Container::WebM => Codec::Vp8,
    }
}

/// Engine backed by the ffmpeg binary
pub struct FfmpegEngine {
    ffmpeg_path: String,
    video_device: PathBuf,
    audio_device: String,
    capabilities: FfmpegCapabilities,
}

impl FfmpegEngine {
    pub fn new(config: &CaptureConfig) -> Self {
        let capabilities = FfmpegCapabilities::probe(&config.ffmpeg_path);
        Self::with_capabilities(config, capabilities)
    }

    pub fn with_capabilities(config: &CaptureConfig, capabilities: FfmpegCapabilities) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            video_device: PathBuf::from(&config.video_device),
            audio_device: config.audio_device.clone(),
            capabilities,
        }
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn is_type_supported(&self, descriptor: &str) -> bool {
        self.capabilities.supports(descriptor)
    }

    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaSource>, CaptureError> {
        let video_device = self.video_device.clone();
        let audio = constraints.audio;

        // Device probing touches the filesystem and the sound server
        tokio::task::spawn_blocking(move || -> Result<(), CaptureError> {
            check_video_device(&video_device)?;
            if audio {
                let input = default_audio_input()?;
                tracing::debug!(input = %input.name, "audio input available");
            }
            Ok(())
        })
        .await
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))??;

        Ok(Box::new(FfmpegSource {
            ffmpeg_path: self.ffmpeg_path.clone(),
            video_device: self.video_device.clone(),
            audio_device: constraints.audio.then(|| self.audio_device.clone()),
            constraints: *constraints,
            capabilities: self.capabilities.clone(),
            preview: None,
        }))
    }
}

struct FfmpegSource {
    ffmpeg_path: String,
    video_device: PathBuf,
    audio_device: Option<String>,
    constraints: MediaConstraints,
    capabilities: FfmpegCapabilities,
    preview: Option<String>,
}

impl MediaSource for FfmpegSource {
    fn description(&self) -> String {
        match &self.audio_device {
            Some(audio) => format!("{} + {}", self.video_device.display(), audio),
            None => self.video_device.display().to_string(),
        }
    }

    fn bind_preview(&mut self, surface: &str) {
        self.preview = Some(surface.to_string());
    }

    fn encoder(&self, format: &ChosenFormat) -> Result<Box<dyn ChunkEncoder>, CaptureError> {
        let descriptor = MediaDescriptor::parse(format.descriptor())
            .map_err(|e| CaptureError::UnsupportedFormat(e.to_string()))?;

        let video_codec = descriptor
            .video_codec()
            .unwrap_or_else(|| default_video_codec(descriptor.container));
        let video_encoder = self
            .capabilities
            .encoder_for(video_codec)
            .ok_or_else(|| CaptureError::UnsupportedFormat(format.descriptor().to_string()))?;

        let audio_encoder = match (&self.audio_device, descriptor.audio_codec()) {
            (Some(_), Some(codec)) => Some(
                self.capabilities
                    .encoder_for(codec)
                    .ok_or_else(|| CaptureError::UnsupportedFormat(format.descriptor().to_string()))?,
            ),
            _ => None,
        };

        let plan = EncodePlan {
            video_device: self.video_device.clone(),
            audio_device: self.audio_device.clone().filter(|_| audio_encoder.is_some()),
            constraints: self.constraints,
            container: descriptor.container,
            video_encoder,
            audio_encoder,
            preview: self.preview.clone(),
        };

        Ok(Box::new(FfmpegEncoder {
            ffmpeg_path: self.ffmpeg_path.clone(),
            plan,
            running: None,
        }))
    }
}

/// Everything needed to build the ffmpeg command line
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub video_device: PathBuf,
    pub audio_device: Option<String>,
    pub constraints: MediaConstraints,
    pub container: Container,
    pub video_encoder: &'static str,
    pub audio_encoder: Option<&'static str>,
    pub preview: Option<String>,
}

impl EncodePlan {
    pub fn args(&self, interval: Duration) -> Vec<String> {
        let video = self.constraints.video;
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "v4l2".into(),
            "-video_size".into(),
            format!("{}x{}", video.width, video.height),
            "-i".into(),
            self.video_device.display().to_string(),
        ];

        if let Some(audio) = &self.audio_device {
            args.extend(["-f".into(), "alsa".into(), "-i".into(), audio.clone()]);
        }

        args.extend(["-map".into(), "0:v".into(), "-c:v".into(), self.video_encoder.into()]);
        match self.video_encoder {
            "libx264" => args.extend(
                ["-preset", "veryfast", "-tune", "zerolatency", "-pix_fmt", "yuv420p"].map(String::from),
            ),
            "libvpx" | "libvpx-vp9" => {
                args.extend(["-deadline", "realtime", "-cpu-used", "8"].map(String::from))
            }
            _ => {}
        }

        // Keyframe per interval so every fragment can start a segment
        args.extend([
            "-force_key_frames".into(),
            format!("expr:gte(t,n_forced*{})", interval.as_secs_f64()),
        ]);

        match (&self.audio_device, self.audio_encoder) {
            (Some(_), Some(encoder)) => {
                args.extend(["-map".into(), "1:a".into(), "-c:a".into(), encoder.into()]);
            }
            _ => args.push("-an".into()),
        }

        match self.container {
            Container::Mp4 => args.extend(
                ["-movflags", "frag_keyframe+empty_moov+default_base_moof", "-f", "mp4"]
                    .map(String::from),
            ),
            Container::WebM => args.extend(["-f", "webm"].map(String::from)),
        }
        args.push("pipe:1".into());

        if let Some(surface) = &self.preview {
            args.extend(
                ["-map", "0:v", "-pix_fmt", "yuv420p", "-f", "sdl"].map(String::from),
            );
            args.push(surface.clone());
        }

        args
    }
}

struct Running {
    child: Child,
    stdin: Option<ChildStdin>,
    pump: JoinHandle<()>,
}

/// Encoder driving an ffmpeg child process
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    plan: EncodePlan,
    running: Option<Running>,
}

#[async_trait]
impl ChunkEncoder for FfmpegEncoder {
    async fn start(&mut self, interval: Duration, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }

        let args = self.plan.args(interval);
        tracing::debug!(ffmpeg = %self.ffmpeg_path, ?args, "spawning encoder");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::EncoderSpawn(format!("{}: {}", self.ffmpeg_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::EncoderSpawn("Failed to capture ffmpeg stdout".into()))?;
        let stdin = child.stdin.take();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "ffmpeg", "{}", line);
                }
            });
        }

        let pump = tokio::spawn(pump_chunks(stdout, interval, sink));

        self.running = Some(Running { child, stdin, pump });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        // `q` asks ffmpeg to finish the current fragment and exit
        if let Some(mut stdin) = running.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(STOP_GRACE, &mut running.pump).await {
            Ok(joined) => joined.map_err(|e| CaptureError::EncoderFailed(e.to_string()))?,
            Err(_) => {
                tracing::warn!("encoder did not exit in time, killing");
                let _ = running.child.start_kill();
                let _ = (&mut running.pump).await;
            }
        }

        match running.child.wait().await {
            Ok(status) => tracing::debug!(%status, "encoder exited"),
            Err(e) => tracing::warn!("Failed to reap encoder: {}", e),
        }
        Ok(())
    }
}

/// Accumulate stdout and emit whatever arrived at each tick; the tail is
/// emitted at end of stream.
async fn pump_chunks(mut stdout: ChildStdout, interval: Duration, sink: ChunkSink) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut pending = BytesMut::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) => {
                    tracing::warn!("encoder output read failed: {}", e);
                    break;
                }
            },
            _ = ticker.tick() => {
                sink.emit(pending.split().freeze(), started.elapsed().as_micros() as u64);
            }
        }
    }

    if !pending.is_empty() {
        sink.emit(pending.split().freeze(), started.elapsed().as_micros() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::format::DEFAULT_CANDIDATES;

    const ENCODERS: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
";

    const MUXERS: &str = "\
File formats:
 D. = Demuxing supported
 .E = Muxing supported
 --
  E mp4             MP4 (MPEG-4 Part 14)
  E webm            WebM
";

    fn capabilities() -> FfmpegCapabilities {
        FfmpegCapabilities::from_listings(ENCODERS, MUXERS)
    }

    #[test]
    fn test_listing_parse() {
        let caps = capabilities();
        assert_eq!(caps.encoder_for(Codec::H264), Some("libx264"));
        assert_eq!(caps.encoder_for(Codec::Opus), Some("libopus"));
        assert_eq!(caps.encoder_for(Codec::Vp9), None);
    }

    #[test]
    fn test_descriptor_support() {
        let caps = capabilities();
        assert!(caps.supports(DEFAULT_CANDIDATES[0]));
        assert!(caps.supports(DEFAULT_CANDIDATES[1]));
        assert!(!caps.supports(DEFAULT_CANDIDATES[2]));
        assert!(caps.supports(DEFAULT_CANDIDATES[3]));
        assert!(!caps.supports(DEFAULT_CANDIDATES[4]));
    }

    #[test]
    fn test_missing_muxer_unsupported() {
        let caps = FfmpegCapabilities::from_listings(ENCODERS, "");
        assert!(!caps.supports(DEFAULT_CANDIDATES[0]));
    }

    #[test]
    fn test_plan_args_mp4_without_audio() {
        let plan = EncodePlan {
            video_device: PathBuf::from("/dev/video0"),
            audio_device: None,
            constraints: MediaConstraints::new(640, 480, false),
            container: Container::Mp4,
            video_encoder: "libx264",
            audio_encoder: None,
            preview: None,
        };

        let args = plan.args(Duration::from_secs(1));
        let joined = args.join(" ");

        assert!(joined.contains("-f v4l2 -video_size 640x480 -i /dev/video0"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-an"));
        assert!(joined.contains("frag_keyframe+empty_moov"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_plan_args_webm_with_audio_and_preview() {
        let plan = EncodePlan {
            video_device: PathBuf::from("/dev/video2"),
            audio_device: Some("default".into()),
            constraints: MediaConstraints::new(1280, 720, true),
            container: Container::WebM,
            video_encoder: "libvpx",
            audio_encoder: Some("libopus"),
            preview: Some("source".into()),
        };

        let joined = plan.args(Duration::from_millis(500)).join(" ");

        assert!(joined.contains("-f alsa -i default"));
        assert!(joined.contains("-map 1:a -c:a libopus"));
        assert!(joined.contains("-f webm pipe:1"));
        assert!(joined.ends_with("-f sdl source"));
        assert!(!joined.contains("-an"));
    }
}
