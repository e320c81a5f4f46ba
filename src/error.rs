//! Error types for the capture relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture subsystem errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to spawn encoder: {0}")]
    EncoderSpawn(String),

    #[error("Encoder failed: {0}")]
    EncoderFailed(String),

    #[error("Encoder does not accept format: {0}")]
    UnsupportedFormat(String),

    #[error("Chunk interval must be non-zero")]
    ZeroInterval,
}

/// Codec negotiation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("No supported format among {tried} candidates")]
    NoSupportedFormat { tried: usize },

    #[error("Malformed format descriptor: {0:?}")]
    MalformedDescriptor(String),
}

/// Network errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed by peer: {0}")]
    PeerClosed(String),

    #[error("Token lookup failed: {0}")]
    TokenLookup(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Session trigger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already stopped")]
    Stopped,

    #[error("Channel never connected: {0}")]
    ConnectionFailure(String),

    #[error("Encoder could not start: {0}")]
    Capture(String),

    #[error("Session driver is no longer running")]
    DriverGone,
}

/// Playback handoff errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Invalid manifest location: {0}")]
    InvalidManifest(String),

    #[error("Failed to launch player: {0}")]
    LaunchFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
