//! # Camera Relay
//!
//! Live camera capture relayed to a remote ingest endpoint, with a handoff
//! to adaptive playback once the server has packaged the stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               CLIENT                                  │
//! │                                                                       │
//! │  ┌──────────────┐  chosen   ┌──────────────────┐                      │
//! │  │  Negotiator  │──format──▶│  Capture Session │ camera (+ mic)       │
//! │  │   (codec)    │           │    (capture)     │──▶ encoder           │
//! │  └──────────────┘           └────────┬─────────┘                      │
//! │                                      │ chunk every interval            │
//! │                                      ▼                                 │
//! │  control API ── record/stop ──▶ ┌──────────────────┐                  │
//! │  (ui)                           │  Session Driver  │ gate + FSM        │
//! │                                 │    (session)     │                   │
//! │                                 └───┬──────────▲───┘                   │
//! │                        handshake,   │          │ inbound               │
//! │                        chunks, stop ▼          │                       │
//! │                          ┌────────────────────────────┐               │
//! │                          │  Transport Channel (ws)    │               │
//! │                          │       (network)            │               │
//! │                          └─────────────┬──────────────┘               │
//! │  ┌──────────────────┐                  │                              │
//! │  │ Playback Handoff │◀── playlist_ready┘                              │
//! │  │   (playback)     │──▶ player(manifest.mpd)                         │
//! │  └──────────────────┘                                                 │
//! └───────────────────────────────────────┼──────────────────────────────┘
//!                                         │ WebSocket
//!                                         ▼
//!                          remote ingest / packaging service
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default capture width in pixels
    pub const DEFAULT_WIDTH: u32 = 640;

    /// Default capture height in pixels
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Default interval between media chunks
    pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 1000;

    /// Default ingest socket
    pub const DEFAULT_ENDPOINT: &str = "ws://localhost:4000/socket";

    /// Query parameter carrying the session token
    pub const TOKEN_QUERY_PARAM: &str = "csrf_token";

    /// Well-known manifest location on the ingest origin
    pub const DEFAULT_MANIFEST_PATH: &str = "/dash/manifest.mpd";

    /// Default HTTP port for the control API
    pub const DEFAULT_UI_PORT: u16 = 8080;
}
