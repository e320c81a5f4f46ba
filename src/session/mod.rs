//! Relay session: state machine, driver and observable status

pub mod driver;
pub mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::codec::ChosenFormat;
use crate::network::ConnectionState;

pub use driver::{SessionDriver, SessionHandle};
pub use state::{Command, DropReason, Relay, RelayCounters, SessionMachine, SessionState, VisualState};

/// Snapshot published after every driver step
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub visual: VisualState,
    pub connection: ConnectionState,
    /// Connection lost or never established while the session is live
    pub offline: bool,
    /// Capture device(s) feeding the encoder
    pub source: String,
    pub format: String,
    pub mimetype: String,
    pub encoder_active: bool,
    pub manifest_url: String,
    pub playback_initialized: bool,
    pub counters: RelayCounters,
    pub started_at: DateTime<Utc>,
    pub armed_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn new(session_id: Uuid, source: String, format: &ChosenFormat, manifest_url: String) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            visual: VisualState::Preview,
            connection: ConnectionState::Connecting,
            offline: false,
            source,
            format: format.descriptor().to_string(),
            mimetype: format.label().to_string(),
            encoder_active: false,
            manifest_url,
            playback_initialized: false,
            counters: RelayCounters::default(),
            started_at: Utc::now(),
            armed_at: None,
            stopped_at: None,
            last_error: None,
        }
    }
}
