//! Relay session state machine
//!
//! Pure and synchronous: every input returns the commands the driver has
//! to carry out, in order. The forwarding gate is encoded in the state
//! (`Armed`/`Streaming`), so streaming without arming cannot be expressed.
//!
//! ```text
//! Idle ──record──▶ Armed ◀──channel closed── Streaming
//!   │                │ ──channel open──────▶    │
//!   │                │                          │
//!   └──────stop──────┴──────────stop────────────┴──▶ Stopped
//!
//! Preview ──record──▶ Waiting ──playlist_ready──▶ Playing
//! ```

use serde::Serialize;

use crate::capture::MediaChunk;
use crate::error::SessionError;
use crate::network::ConnectionState;
use crate::protocol::{InboundMessage, OutboundMessage};

/// Forwarding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    /// Gate armed, channel not open
    Armed,
    /// Gate armed, channel open
    Streaming,
    Stopped,
}

/// What the display shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualState {
    Preview,
    Waiting,
    Playing,
}

/// Side effects requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(OutboundMessage),
    StartEncoder,
    StopEncoder,
    CloseChannel,
    ShowVisual(VisualState),
    StartPlayback,
}

/// Why a chunk was not relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    GateClosed,
    NotOpen,
}

/// Verdict for one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum Relay {
    Send(OutboundMessage),
    Drop(DropReason),
}

/// Relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    pub relayed: u64,
    pub relayed_bytes: u64,
    pub dropped_empty: u64,
    pub dropped_gate: u64,
    pub dropped_not_open: u64,
}

pub struct SessionMachine {
    label: String,
    state: SessionState,
    visual: VisualState,
    connection: ConnectionState,
    stop_sent: bool,
    playback_started: bool,
    connect_error: Option<String>,
    counters: RelayCounters,
}

impl SessionMachine {
    /// `label` is the short content type announced in the handshake
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: SessionState::Idle,
            visual: VisualState::Preview,
            connection: ConnectionState::Connecting,
            stop_sent: false,
            playback_started: false,
            connect_error: None,
            counters: RelayCounters::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn visual(&self) -> VisualState {
        self.visual
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn counters(&self) -> &RelayCounters {
        &self.counters
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn connect_error(&self) -> Option<&str> {
        self.connect_error.as_deref()
    }

    /// Forwarding gate
    pub fn is_armed(&self) -> bool {
        matches!(self.state, SessionState::Armed | SessionState::Streaming)
    }

    /// The socket connected: announce the format before anything else
    pub fn channel_opened(&mut self) -> Vec<Command> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        self.connection = ConnectionState::Open;
        self.stop_sent = false;
        if self.state == SessionState::Armed {
            self.state = SessionState::Streaming;
        }

        vec![Command::Send(OutboundMessage::handshake(self.label.clone()))]
    }

    /// The socket closed or dropped after having been open
    pub fn channel_closed(&mut self) {
        self.connection = ConnectionState::Closed;
        if self.state == SessionState::Streaming {
            self.state = SessionState::Armed;
        }
    }

    /// The socket never opened. Arming becomes impossible.
    pub fn channel_failed(&mut self, reason: impl Into<String>) {
        self.connection = ConnectionState::Failed;
        self.connect_error = Some(reason.into());
        if self.state == SessionState::Streaming {
            self.state = SessionState::Armed;
        }
    }

    /// Record trigger: open the gate and make sure the encoder runs
    pub fn arm(&mut self) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Stopped => Err(SessionError::Stopped),
            SessionState::Armed | SessionState::Streaming => Ok(vec![Command::StartEncoder]),
            SessionState::Idle => {
                if self.connection == ConnectionState::Failed {
                    return Err(SessionError::ConnectionFailure(
                        self.connect_error.clone().unwrap_or_default(),
                    ));
                }

                self.state = if self.connection == ConnectionState::Open {
                    SessionState::Streaming
                } else {
                    SessionState::Armed
                };

                let mut commands = vec![Command::StartEncoder];
                if self.visual == VisualState::Preview {
                    self.visual = VisualState::Waiting;
                    commands.push(Command::ShowVisual(VisualState::Waiting));
                }
                Ok(commands)
            }
        }
    }

    /// The encoder could not start: close the gate again
    pub fn encoder_failed(&mut self) {
        if self.is_armed() {
            self.state = SessionState::Idle;
        }
        if self.visual == VisualState::Waiting {
            self.visual = VisualState::Preview;
        }
    }

    /// Decide whether a freshly emitted chunk goes out
    pub fn on_chunk(&mut self, chunk: MediaChunk) -> Relay {
        if chunk.is_empty() {
            self.counters.dropped_empty += 1;
            return Relay::Drop(DropReason::Empty);
        }

        if !self.is_armed() {
            self.counters.dropped_gate += 1;
            return Relay::Drop(DropReason::GateClosed);
        }

        if self.connection != ConnectionState::Open {
            self.counters.dropped_not_open += 1;
            return Relay::Drop(DropReason::NotOpen);
        }

        self.counters.relayed += 1;
        self.counters.relayed_bytes += chunk.len() as u64;
        Relay::Send(OutboundMessage::DataChunk(chunk))
    }

    /// Stop trigger: stop the encoder, send the sentinel, close
    pub fn stop(&mut self) -> Vec<Command> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        self.state = SessionState::Stopped;
        let mut commands = vec![Command::StopEncoder];

        if self.connection == ConnectionState::Open && !self.stop_sent {
            self.stop_sent = true;
            commands.push(Command::Send(OutboundMessage::Stop));
        }

        commands.push(Command::CloseChannel);
        if self.connection != ConnectionState::Failed {
            self.connection = ConnectionState::Closed;
        }
        commands
    }

    /// Server message. Only an exact readiness signal has an effect,
    /// and only the first one.
    pub fn on_inbound(&mut self, message: InboundMessage) -> Vec<Command> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        match message {
            InboundMessage::ReadinessSignal if !self.playback_started => {
                self.playback_started = true;
                self.visual = VisualState::Playing;
                vec![Command::ShowVisual(VisualState::Playing), Command::StartPlayback]
            }
            InboundMessage::ReadinessSignal => Vec::new(),
            InboundMessage::Unknown(frame) => {
                tracing::debug!(len = frame.len(), "unhandled inbound message");
                Vec::new()
            }
        }
    }
}
