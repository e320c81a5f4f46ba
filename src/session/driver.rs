//! Session driver
//!
//! A single task owns the state machine, the capture session, the channel
//! and the playback handoff. Triggers, chunks and channel events reach it
//! through FIFO queues, so the gate and connection state are never touched
//! concurrently and chunks leave in emission order.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::capture::{CaptureSession, MediaChunk, MediaConstraints, MediaEngine};
use crate::codec::{negotiate_with_report, NegotiationReport};
use crate::config::AppConfig;
use crate::error::{Result, SessionError};
use crate::network::{ChannelEvent, ChannelOptions, ConnectionState, ConnectionTarget, TransportChannel};
use crate::playback::{PlaybackHandoff, Player};
use crate::session::state::{Command, Relay, SessionMachine, SessionState};
use crate::session::SessionStatus;

const TRIGGER_QUEUE: usize = 16;

enum Trigger {
    Record(oneshot::Sender<std::result::Result<(), SessionError>>),
    Stop(oneshot::Sender<std::result::Result<(), SessionError>>),
}

/// Cloneable handle used by the control API and the CLI
#[derive(Clone)]
pub struct SessionHandle {
    triggers: mpsc::Sender<Trigger>,
    status: watch::Receiver<SessionStatus>,
    negotiation: Arc<NegotiationReport>,
}

impl SessionHandle {
    /// Arm the forwarding gate and start the encoder
    pub async fn record(&self) -> std::result::Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.triggers
            .send(Trigger::Record(reply_tx))
            .await
            .map_err(|_| SessionError::DriverGone)?;
        reply_rx.await.map_err(|_| SessionError::DriverGone)?
    }

    /// Stop capture and terminate the channel
    pub async fn stop(&self) -> std::result::Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.triggers
            .send(Trigger::Stop(reply_tx))
            .await
            .map_err(|_| SessionError::DriverGone)?;
        reply_rx.await.map_err(|_| SessionError::DriverGone)?
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn negotiation(&self) -> &NegotiationReport {
        &self.negotiation
    }

    /// Wait until a status satisfies `predicate`; `None` if the driver ended first
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let status = rx.wait_for(|s| predicate(s)).await.ok()?;
        Some(status.clone())
    }

    /// Wait for the channel to leave `Connecting`
    pub async fn wait_for_connection(&self) -> ConnectionState {
        match self
            .wait_for(|s| s.connection != ConnectionState::Connecting)
            .await
        {
            Some(status) => status.connection,
            None => self.status().connection,
        }
    }
}

/// Runs one relay session
pub struct SessionDriver {
    machine: SessionMachine,
    capture: CaptureSession,
    channel: TransportChannel,
    channel_done: bool,
    handoff: PlaybackHandoff,
    chunk_interval: Duration,
    chunks: mpsc::UnboundedReceiver<MediaChunk>,
    triggers: mpsc::Receiver<Trigger>,
    status_tx: watch::Sender<SessionStatus>,
    status: SessionStatus,
}

impl SessionDriver {
    /// Build the pipeline in dependency order and spawn the driver.
    ///
    /// Negotiation and device acquisition complete before any connection
    /// is attempted; either failing aborts with nothing left running.
    pub async fn launch(
        config: &AppConfig,
        engine: &dyn MediaEngine,
        player: Box<dyn Player>,
    ) -> Result<(SessionHandle, JoinHandle<()>)> {
        let candidates = config.formats.candidates();
        let (chosen, report) = negotiate_with_report(&candidates, |d| engine.is_type_supported(d));
        let format = chosen?;

        let preview = config
            .capture
            .preview
            .then_some(config.capture.preview_surface.as_str());
        let mut capture = CaptureSession::open(
            engine,
            MediaConstraints::from_config(&config.capture),
            format.clone(),
            preview,
        )
        .await?;

        let target = ConnectionTarget::new(&config.channel.endpoint, config.channel.csrf_token.as_deref())?;
        let handoff = PlaybackHandoff::from_config(&config.playback, &target, player)?;

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        capture.on_chunk(move |chunk| {
            let _ = chunk_tx.send(chunk);
        });

        let channel = TransportChannel::open(
            target,
            ChannelOptions {
                readiness_sentinel: config.playback.readiness_sentinel.clone(),
                connect_timeout: config.channel.connect_timeout(),
            },
        );

        let machine = SessionMachine::new(format.label());
        let status = SessionStatus::new(
            Uuid::new_v4(),
            capture.source_description(),
            &format,
            handoff.manifest_url().to_string(),
        );
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE);

        let driver = SessionDriver {
            machine,
            capture,
            channel,
            channel_done: false,
            handoff,
            chunk_interval: config.capture.chunk_interval(),
            chunks: chunk_rx,
            triggers: trigger_rx,
            status_tx,
            status,
        };

        let handle = SessionHandle {
            triggers: trigger_tx,
            status: status_rx,
            negotiation: Arc::new(report),
        };

        let task = tokio::spawn(driver.run());
        Ok((handle, task))
    }

    /// Event loop. Ends once stopped and the channel task has finished.
    pub async fn run(mut self) {
        tracing::info!(session = %self.status.session_id, format = %self.machine.label(), "session started");
        self.publish();

        loop {
            tokio::select! {
                biased;

                trigger = self.triggers.recv() => match trigger {
                    Some(Trigger::Record(reply)) => {
                        let result = self.record().await;
                        let _ = reply.send(result);
                    }
                    Some(Trigger::Stop(reply)) => {
                        self.stop().await;
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        tracing::debug!("all session handles dropped");
                        self.stop().await;
                        break;
                    }
                },
                event = self.channel.next_event(), if !self.channel_done => match event {
                    Some(event) => self.on_channel_event(event).await,
                    None => self.channel_done = true,
                },
                Some(chunk) = self.chunks.recv() => self.on_chunk(chunk),
            }

            self.publish();

            if self.machine.state() == SessionState::Stopped && self.channel_done {
                break;
            }
        }

        self.publish();
        let counters = self.machine.counters();
        tracing::info!(
            session = %self.status.session_id,
            relayed = counters.relayed,
            dropped = counters.dropped_gate + counters.dropped_not_open + counters.dropped_empty,
            "session ended"
        );
    }

    async fn record(&mut self) -> std::result::Result<(), SessionError> {
        let commands = self.machine.arm()?;
        if let Err(e) = self.execute(commands).await {
            self.machine.encoder_failed();
            self.status.last_error = Some(e.to_string());
            return Err(e);
        }

        if self.status.armed_at.is_none() {
            self.status.armed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn stop(&mut self) {
        if self.machine.state() == SessionState::Stopped {
            return;
        }

        // Flush the encoder first so its tail goes out ahead of the sentinel
        if self.machine.is_armed() {
            if let Err(e) = self.capture.stop().await {
                tracing::warn!("Encoder stop failed: {}", e);
                self.status.last_error = Some(e.to_string());
            }
            while let Ok(chunk) = self.chunks.try_recv() {
                self.on_chunk(chunk);
            }
        }

        let commands = self.machine.stop();
        self.status.stopped_at = Some(Utc::now());
        self.execute_logged(commands).await;
    }

    fn on_chunk(&mut self, chunk: MediaChunk) {
        let sequence = chunk.sequence;
        match self.machine.on_chunk(chunk) {
            Relay::Send(message) => self.channel.send(message),
            Relay::Drop(reason) => tracing::debug!(sequence, ?reason, "chunk dropped"),
        }
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                let commands = self.machine.channel_opened();
                self.execute_logged(commands).await;
            }
            ChannelEvent::Inbound(message) => {
                let commands = self.machine.on_inbound(message);
                self.execute_logged(commands).await;
            }
            ChannelEvent::Closed { reason } => {
                if self.machine.state() != SessionState::Stopped {
                    match &reason {
                        Some(e) => tracing::warn!("Channel lost, relay offline: {}", e),
                        None => tracing::warn!("Channel closed, relay offline"),
                    }
                    self.status.last_error = reason.map(|e| e.to_string());
                }
                self.machine.channel_closed();
            }
            ChannelEvent::Failed(error) => {
                tracing::error!("Channel could not be established: {}", error);
                self.status.last_error = Some(error.to_string());
                self.machine.channel_failed(error.to_string());
            }
        }
    }

    /// Carry out commands in order. An encoder start failure aborts the
    /// remaining commands.
    async fn execute(&mut self, commands: Vec<Command>) -> std::result::Result<(), SessionError> {
        for command in commands {
            match command {
                Command::Send(message) => self.channel.send(message),
                Command::StartEncoder => {
                    if let Err(e) = self.capture.start(self.chunk_interval).await {
                        tracing::error!("Failed to start encoder: {}", e);
                        return Err(SessionError::Capture(e.to_string()));
                    }
                }
                Command::StopEncoder => {
                    if let Err(e) = self.capture.stop().await {
                        tracing::warn!("Encoder stop failed: {}", e);
                    }
                }
                Command::CloseChannel => self.channel.close(),
                Command::ShowVisual(visual) => tracing::info!(?visual, "display state changed"),
                Command::StartPlayback => match self.handoff.on_ready().await {
                    Ok(true) => tracing::info!(manifest = %self.handoff.manifest_url(), "playback started"),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Playback handoff failed: {}", e);
                        self.status.last_error = Some(e.to_string());
                    }
                },
            }
        }
        Ok(())
    }

    async fn execute_logged(&mut self, commands: Vec<Command>) {
        if let Err(e) = self.execute(commands).await {
            self.status.last_error = Some(e.to_string());
        }
    }

    fn publish(&mut self) {
        self.status.state = self.machine.state();
        self.status.visual = self.machine.visual();
        self.status.connection = self.machine.connection();
        self.status.encoder_active = self.capture.is_active();
        self.status.playback_initialized = self.handoff.is_initialized();
        self.status.counters = self.machine.counters().clone();
        self.status.offline = matches!(
            self.status.connection,
            ConnectionState::Closed | ConnectionState::Failed
        ) && self.status.state != SessionState::Stopped;

        self.status_tx.send_replace(self.status.clone());
    }
}
