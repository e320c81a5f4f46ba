//! WebSocket transport channel
//!
//! One connection per session. A single task owns the socket: it connects,
//! writes queued outbound messages in FIFO order and decodes inbound frames
//! into [`InboundMessage`]s. Connection progress and failures are
//! reported as [`ChannelEvent`]s carrying [`NetworkError`]s.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::NetworkError;
use crate::network::ConnectionTarget;
use crate::protocol::{Frame, InboundMessage, OutboundMessage};

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    /// Never reached `Open`
    Failed,
}

/// Progress reported by the channel task
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Inbound(InboundMessage),
    /// `reason` is `None` for a locally requested close
    Closed { reason: Option<NetworkError> },
    Failed(NetworkError),
}

#[derive(Debug)]
enum ChannelCommand {
    Send(OutboundMessage),
    Close,
}

/// Channel options
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub readiness_sentinel: String,
    pub connect_timeout: Duration,
}

/// Handle to the socket task
pub struct TransportChannel {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: JoinHandle<()>,
}

impl TransportChannel {
    /// Start connecting in the background. The channel is connecting
    /// until an `Opened` or `Failed` event arrives.
    pub fn open(target: ConnectionTarget, options: ChannelOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tracing::info!(target = %target, "opening channel");
        let task = tokio::spawn(run_channel(target, options, commands_rx, events_tx));

        Self {
            commands: commands_tx,
            events: events_rx,
            task,
        }
    }

    /// Queue a message for the socket writer
    pub fn send(&self, message: OutboundMessage) {
        let kind = message.kind();
        if self.commands.send(ChannelCommand::Send(message)).is_err() {
            tracing::debug!(kind, "channel task gone, message dropped");
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        let _ = self.commands.send(ChannelCommand::Close);
    }

    /// Next progress event; `None` once the task has finished and all
    /// events were consumed
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            let _ = self.commands.send(ChannelCommand::Close);
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
    }
}

async fn run_channel(
    target: ConnectionTarget,
    options: ChannelOptions,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let connect = tokio::time::timeout(
        options.connect_timeout,
        tokio_tungstenite::connect_async(target.as_str()),
    );
    tokio::pin!(connect);

    // A close request while connecting abandons the attempt
    let socket = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(Ok((socket, response))) => {
                    tracing::info!(status = %response.status(), "channel open");
                    break socket;
                }
                Ok(Err(e)) => {
                    tracing::error!("Channel connect failed: {}", e);
                    let _ = events.send(ChannelEvent::Failed(NetworkError::ConnectionFailed(e.to_string())));
                    return;
                }
                Err(_) => {
                    tracing::error!("Channel connect timed out after {:?}", options.connect_timeout);
                    let _ = events.send(ChannelEvent::Failed(NetworkError::Timeout(options.connect_timeout)));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::Send(message)) => {
                    tracing::debug!(kind = message.kind(), "not connected, message dropped");
                }
                Some(ChannelCommand::Close) | None => {
                    tracing::debug!("close requested while connecting");
                    let _ = events.send(ChannelEvent::Closed { reason: None });
                    return;
                }
            },
        }
    };

    let _ = events.send(ChannelEvent::Opened);

    let (mut sink, mut stream) = socket.split();
    let mut sent: u64 = 0;

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ChannelCommand::Send(message)) => {
                    let kind = message.kind();
                    if let Err(e) = sink.send(to_message(message.into_frame())).await {
                        tracing::warn!(kind, "Channel send failed: {}", e);
                        break Some(NetworkError::SendFailed(e.to_string()));
                    }
                    sent += 1;
                    tracing::trace!(kind, sent, "message sent");
                }
                Some(ChannelCommand::Close) | None => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!("close handshake failed: {}", e);
                    }
                    break None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let message = InboundMessage::decode(Frame::Text(text), &options.readiness_sentinel);
                    let _ = events.send(ChannelEvent::Inbound(message));
                }
                Some(Ok(Message::Binary(data))) => {
                    let message = InboundMessage::decode(Frame::Binary(Bytes::from(data)), &options.readiness_sentinel);
                    let _ = events.send(ChannelEvent::Inbound(message));
                }
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    break Some(NetworkError::PeerClosed(detail));
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Channel receive failed: {}", e);
                    break Some(NetworkError::ReceiveFailed(e.to_string()));
                }
                None => break Some(NetworkError::PeerClosed("stream ended".to_string())),
            },
        }
    };

    match &reason {
        Some(e) => tracing::info!(sent, "channel closed: {}", e),
        None => tracing::info!(sent, "channel closed locally"),
    }
    let _ = events.send(ChannelEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_READINESS_SENTINEL;

    fn options(connect_timeout: Duration) -> ChannelOptions {
        ChannelOptions {
            readiness_sentinel: DEFAULT_READINESS_SENTINEL.to_string(),
            connect_timeout,
        }
    }

    #[tokio::test]
    async fn test_refused_connection_reports_connection_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = ConnectionTarget::new(&format!("ws://{}/socket", addr), None).unwrap();
        let mut channel = TransportChannel::open(target, options(Duration::from_secs(5)));

        let event = channel.next_event().await.unwrap();
        assert!(matches!(event, ChannelEvent::Failed(NetworkError::ConnectionFailed(_))));
        assert!(channel.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_silent_server_reports_timeout() {
        // Accepts TCP but never answers the upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let timeout = Duration::from_millis(100);
        let target = ConnectionTarget::new(&format!("ws://{}/socket", addr), None).unwrap();
        let mut channel = TransportChannel::open(target, options(timeout));

        let event = channel.next_event().await.unwrap();
        assert_eq!(event, ChannelEvent::Failed(NetworkError::Timeout(timeout)));
        drop(listener);
    }

    #[tokio::test]
    async fn test_close_while_connecting_is_local() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let target = ConnectionTarget::new(&format!("ws://{}/socket", addr), None).unwrap();
        let mut channel = TransportChannel::open(target, options(Duration::from_secs(5)));
        channel.close();

        let event = channel.next_event().await.unwrap();
        assert_eq!(event, ChannelEvent::Closed { reason: None });
        drop(listener);
    }
}
