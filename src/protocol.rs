//! Relay wire protocol
//!
//! One socket carries three outbound message classes in strict order
//! (handshake, data chunks, stop) and inbound server notices. Frames are
//! decoded once at the channel boundary so nothing downstream inspects
//! raw payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capture::MediaChunk;

/// Literal text ending a relay session
pub const STOP_SENTINEL: &str = "stop";

/// Default text announcing that the playlist can be fetched
pub const DEFAULT_READINESS_SENTINEL: &str = "playlist_ready";

/// Control message sent once when the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub mimetype: String,
}

/// Messages the client sends
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Handshake(Handshake),
    DataChunk(MediaChunk),
    Stop,
}

impl OutboundMessage {
    pub fn handshake(label: impl Into<String>) -> Self {
        OutboundMessage::Handshake(Handshake {
            mimetype: label.into(),
        })
    }

    /// Encode into a transport frame
    pub fn into_frame(self) -> Frame {
        match self {
            OutboundMessage::Handshake(handshake) => {
                Frame::Text(serde_json::json!({ "mimetype": handshake.mimetype }).to_string())
            }
            OutboundMessage::DataChunk(chunk) => Frame::Binary(chunk.data),
            OutboundMessage::Stop => Frame::Text(STOP_SENTINEL.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Handshake(_) => "handshake",
            OutboundMessage::DataChunk(_) => "data",
            OutboundMessage::Stop => "stop",
        }
    }
}

/// Messages the server sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    ReadinessSignal,
    Unknown(Frame),
}

impl InboundMessage {
    /// Decode a frame; readiness needs an exact match on the sentinel
    pub fn decode(frame: Frame, readiness_sentinel: &str) -> Self {
        match &frame {
            Frame::Text(text) if text == readiness_sentinel => InboundMessage::ReadinessSignal,
            _ => InboundMessage::Unknown(frame),
        }
    }
}

/// Transport-level payload, independent of the socket library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_shape() {
        let frame = OutboundMessage::handshake("video/webm").into_frame();
        let Frame::Text(text) = frame else {
            panic!("handshake must be text");
        };

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({ "mimetype": "video/webm" }));
    }

    #[test]
    fn test_stop_is_literal_text() {
        assert_eq!(OutboundMessage::Stop.into_frame(), Frame::Text("stop".into()));
    }

    #[test]
    fn test_chunk_is_binary() {
        let chunk = MediaChunk::new(7, Bytes::from_static(b"\x00\x01\x02"));
        assert_eq!(
            OutboundMessage::DataChunk(chunk).into_frame(),
            Frame::Binary(Bytes::from_static(b"\x00\x01\x02"))
        );
    }

    #[test]
    fn test_readiness_requires_exact_match() {
        let ready = InboundMessage::decode(Frame::Text("playlist_ready".into()), DEFAULT_READINESS_SENTINEL);
        assert_eq!(ready, InboundMessage::ReadinessSignal);

        for other in ["playlist_ready ", "PLAYLIST_READY", "ready", ""] {
            let decoded = InboundMessage::decode(Frame::Text(other.into()), DEFAULT_READINESS_SENTINEL);
            assert!(matches!(decoded, InboundMessage::Unknown(_)), "{other:?} decoded as readiness");
        }

        let binary = InboundMessage::decode(
            Frame::Binary(Bytes::from_static(b"playlist_ready")),
            DEFAULT_READINESS_SENTINEL,
        );
        assert!(matches!(binary, InboundMessage::Unknown(Frame::Binary(_))));
    }
}
