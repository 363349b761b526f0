//! Frame shapes exchanged over the chat channel.
//!
//! Every frame is a JSON object with a `type` discriminator. The client owns
//! two outbound control shapes (keep-alive ping and typing presence); all
//! other outbound traffic is caller-supplied JSON sent through the channel
//! unchanged. Inbound traffic is classified just far enough to consume the
//! reserved `pong` acknowledgment - everything else belongs to the
//! application.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control frames the client emits on its own behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Keep-alive pulse. Sent periodically while the connection is open so
    /// intermediary proxies and load balancers do not idle the socket out.
    Ping,
    /// Presence signal shown to the customer while the admin is composing.
    Typing { telegram_id: i64 },
}

/// Classification of one inbound text payload.
///
/// The channel consumes keep-alive acknowledgments internally; every other
/// well-formed payload is application data and is forwarded to the consumer
/// exactly as it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Keep-alive acknowledgment (`{"type":"pong"}`). Reserved.
    Pong,
    /// Application frame, passed through unmodified.
    Application(Value),
}

impl InboundFrame {
    /// Classifies an already-parsed payload.
    ///
    /// Only the `type` field is inspected; a payload without one is still
    /// application data.
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("pong") => InboundFrame::Pong,
            _ => InboundFrame::Application(value),
        }
    }

    /// Parses and classifies a raw text payload.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<Value>(text).map(Self::from_value)
    }
}
