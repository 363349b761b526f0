//! Inbound frame dispatch.
//!
//! The dispatcher sits between the transport and the consumer: it parses raw
//! text payloads, consumes the reserved keep-alive acknowledgment, and
//! forwards every application frame to the registered callback in transport
//! delivery order. Dispatch never fails - a malformed payload is logged and
//! dropped, it does not close the connection.

use chatwire_protocol::InboundFrame;
use serde_json::Value;
use std::sync::Arc;

/// Callback invoked with every application frame.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Routes inbound text payloads to the registered handler.
#[derive(Clone)]
pub struct Dispatcher {
    handler: MessageHandler,
}

impl Dispatcher {
    pub fn new(handler: MessageHandler) -> Self {
        Self { handler }
    }

    /// Parses and routes one inbound text payload.
    pub fn dispatch_text(&self, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Pong) => {
                tracing::trace!("keep-alive acknowledged");
            }
            Ok(InboundFrame::Application(value)) => (self.handler)(value),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed inbound frame");
            }
        }
    }
}
