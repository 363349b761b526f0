//! Chatwire client - resilient real-time channel for the admin chat
//!
//! This crate provides the runtime infrastructure for the dashboard's chat
//! connection to the platform backend:
//!
//! - **Credentials**: Bearer token access through an injected provider, and
//!   extraction of the routing identity from the token payload
//! - **Endpoint**: Construction of the `/ws/chat/<identity>` WebSocket URL
//!   from the hosting origin
//! - **Transport**: Opening the socket under a handshake timeout guard
//! - **Channel**: Connection lifecycle, keep-alive pulse, inbound dispatch,
//!   and exponential-backoff reconnection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  consumer   │  CLI / dashboard glue, registered message handler
//! └──────┬──────┘
//!        │ connect() / send() / disconnect()
//! ┌──────▼──────┐
//! │ ChatChannel │  lifecycle state machine, keep-alive, reconnect
//! │  ┌────────┐ │
//! │  │ Dispat │ │  pong filtering, callback fan-out
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Backoff│ │  exponential delay + jitter, attempt ceiling
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  tokio-tungstenite WebSocket
//! │  └────────┘ │
//! └─────────────┘
//! ```
//!
//! # Credential injection
//!
//! The channel never reads tokens from ambient storage. A
//! [`CredentialProvider`] is passed in at construction, so the token source
//! is explicit and may hand out a refreshed token between reconnect
//! attempts.

pub mod backoff;
pub mod channel;
pub mod credentials;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod transport;

// Re-export key types at crate root
pub use backoff::{Backoff, BackoffPolicy};
pub use channel::{ChannelConfig, ChatChannel};
pub use credentials::{CredentialProvider, FileCredentials, StaticCredentials, TokenClaims};
pub use dispatcher::{Dispatcher, MessageHandler};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
