//! Error types for the chat channel client.

use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chat channel client.
///
/// A missing credential and errors on an established connection never
/// surface as values: the former makes `connect()` a logged no-op, and the
/// latter feed the reconnection machinery.
#[derive(Debug, Error)]
pub enum Error {
    /// The bearer credential could not be decoded.
    #[error("Invalid bearer credential: {0}")]
    InvalidCredential(String),

    /// The configured origin is not a usable http(s)/ws(s) URL.
    #[error("Invalid channel origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    /// Failed to establish the transport connection.
    #[error("Failed to connect to chat endpoint: {0}")]
    ConnectFailed(String),

    /// The transport did not reach the open state in time.
    #[error("Connection attempt timed out after {0}ms")]
    ConnectTimeout(u64),

    /// Automatic reconnection gave up after the configured attempt ceiling.
    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

impl Error {
    /// Returns true if this is a credential problem the consumer can fix by
    /// re-authenticating.
    pub fn is_credential(&self) -> bool {
        matches!(self, Error::InvalidCredential(_))
    }
}
