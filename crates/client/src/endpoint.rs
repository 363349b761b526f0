//! Chat endpoint construction.
//!
//! The channel URL is derived from the origin the dashboard is served from:
//! the scheme follows the origin's security (`https` maps to `wss`, `http`
//! to `ws`), the host and port are preserved, and the routing identity is
//! appended to the fixed `/ws/chat/` path as a percent-encoded segment.

use crate::error::{Error, Result};
use std::fmt;
use url::Url;

/// Resolved WebSocket endpoint for one chat channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Builds the channel endpoint from an origin and a routing identity.
    ///
    /// Accepts `http`, `https`, `ws`, and `wss` origins; any path, query, or
    /// fragment on the origin is discarded. The identity is placed in its own
    /// path segment, so reserved characters are percent-encoded and cannot
    /// escape the `/ws/chat/` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] if the origin does not parse or uses
    /// an unsupported scheme.
    pub fn chat(origin: &str, identity: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidOrigin {
            origin: origin.to_string(),
            reason,
        };

        let mut url = Url::parse(origin).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot apply websocket scheme".to_string()))?;

        url.path_segments_mut()
            .map_err(|_| invalid("origin cannot be a base URL".to_string()))?
            .clear()
            .extend(["ws", "chat", identity]);
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { url })
    }

    /// The endpoint as a string, suitable for the WebSocket handshake.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The parsed endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}
