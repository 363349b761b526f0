//! Bearer credential access and routing identity extraction.
//!
//! The dashboard authenticates the chat channel with the same bearer token
//! it uses for the REST API. The channel does not verify the token - that is
//! the backend's job - but it does decode the payload segment to learn the
//! identity claim used to route the connection (`/ws/chat/<identity>`).

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use std::path::PathBuf;

/// Source of the bearer token used to authenticate the channel.
///
/// Injected into [`ChatChannel`](crate::channel::ChatChannel) at
/// construction. Called on every connection attempt, so a provider may hand
/// out a refreshed token between reconnects.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current bearer token, if one is available.
    fn bearer_token(&self) -> Option<String>;
}

/// Provider backed by a fixed token captured at startup.
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    /// Provider that always hands out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Provider with no credential; `connect()` becomes a logged no-op.
    pub fn empty() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Provider that reads the token from a file on every attempt.
///
/// The CLI analogue of the dashboard's session storage: an external login
/// flow writes the token, and a refresh is picked up by the next reconnect
/// without restarting the consumer.
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for FileCredentials {
    fn bearer_token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read token file"
                );
                None
            }
        }
    }
}

/// Claims carried in the bearer token payload.
///
/// Unknown claims are ignored; only the fields that can serve as the routing
/// identity are decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Telegram account the admin session is bound to.
    pub telegram_id: Option<i64>,
    /// Standard subject claim, used when no `telegram_id` is present.
    pub sub: Option<String>,
}

impl TokenClaims {
    /// Routing identity for endpoint construction, preferring `telegram_id`.
    pub fn identity(&self) -> Option<String> {
        self.telegram_id
            .map(|id| id.to_string())
            .or_else(|| self.sub.clone())
    }
}

/// Decodes the claims from the payload segment of a JWT-shaped token.
///
/// Splits on `.`, base64url-decodes the middle segment, and deserializes the
/// claims object. No signature verification is performed.
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::InvalidCredential("token is not JWT-shaped".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidCredential(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidCredential(format!("payload is not a claims object: {e}")))
}

/// Extracts the routing identity from a bearer token.
pub fn identity_from_token(token: &str) -> Result<String> {
    decode_claims(token)?.identity().ok_or_else(|| {
        Error::InvalidCredential("no identity claim (telegram_id or sub)".to_string())
    })
}
