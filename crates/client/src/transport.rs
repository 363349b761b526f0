//! WebSocket transport for the chat channel.
//!
//! Thin layer over `tokio-tungstenite`: opening the socket under a handshake
//! timeout guard, and the close-code policy that decides whether a closure
//! was abnormal.

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Live WebSocket stream type used by the channel.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the transport to `endpoint`.
///
/// The handshake runs under `connect_timeout`; an attempt that does not
/// reach the open state in time is force-failed so no connection is left
/// dangling.
///
/// # Errors
///
/// Returns `Error::ConnectTimeout` if the guard fires, or
/// `Error::ConnectFailed` for any handshake failure.
pub async fn open(endpoint: &Endpoint, connect_timeout: Duration) -> Result<WsStream> {
    match tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(Error::ConnectFailed(e.to_string())),
        Err(_) => Err(Error::ConnectTimeout(connect_timeout.as_millis() as u64)),
    }
}

/// Whether a closure with this code should trigger automatic reconnection.
///
/// Normal (1000) and going-away (1001) closures are deliberate shutdowns by
/// the peer. Everything else - including a drop without a close frame -
/// counts as abnormal.
pub fn should_reconnect(code: Option<CloseCode>) -> bool {
    !matches!(code, Some(CloseCode::Normal) | Some(CloseCode::Away))
}
