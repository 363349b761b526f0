//! The resilient chat channel.
//!
//! This module implements the connection lifecycle on top of the transport.
//! It handles:
//! - Opening and authenticating the connection (`connect()`)
//! - The keep-alive pulse while the connection is open
//! - Dispatching inbound frames to the registered handler
//! - Reconnection with exponential backoff after abnormal closures
//!
//! # Lifecycle
//!
//! ```text
//! IDLE ──connect()──▶ CONNECTING ──open──▶ OPEN
//!                         │                 │
//!                         │ failure         │ close
//!                         ▼                 ▼
//!                     backoff ◀──abnormal── CLOSED ──intentional──▶ (done)
//! ```
//!
//! At most one live transport handle exists per channel: every `connect()`
//! and `disconnect()` bumps a generation counter, and any task belonging to
//! an older generation (a pending backoff timer, an in-flight handshake, a
//! reader for a superseded socket) stands down when it observes the bump.
//! This makes backoff timers explicitly cancellable instead of merely
//! suppressed, so a manual `connect()` during a backoff window cannot race
//! into a double connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::credentials::{CredentialProvider, identity_from_token};
use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport;
use chatwire_protocol::OutboundFrame;

/// Tunables for one channel. Defaults are the production constants.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Origin the hosting dashboard is served from, e.g.
    /// `https://admin.example.com`. Scheme selects `ws` vs `wss`.
    pub origin: String,
    /// Keep-alive pulse period while the connection is open.
    pub keepalive_interval: Duration,
    /// Handshake guard; attempts that take longer are force-failed.
    pub connect_timeout: Duration,
    /// Reconnect policy applied after abnormal closures.
    pub backoff: BackoffPolicy,
}

impl ChannelConfig {
    /// Config with production defaults for the given origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            keepalive_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Connection lifecycle. One state at a time, owned by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Handles for one established connection.
struct Live {
    outbound: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

struct Inner {
    config: ChannelConfig,
    credentials: Arc<dyn CredentialProvider>,
    dispatcher: Dispatcher,
    lifecycle: Mutex<Lifecycle>,
    live: Mutex<Option<Live>>,
    backoff: Mutex<Backoff>,
    /// Set by `disconnect()`; checked before any automatic reconnect.
    intentional: AtomicBool,
    /// Bumped by `connect()` and `disconnect()`. Watch-based so pending
    /// backoff timers can be cancelled rather than left to fire into a no-op.
    generation: watch::Sender<u64>,
    connected: watch::Sender<bool>,
}

/// Resilient WebSocket channel for the admin chat.
///
/// Owns a single transport handle, authenticates it with a bearer credential
/// from the injected provider, keeps it alive with a periodic ping, and
/// reconnects with exponential backoff when the connection drops abnormally.
/// Cloning is cheap and all clones drive the same connection.
#[derive(Clone)]
pub struct ChatChannel {
    inner: Arc<Inner>,
}

impl ChatChannel {
    /// Creates a channel. `handler` receives every application frame in
    /// transport delivery order; keep-alive acknowledgments never reach it.
    pub fn new(
        config: ChannelConfig,
        credentials: Arc<dyn CredentialProvider>,
        handler: MessageHandler,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        let (generation, _) = watch::channel(0u64);
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                dispatcher: Dispatcher::new(handler),
                lifecycle: Mutex::new(Lifecycle::Idle),
                live: Mutex::new(None),
                backoff: Mutex::new(backoff),
                intentional: AtomicBool::new(false),
                generation,
                connected,
            }),
        }
    }

    /// Opens the channel.
    ///
    /// A missing credential makes this a logged no-op - the dashboard calls
    /// `connect()` before login and simply has no chat until a token exists.
    /// Configuration problems (unusable origin, undecodable credential) are
    /// returned as errors. Transport failures after validation never surface
    /// here; they feed the reconnection machinery instead.
    ///
    /// Calling `connect()` while a connection is live or a reconnect is
    /// pending supersedes them: the old handle is closed and any scheduled
    /// retry is cancelled.
    pub async fn connect(&self) -> Result<()> {
        let Some(token) = self.inner.credentials.bearer_token() else {
            tracing::warn!("no bearer credential available; chat channel stays disconnected");
            return Ok(());
        };
        let identity = identity_from_token(&token)?;
        let endpoint = Endpoint::chat(&self.inner.config.origin, &identity)?;

        self.inner.intentional.store(false, Ordering::SeqCst);
        self.inner.backoff.lock().reset();
        let generation = self.inner.supersede();
        self.inner.set_connected(false);

        Inner::attempt(Arc::clone(&self.inner), endpoint, generation).await;
        Ok(())
    }

    /// Serializes `data` and queues it on the open connection.
    ///
    /// Returns `false` without writing anything when the channel is not
    /// open. Serialization and transport errors are logged, never raised.
    pub fn send<T: Serialize>(&self, data: &T) -> bool {
        if *self.inner.lifecycle.lock() != Lifecycle::Open {
            tracing::debug!("chat send skipped; channel is not open");
            return false;
        }
        let text = match serde_json::to_string(data) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound chat frame");
                return false;
            }
        };
        match self.inner.live.lock().as_ref() {
            Some(live) => live.outbound.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Closes the channel and suppresses automatic reconnection.
    ///
    /// Cancels any pending backoff timer, stops the keep-alive pulse, sends
    /// a normal-closure frame, and releases the handle. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.intentional.store(true, Ordering::SeqCst);
        // Bump and take under the live lock so an in-flight install cannot
        // publish a handle between the two.
        let live = {
            let mut slot = self.inner.live.lock();
            self.inner.bump_generation();
            slot.take()
        };
        *self.inner.lifecycle.lock() = Lifecycle::Closed;
        self.inner.set_connected(false);

        if let Some(live) = live {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            }));
            let _ = live.outbound.send(close);
            // Dropping the sender lets the writer drain the close frame and
            // exit on its own; the reader is simply torn down.
            drop(live.outbound);
            live.reader.abort();
            let _ = tokio::time::timeout(Duration::from_secs(1), live.writer).await;
        }
        tracing::info!("chat channel disconnected");
    }

    /// True iff a transport handle exists and is in the open state.
    pub fn is_connected(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Open
    }

    /// Waits until the channel reports open, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.inner.connected.subscribe();
        tokio::time::timeout(timeout, connected.wait_for(|open| *open))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Reconnect attempts consumed since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.backoff.lock().attempt()
    }
}

impl Inner {
    fn bump_generation(&self) -> u64 {
        let mut bumped = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            bumped = *g;
        });
        bumped
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    fn set_connected(&self, open: bool) {
        self.connected.send_replace(open);
    }

    /// Bumps the generation and aborts the live connection, if any, under
    /// one lock. An install racing a `connect()` therefore either publishes
    /// before the bump (and its handles are aborted here) or observes the
    /// new generation and discards its socket; a handle can never slip
    /// through in between.
    fn supersede(&self) -> u64 {
        let mut slot = self.live.lock();
        let generation = self.bump_generation();
        if let Some(live) = slot.take() {
            live.writer.abort();
            live.reader.abort();
        }
        generation
    }

    /// One connection attempt. On success the connection is installed; on
    /// failure the next retry is scheduled.
    async fn attempt(inner: Arc<Inner>, endpoint: Endpoint, generation: u64) {
        *inner.lifecycle.lock() = Lifecycle::Connecting;
        tracing::info!(endpoint = %endpoint, "connecting chat channel");

        match transport::open(&endpoint, inner.config.connect_timeout).await {
            Ok(stream) => Inner::install(inner, stream, endpoint, generation),
            Err(e) => {
                tracing::error!(error = %e, "chat connection attempt failed");
                if inner.is_current(generation) && !inner.intentional.load(Ordering::SeqCst) {
                    Inner::schedule_reconnect(inner, endpoint, generation);
                }
            }
        }
    }

    /// Installs an open connection: spawns the writer task (sole owner of
    /// the sink half) and the reader task (inbound dispatch plus the
    /// keep-alive pulse).
    ///
    /// The supersede check and the handle publication happen under the live
    /// lock. A `connect()` or `disconnect()` that lands while the handshake
    /// was in flight either bumps the generation before the check (and this
    /// socket is discarded) or waits on the lock and then aborts exactly the
    /// handles published here. A stale socket can never stay installed.
    fn install(inner: Arc<Inner>, stream: transport::WsStream, endpoint: Endpoint, generation: u64) {
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let mut slot = inner.live.lock();
        if !inner.is_current(generation) || inner.intentional.load(Ordering::SeqCst) {
            // Dropping the stream halves closes the stale handle.
            tracing::debug!("discarding superseded chat connection");
            return;
        }
        inner.backoff.lock().reset();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::error!(error = %e, "chat transport write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pulse_tx = outbound_tx.clone();
        let reader_inner = Arc::clone(&inner);
        let reader_endpoint = endpoint.clone();
        let reader = tokio::spawn(async move {
            let ping = serde_json::to_string(&OutboundFrame::Ping)
                .expect("ping frame always serializes");
            let mut pulse = tokio::time::interval(reader_inner.config.keepalive_interval);
            pulse.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the pulse starts one
            // interval after open.
            pulse.tick().await;

            let close_code = loop {
                tokio::select! {
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            reader_inner.dispatcher.dispatch_text(&text);
                        }
                        Some(Ok(Message::Close(frame))) => break frame.map(|f| f.code),
                        Some(Ok(_)) => {
                            // Binary payloads and protocol-level ping/pong
                            // carry no chat frames.
                        }
                        Some(Err(e)) => {
                            // Logged here; the closed stream that follows is
                            // the authoritative reconnect trigger.
                            tracing::error!(error = %e, "chat transport error");
                            break None;
                        }
                        None => break None,
                    },
                    _ = pulse.tick() => {
                        if pulse_tx.send(Message::Text(ping.clone())).is_err() {
                            // Writer is gone; treat as a silent death.
                            break None;
                        }
                    }
                }
            };
            Inner::handle_closed(reader_inner, reader_endpoint, generation, close_code);
        });

        *slot = Some(Live {
            outbound: outbound_tx,
            writer,
            reader,
        });
        *inner.lifecycle.lock() = Lifecycle::Open;
        inner.set_connected(true);
        drop(slot);
        tracing::info!(endpoint = %endpoint, "chat channel open");
    }

    /// Runs at the end of every reader task, when the connection has closed
    /// by either side or errored out.
    fn handle_closed(
        inner: Arc<Inner>,
        endpoint: Endpoint,
        generation: u64,
        close_code: Option<CloseCode>,
    ) {
        {
            let mut slot = inner.live.lock();
            if !inner.is_current(generation) {
                // A newer connect() or disconnect() already owns the
                // lifecycle, and this task's handles were aborted with it.
                return;
            }
            // Dropping the handles releases the writer's sender; the
            // keep-alive pulse lived in this task and stops with it.
            drop(slot.take());
            *inner.lifecycle.lock() = Lifecycle::Closed;
            inner.set_connected(false);
        }

        if inner.intentional.load(Ordering::SeqCst) {
            tracing::info!("chat connection closed intentionally");
            return;
        }
        if transport::should_reconnect(close_code) {
            tracing::warn!(code = ?close_code, "chat connection closed abnormally");
            Inner::schedule_reconnect(inner, endpoint, generation);
        } else {
            tracing::info!(code = ?close_code, "chat connection closed by server");
        }
    }

    /// Schedules the next reconnect attempt, or gives up once the attempt
    /// ceiling is reached. The pending timer is cancelled outright if the
    /// generation changes during the backoff window.
    fn schedule_reconnect(inner: Arc<Inner>, endpoint: Endpoint, generation: u64) {
        let delay = inner.backoff.lock().next_delay();
        let Some(delay) = delay else {
            let exhausted = Error::ReconnectExhausted(inner.config.backoff.max_attempts);
            tracing::error!(error = %exhausted, "chat reconnect given up; call connect() to retry");
            return;
        };
        let attempt = inner.backoff.lock().attempt();
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling chat reconnect"
        );

        tokio::spawn(async move {
            let mut generations = inner.generation.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = generations.wait_for(|g| *g != generation) => {
                    tracing::debug!(attempt, "pending chat reconnect cancelled");
                    return;
                }
            }
            if inner.intentional.load(Ordering::SeqCst) || !inner.is_current(generation) {
                return;
            }
            Inner::attempt(inner, endpoint, generation).await;
        });
    }
}
