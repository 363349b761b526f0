//! End-to-end behavior of the resilient channel against a scripted server.
//!
//! Each test runs a real `tokio-tungstenite` accept loop on a loopback port
//! and scripts how the server treats each successive connection (close
//! abnormally, close normally, stay open, serve frames). Backoff timings are
//! compressed through the policy so the suite stays fast; assertions on
//! delays use a generous upper slack to stay robust on loaded machines.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use chatwire_client::{
    BackoffPolicy, ChannelConfig, ChatChannel, MessageHandler, StaticCredentials,
};
use chatwire_protocol::OutboundFrame;

/// How the server treats one accepted connection.
#[derive(Clone)]
enum Script {
    /// Complete the handshake, then close with a non-normal code.
    AbnormalClose,
    /// Complete the handshake, then close normally (1000).
    NormalClose,
    /// Stay open for the given duration, then close abnormally.
    OpenFor(Duration),
    /// Send the given frames, then record inbound frames until the client
    /// goes away.
    Serve(Vec<Value>),
}

#[derive(Default)]
struct ServerLog {
    connections: Mutex<Vec<Instant>>,
    inbound: Mutex<Vec<Value>>,
}

impl ServerLog {
    fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn inbound_types(&self) -> Vec<String> {
        self.inbound
            .lock()
            .iter()
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

/// Spawns a server that applies `scripts` to successive connections,
/// repeating the last script once the list runs out.
async fn spawn_server(scripts: Vec<Script>) -> (SocketAddr, Arc<ServerLog>) {
    assert!(!scripts.is_empty());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(ServerLog::default());

    let accept_log = Arc::clone(&log);
    tokio::spawn(async move {
        let mut next = 0usize;
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };
            accept_log.connections.lock().push(Instant::now());
            let script = scripts
                .get(next)
                .or_else(|| scripts.last())
                .cloned()
                .unwrap();
            next += 1;
            tokio::spawn(run_script(stream, script, Arc::clone(&accept_log)));
        }
    });

    (addr, log)
}

async fn run_script(stream: TcpStream, script: Script, log: Arc<ServerLog>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    match script {
        Script::AbnormalClose => close_with(ws, CloseCode::Error).await,
        Script::NormalClose => close_with(ws, CloseCode::Normal).await,
        Script::OpenFor(duration) => {
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    frame = ws.next() => match frame {
                        Some(Ok(Message::Text(text))) => record(&log, &text),
                        Some(Ok(_)) => {}
                        _ => return,
                    },
                }
            }
            close_with(ws, CloseCode::Error).await;
        }
        Script::Serve(frames) => {
            for frame in frames {
                if ws.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => record(&log, &text),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
}

async fn close_with(mut ws: WebSocketStream<TcpStream>, code: CloseCode) {
    let _ = ws
        .close(Some(CloseFrame {
            code,
            reason: "".into(),
        }))
        .await;
    // Drain until the close handshake completes so the frame is flushed.
    while let Some(frame) = ws.next().await {
        if frame.is_err() {
            break;
        }
    }
}

fn record(log: &ServerLog, text: &str) {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        log.inbound.lock().push(value);
    }
}

fn token(telegram_id: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload =
        URL_SAFE_NO_PAD.encode(json!({ "telegram_id": telegram_id }).to_string().as_bytes());
    format!("{header}.{payload}.sig")
}

fn config(addr: SocketAddr, base_ms: u64, jitter_ms: u64, max_attempts: u32) -> ChannelConfig {
    let mut config = ChannelConfig::new(format!("http://{addr}"));
    config.keepalive_interval = Duration::from_millis(50);
    config.connect_timeout = Duration::from_secs(2);
    config.backoff = BackoffPolicy {
        base: Duration::from_millis(base_ms),
        cap: Duration::from_secs(10),
        max_attempts,
        jitter: Duration::from_millis(jitter_ms),
    };
    config
}

fn capture_handler() -> (MessageHandler, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MessageHandler = Arc::new(move |frame| sink.lock().push(frame));
    (handler, seen)
}

fn channel_with(config: ChannelConfig, handler: MessageHandler) -> ChatChannel {
    ChatChannel::new(config, Arc::new(StaticCredentials::new(token(42))), handler)
}

async fn wait_for_connections(log: &ServerLog, n: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if log.connection_count() >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn abnormal_close_backs_off_exponentially_and_exhausts() {
    let (addr, log) = spawn_server(vec![Script::AbnormalClose]).await;
    let (handler, _seen) = capture_handler();
    // 3 retries at 60ms/120ms/240ms plus up to 30ms jitter each.
    let channel = channel_with(config(addr, 60, 30, 3), handler);

    channel.connect().await.unwrap();

    assert!(
        wait_for_connections(&log, 4, Duration::from_secs(5)).await,
        "expected initial connection plus 3 retries"
    );
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        log.connection_count(),
        4,
        "no attempt beyond the configured ceiling"
    );

    let instants = log.connections.lock().clone();
    for (n, pair) in instants.windows(2).enumerate() {
        let expected = Duration::from_millis(60 * 2u64.pow(n as u32));
        let gap = pair[1] - pair[0];
        assert!(
            gap >= expected,
            "retry {} arrived after {:?}, expected at least {:?}",
            n + 1,
            gap,
            expected
        );
        // Jitter plus scheduling overhead; generous to avoid flakes.
        assert!(
            gap < expected + Duration::from_millis(730),
            "retry {} arrived after {:?}, expected under {:?}",
            n + 1,
            gap,
            expected + Duration::from_millis(730)
        );
    }
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let (addr, log) = spawn_server(vec![Script::NormalClose]).await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 50, 0, 5), handler);

    channel.connect().await.unwrap();

    assert!(wait_for_connections(&log, 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(log.connection_count(), 1);
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect() {
    let (addr, log) = spawn_server(vec![Script::AbnormalClose]).await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 400, 0, 5), handler);

    channel.connect().await.unwrap();
    assert!(wait_for_connections(&log, 1, Duration::from_secs(2)).await);

    // Inside the 400ms backoff window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    channel.disconnect().await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(
        log.connection_count(),
        1,
        "cancelled reconnect must not fire"
    );
}

#[tokio::test]
async fn successful_open_resets_the_attempt_counter() {
    // Fail twice, hold the third connection open, then fail again. If the
    // counter resets on open, the fourth connection arrives one base delay
    // after the third closes - not the third-attempt delay.
    let (addr, log) = spawn_server(vec![
        Script::AbnormalClose,
        Script::AbnormalClose,
        Script::OpenFor(Duration::from_millis(150)),
        Script::AbnormalClose,
    ])
    .await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 200, 0, 5), handler);

    channel.connect().await.unwrap();

    assert!(wait_for_connections(&log, 4, Duration::from_secs(5)).await);
    let instants = log.connections.lock().clone();
    let gap = instants[3] - instants[2];

    // Open 150ms + base 200ms; without the reset it would be 150ms + 800ms.
    assert!(
        gap >= Duration::from_millis(350),
        "fourth connection arrived too early: {gap:?}"
    );
    assert!(
        gap < Duration::from_millis(800),
        "delay was not reset to the base after a successful open: {gap:?}"
    );
}

#[tokio::test]
async fn pong_is_consumed_and_application_frames_are_forwarded() {
    let (addr, log) = spawn_server(vec![Script::Serve(vec![
        json!({"type": "pong"}),
        json!({"type": "order_update", "id": 5}),
    ])])
    .await;
    let (handler, seen) = capture_handler();
    let channel = channel_with(config(addr, 50, 0, 5), handler);

    channel.connect().await.unwrap();
    assert!(channel.wait_connected(Duration::from_secs(2)).await);

    // Long enough for at least two keep-alive pulses at 50ms.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        *seen.lock(),
        vec![json!({"type": "order_update", "id": 5})],
        "exactly the application frame, never the pong"
    );
    assert!(
        log.inbound_types().iter().any(|t| t == "ping"),
        "keep-alive pulse never reached the server: {:?}",
        log.inbound_types()
    );

    channel.disconnect().await;
}

#[tokio::test]
async fn send_writes_only_while_open() {
    let (addr, log) = spawn_server(vec![Script::Serve(vec![])]).await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 50, 0, 5), handler);

    let typing = OutboundFrame::Typing { telegram_id: 42 };
    assert!(!channel.send(&typing), "send before connect must fail");

    channel.connect().await.unwrap();
    assert!(channel.wait_connected(Duration::from_secs(2)).await);
    assert!(channel.send(&typing), "send while open must succeed");

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if log.inbound_types().iter().any(|t| t == "typing") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        log.inbound_types().iter().any(|t| t == "typing"),
        "typing frame never reached the server: {:?}",
        log.inbound_types()
    );

    channel.disconnect().await;
    assert!(!channel.send(&typing), "send after disconnect must fail");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_leave_a_single_live_reader() {
    let (addr, log) = spawn_server(vec![Script::Serve(vec![])]).await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 50, 0, 5), handler);

    // Race two connects so one handshake is still in flight when the other
    // supersedes it. Whichever loses must not keep a reader (and its
    // keep-alive pulse) alive next to the winner's.
    let first = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.connect().await })
    };
    let second = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.connect().await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert!(channel.wait_connected(Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(1000)).await;

    // One reader pulses every 50ms, roughly 20 pings in a second; a leaked
    // second reader would roughly double that.
    let pings = log
        .inbound_types()
        .iter()
        .filter(|t| t.as_str() == "ping")
        .count();
    assert!(pings >= 5, "keep-alive pulse went missing: {pings} pings");
    assert!(
        pings <= 30,
        "more than one live reader is pulsing: {pings} pings"
    );
    assert!(channel.is_connected());

    channel.disconnect().await;
}

#[tokio::test]
async fn connect_supersedes_an_existing_connection() {
    let (addr, log) = spawn_server(vec![Script::Serve(vec![])]).await;
    let (handler, _seen) = capture_handler();
    let channel = channel_with(config(addr, 50, 0, 5), handler);

    channel.connect().await.unwrap();
    assert!(channel.wait_connected(Duration::from_secs(2)).await);

    channel.connect().await.unwrap();
    assert!(channel.wait_connected(Duration::from_secs(2)).await);
    assert!(wait_for_connections(&log, 2, Duration::from_secs(2)).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        log.connection_count(),
        2,
        "supersede must not leak extra connection attempts"
    );
    assert!(channel.is_connected());

    channel.disconnect().await;
}
