//! End-to-end relay against an in-process ingest server

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use camera_relay::{
    capture::SyntheticEngine,
    config::AppConfig,
    error::{CaptureError, Error, SessionError},
    network::ConnectionState,
    playback::LogPlayer,
    session::{SessionDriver, SessionState, VisualState},
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Recorded {
    Text(String),
    Binary(Vec<u8>),
}

struct Ingest {
    frames: Mutex<Vec<Recorded>>,
    token: Mutex<Option<String>>,
    connections: Mutex<usize>,
    ready_after: Option<usize>,
    greeting: Option<String>,
    closed: Notify,
}

impl Ingest {
    fn frames(&self) -> Vec<Recorded> {
        self.frames.lock().clone()
    }
}

async fn ingest(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(stub): State<Arc<Ingest>>,
) -> Response {
    *stub.token.lock() = params.get("csrf_token").cloned();
    *stub.connections.lock() += 1;
    ws.on_upgrade(move |socket| handle_socket(socket, stub))
}

async fn handle_socket(mut socket: WebSocket, stub: Arc<Ingest>) {
    if let Some(greeting) = &stub.greeting {
        let _ = socket.send(Message::Text(greeting.clone())).await;
    }

    let mut binaries = 0usize;
    let mut announced = false;

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => stub.frames.lock().push(Recorded::Text(text)),
            Message::Binary(data) => {
                stub.frames.lock().push(Recorded::Binary(data));
                binaries += 1;
                if !announced && stub.ready_after.is_some_and(|n| binaries >= n) {
                    announced = true;
                    let _ = socket.send(Message::Text("playlist_ready".into())).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    stub.closed.notify_one();
}

async fn spawn_ingest(ready_after: Option<usize>, greeting: Option<&str>) -> (SocketAddr, Arc<Ingest>) {
    let stub = Arc::new(Ingest {
        frames: Mutex::new(Vec::new()),
        token: Mutex::new(None),
        connections: Mutex::new(0),
        ready_after,
        greeting: greeting.map(str::to_string),
        closed: Notify::new(),
    });

    let app = Router::new()
        .route("/socket", get(ingest))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, stub)
}

fn test_config(addr: SocketAddr, token: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.channel.endpoint = format!("ws://{}/socket", addr);
    config.channel.csrf_token = token.map(str::to_string);
    config.capture.chunk_interval_ms = 40;
    config.ui.enabled = false;
    config
}

fn parse_handshake(frame: &Recorded) -> serde_json::Value {
    match frame {
        Recorded::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected handshake text, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_relay_session() {
    let (addr, stub) = spawn_ingest(Some(3), Some("welcome")).await;
    let config = test_config(addr, Some("abc def"));
    let player = LogPlayer::new();

    let engine = SyntheticEngine::new().with_chunk_size(256);
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(player.clone()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Open);

    handle.record().await.unwrap();
    let playing = tokio::time::timeout(WAIT, handle.wait_for(|s| s.playback_initialized))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(playing.visual, VisualState::Playing);
    assert_eq!(playing.state, SessionState::Streaming);

    // Keep streaming for a few more chunks after readiness
    let relayed = playing.counters.relayed;
    tokio::time::timeout(WAIT, handle.wait_for(|s| s.counters.relayed >= relayed + 2))
        .await
        .unwrap()
        .unwrap();

    handle.stop().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, stub.closed.notified()).await.unwrap();

    let status = handle.status();
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.connection, ConnectionState::Closed);
    assert!(!status.offline);
    assert!(!status.encoder_active);

    assert_eq!(stub.token.lock().as_deref(), Some("abc def"));

    let frames = stub.frames();
    let handshake = parse_handshake(&frames[0]);
    assert_eq!(handshake["mimetype"], status.mimetype.as_str());

    assert_eq!(frames.last(), Some(&Recorded::Text("stop".into())));
    let texts = frames.iter().filter(|f| matches!(f, Recorded::Text(_))).count();
    assert_eq!(texts, 2);

    let binaries: Vec<&Vec<u8>> = frames
        .iter()
        .filter_map(|f| match f {
            Recorded::Binary(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(binaries.len() as u64, status.counters.relayed);
    assert!(binaries.iter().all(|data| !data.is_empty()));
    // The synthetic fill byte increments per chunk, so order is visible
    assert!(binaries.windows(2).all(|w| w[0][0] <= w[1][0]));

    let requests = player.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].surface, config.playback.output_surface);
    assert_eq!(
        requests[0].manifest.as_str(),
        format!("http://{}/dash/manifest.mpd", addr)
    );
    assert!(requests[0].autoplay);
}

#[tokio::test]
async fn test_unarmed_session_sends_no_chunks() {
    let (addr, stub) = spawn_ingest(None, None).await;
    let config = test_config(addr, None);
    let player = LogPlayer::new();

    let engine = SyntheticEngine::new().with_chunk_size(64);
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(player.clone()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Open);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = handle.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.visual, VisualState::Preview);
    assert!(!status.encoder_active);

    handle.stop().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, stub.closed.notified()).await.unwrap();

    let frames = stub.frames();
    assert_eq!(frames.len(), 2);
    parse_handshake(&frames[0]);
    assert_eq!(frames[1], Recorded::Text("stop".into()));
    assert!(stub.token.lock().is_none());
    assert!(player.requests().is_empty());
}

#[tokio::test]
async fn test_record_rejected_after_stop() {
    let (addr, stub) = spawn_ingest(None, None).await;
    let config = test_config(addr, None);

    let engine = SyntheticEngine::new();
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Open);
    handle.stop().await.unwrap();
    // Second stop is a no-op
    handle.stop().await.unwrap();

    let rejected = handle.record().await;
    assert!(matches!(
        rejected,
        Err(SessionError::Stopped) | Err(SessionError::DriverGone)
    ));

    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, stub.closed.notified()).await.unwrap();

    let stops = stub
        .frames()
        .iter()
        .filter(|f| **f == Recorded::Text("stop".into()))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn test_connection_failure_blocks_recording() {
    // Reserve a port, then free it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = test_config(addr, None);
    let engine = SyntheticEngine::new();
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Failed);
    assert!(handle.status().offline);
    assert!(handle.status().last_error.is_some());

    let result = handle.record().await;
    assert!(matches!(result, Err(SessionError::ConnectionFailure(_))));

    handle.stop().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.status().state, SessionState::Stopped);
}

#[tokio::test]
async fn test_unavailable_device_never_connects() {
    let (addr, stub) = spawn_ingest(None, None).await;
    let config = test_config(addr, None);

    let engine = SyntheticEngine::unavailable();
    let result = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new())).await;
    assert!(matches!(
        result,
        Err(Error::Capture(CaptureError::DeviceUnavailable(_)))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*stub.connections.lock(), 0);
}

#[tokio::test]
async fn test_no_supported_format_never_connects() {
    let (addr, stub) = spawn_ingest(None, None).await;
    let config = test_config(addr, None);

    let engine = SyntheticEngine::new().with_supported(["video/x-unknown"]);
    let result = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new())).await;
    assert!(matches!(result, Err(Error::Codec(_))));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*stub.connections.lock(), 0);
}

#[tokio::test]
async fn test_stop_flushes_partial_chunk_before_sentinel() {
    const CHUNK: usize = 1000;

    let (addr, stub) = spawn_ingest(None, None).await;
    let mut config = test_config(addr, None);
    config.capture.chunk_interval_ms = 300;

    let engine = SyntheticEngine::new().with_chunk_size(CHUNK);
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Open);
    handle.record().await.unwrap();

    tokio::time::timeout(WAIT, handle.wait_for(|s| s.counters.relayed >= 1))
        .await
        .unwrap()
        .unwrap();
    // Stop about halfway through the next interval
    tokio::time::sleep(Duration::from_millis(150)).await;

    handle.stop().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, stub.closed.notified()).await.unwrap();

    let frames = stub.frames();
    let n = frames.len();
    assert!(n >= 4, "handshake, full chunk, tail and stop expected: {:?}", n);
    assert_eq!(frames[n - 1], Recorded::Text("stop".into()));

    match &frames[n - 2] {
        Recorded::Binary(tail) => {
            assert!(!tail.is_empty());
            assert!(tail.len() < CHUNK, "tail was a full chunk");
        }
        other => panic!("expected tail chunk before stop, got {:?}", other),
    }
    assert_eq!(frames[1], Recorded::Binary(vec![0; CHUNK]));
}

#[tokio::test]
async fn test_encoder_start_failure_rejects_record() {
    let (addr, stub) = spawn_ingest(None, None).await;
    let config = test_config(addr, None);

    let engine = SyntheticEngine::new().with_broken_encoder();
    let (handle, task) = SessionDriver::launch(&config, &engine, Box::new(LogPlayer::new()))
        .await
        .unwrap();

    assert_eq!(handle.wait_for_connection().await, ConnectionState::Open);

    let result = handle.record().await;
    assert!(matches!(result, Err(SessionError::Capture(_))));

    let status = handle.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.visual, VisualState::Preview);
    assert!(!status.encoder_active);
    assert!(status.armed_at.is_none());
    assert!(status.last_error.is_some());

    handle.stop().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, stub.closed.notified()).await.unwrap();

    let frames = stub.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], Recorded::Text("stop".into()));
}
