//! End-to-end tests for WebSocket streaming
//! Tests: axum WebSocket endpoint -> WebSocketTransport -> assembled WAV

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use stream_core::{start_stream, SessionState, StreamConfig, StreamError, StreamEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct TestServer {
    requests: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
    connections: Arc<AtomicUsize>,
}

fn text_msg(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Five 4096-byte PCM frames with a mel frame after each, then completion.
async fn stream_audio(mut socket: WebSocket, first_chunk: u8) {
    let _ = socket
        .send(text_msg(json!({ "type": "status", "status": "streaming", "message": "Streaming audio chunks..." })))
        .await;
    for i in first_chunk..5u8 {
        if socket.send(Message::Binary(vec![i; 4096].into())).await.is_err() {
            return;
        }
        let _ = socket
            .send(text_msg(json!({ "type": "mel_frame", "mel": vec![i as f32; 80] })))
            .await;
    }
    let _ = socket
        .send(text_msg(json!({ "type": "complete", "sample_rate": 22050, "total_chunks": 5 })))
        .await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn stream_ws(
    ws: WebSocketUpgrade,
    State(server): State<TestServer>,
    Path((lang, text)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    server
        .requests
        .lock()
        .unwrap()
        .push((lang, text, params.get("resume_from").cloned()));
    ws.on_upgrade(|socket| stream_audio(socket, 0))
}

/// Drops the first connection after two frames, resumes from `resume_from` afterwards.
async fn flaky_ws(
    ws: WebSocketUpgrade,
    State(server): State<TestServer>,
    Path((lang, text)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let resume = params.get("resume_from").cloned();
    server.requests.lock().unwrap().push((lang, text, resume.clone()));
    let attempt = server.connections.fetch_add(1, Ordering::SeqCst);

    ws.on_upgrade(move |mut socket| async move {
        if attempt == 0 {
            for i in 0..2u8 {
                let _ = socket.send(Message::Binary(vec![i; 4096].into())).await;
            }
            // Dropping the socket without a close frame.
            return;
        }
        let from = resume.and_then(|r| r.parse::<u8>().ok()).unwrap_or(0);
        stream_audio(socket, from).await;
    })
}

async fn rejecting_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket
            .send(text_msg(json!({ "error": "Text cannot be empty", "code": 400 })))
            .await;
    })
}

async fn spawn_server() -> (SocketAddr, TestServer) {
    let server = TestServer::default();
    let app = Router::new()
        .route("/stream/{lang}/{text}", get(stream_ws))
        .route("/flaky/{lang}/{text}", get(flaky_ws))
        .route("/reject/{lang}/{text}", get(rejecting_ws))
        .with_state(server.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

fn config(addr: SocketAddr, path: &str) -> StreamConfig {
    StreamConfig {
        endpoint: format!("ws://{addr}/{path}"),
        connect_timeout_secs: 5,
        idle_timeout_secs: 5,
        reconnect_base_ms: 20,
        reconnect_max_ms: 100,
        ..StreamConfig::default()
    }
}

async fn collect(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn test_websocket_stream_end_to_end() {
    let (addr, server) = spawn_server().await;
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = start_stream(&config(addr, "stream"), "Hallo Welt, wie geht's?", "de_DE", tx);
    assert_eq!(handle.join().await, SessionState::Closed);
    let events = collect(rx).await;

    assert_eq!(events.first(), Some(&StreamEvent::Open));
    assert_eq!(
        events.iter().filter(|e| matches!(e, StreamEvent::Progress(_))).count(),
        5
    );
    assert_eq!(
        events.iter().filter(|e| matches!(e, StreamEvent::MelFrame(_))).count(),
        5
    );

    let (artifact, chunk_count) = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Complete { artifact, chunk_count, .. } => Some((artifact.clone(), *chunk_count)),
            _ => None,
        })
        .expect("stream completes");
    assert_eq!(chunk_count, 5);
    assert_eq!(artifact.payload().len(), 20480);
    let expected: Vec<u8> = (0..5u8).flat_map(|i| vec![i; 4096]).collect();
    assert_eq!(artifact.payload(), expected.as_slice());

    let reader = hound::WavReader::new(std::io::Cursor::new(artifact.as_bytes().to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 22050);
    assert_eq!(reader.spec().channels, 1);

    assert_eq!(events.last(), Some(&StreamEvent::Close));

    let requests = server.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![("de_DE".to_string(), "Hallo Welt, wie geht's?".to_string(), None)]
    );
}

#[tokio::test]
async fn test_websocket_stream_resumes_after_drop() {
    let (addr, server) = spawn_server().await;
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = start_stream(&config(addr, "flaky"), "Hello", "en_US", tx);
    assert_eq!(handle.join().await, SessionState::Closed);
    let events = collect(rx).await;

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Reconnecting { attempt: 1, max_attempts: 3 }
    )));
    let artifact = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::AudioBlob(a) => Some(a.clone()),
            _ => None,
        })
        .expect("stream completes after resume");
    let expected: Vec<u8> = (0..5u8).flat_map(|i| vec![i; 4096]).collect();
    assert_eq!(artifact.payload(), expected.as_slice());
    assert_eq!(artifact.chunk_count, 5);

    let requests = server.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].2, None);
    assert_eq!(requests[1].2.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_websocket_server_error_is_reported() {
    let (addr, _server) = spawn_server().await;
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = start_stream(&config(addr, "reject"), "x", "en_US", tx);
    assert_eq!(handle.join().await, SessionState::Failed);
    let events = collect(rx).await;

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        errors,
        vec![StreamError::ServerReported("Text cannot be empty (code 400)".into())]
    );
    assert_eq!(events.last(), Some(&StreamEvent::Close));
}

#[tokio::test]
async fn test_websocket_unreachable_server_exhausts_reconnects() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, rx) = mpsc::unbounded_channel();
    let cfg = StreamConfig {
        max_reconnect_attempts: 2,
        ..config(addr, "stream")
    };
    let handle = start_stream(&cfg, "Hello", "en_US", tx);
    assert_eq!(handle.join().await, SessionState::Failed);
    let events = collect(rx).await;

    let reconnects: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Reconnecting { attempt, max_attempts } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(reconnects, vec![(1, 2), (2, 2)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Error(StreamError::ReconnectExhausted { attempts: 2, .. }))));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Open)));
}
