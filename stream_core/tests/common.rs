//! Common utilities for session tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use stream_core::{
    Connection, ConnectionEvent, ConnectionManager, Frame, SessionState, StreamConfig, StreamError,
    StreamEvent, StreamHandle, StreamRequest, Transport,
};
use tokio::sync::mpsc;
use url::Url;

/// One step a scripted connection plays back from `recv`.
#[derive(Debug, Clone)]
pub enum Step {
    Binary(Vec<u8>),
    Text(String),
    /// Peer close frame with the given code.
    Close(u16),
    /// Stream ends without a close frame.
    Drop,
    Error(String),
    /// Never yields again.
    Pending,
}

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub enum Script {
    Fail(String),
    /// Connect never completes.
    Hang,
    Connect(Vec<Step>),
}

#[derive(Debug, Default)]
pub struct TransportLog {
    pub urls: Vec<String>,
    pub closes: usize,
}

#[derive(Clone)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    pub log: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            log: Arc::new(Mutex::new(TransportLog::default())),
        }
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.log.lock().unwrap().urls.clone()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, StreamError> {
        self.log.lock().unwrap().urls.push(url.to_string());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Connect(steps)) => Ok(Box::new(ScriptedConnection {
                steps: steps.into(),
                log: self.log.clone(),
            })),
            Some(Script::Fail(reason)) => Err(StreamError::ConnectionOpenFailure(reason)),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(StreamError::ConnectionOpenFailure("no more scripted connections".into())),
        }
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    log: Arc<Mutex<TransportLog>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn recv(&mut self) -> Option<Result<ConnectionEvent, StreamError>> {
        match self.steps.pop_front() {
            Some(Step::Binary(data)) => Some(Ok(ConnectionEvent::Frame(Frame::Binary(Bytes::from(data))))),
            Some(Step::Text(text)) => Some(Ok(ConnectionEvent::Frame(Frame::Text(text)))),
            Some(Step::Close(code)) => Some(Ok(ConnectionEvent::Closed {
                code: Some(code),
                reason: String::new(),
            })),
            Some(Step::Drop) => None,
            Some(Step::Error(reason)) => Some(Err(StreamError::AbnormalDisconnect(reason))),
            Some(Step::Pending) | None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub fn test_config() -> StreamConfig {
    StreamConfig {
        endpoint: "ws://tts.test/stream".to_string(),
        max_reconnect_attempts: 3,
        reconnect_base_ms: 100,
        reconnect_max_ms: 1000,
        ..StreamConfig::default()
    }
}

pub fn complete(sample_rate: u32) -> Step {
    Step::Text(format!(r#"{{"type":"complete","sample_rate":{sample_rate}}}"#))
}

pub fn start(
    transport: &ScriptedTransport,
    config: StreamConfig,
) -> (StreamHandle, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(transport.clone(), config);
    let handle = manager.start(StreamRequest::new("Hallo Welt", "de_DE"), tx);
    (handle, rx)
}

/// Run a session to its end and return every event it dispatched.
pub async fn run_to_end(
    transport: &ScriptedTransport,
    config: StreamConfig,
) -> (Vec<StreamEvent>, SessionState) {
    let (handle, mut rx) = start(transport, config);
    let state = handle.join().await;
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    (events, state)
}

/// Wait for the first event matching `pred`, returning everything seen so far.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<StreamEvent>,
    pred: impl Fn(&StreamEvent) -> bool,
) -> Vec<StreamEvent> {
    let mut seen = Vec::new();
    while let Some(ev) = rx.recv().await {
        let done = pred(&ev);
        seen.push(ev);
        if done {
            break;
        }
    }
    seen
}

pub fn count(events: &[StreamEvent], pred: impl Fn(&StreamEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

pub fn closes(events: &[StreamEvent]) -> usize {
    count(events, |e| matches!(e, StreamEvent::Close))
}

pub fn errors(events: &[StreamEvent]) -> Vec<StreamError> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

pub fn reconnects(events: &[StreamEvent]) -> Vec<(u32, u32)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Reconnecting { attempt, max_attempts } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect()
}
