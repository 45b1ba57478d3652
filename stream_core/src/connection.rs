//! Connection lifecycle and the per-session event loop.
//!
//! Each session runs on one spawned task. Inbound frames, the connect and idle
//! timeouts, reconnect backoff and cancellation are all multiplexed with
//! `tokio::select!` on that task, so `StreamSession` is never touched
//! concurrently and every handler runs to completion before the next event.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use url::Url;

use crate::config::StreamConfig;
use crate::demux::{classify, Classified, ControlMessage, Frame};
use crate::error::StreamError;
use crate::events::{EventDispatcher, StreamEvents};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::session::{CloseReason, SessionId, SessionState, StreamRequest, StreamSession};
use crate::wav::{check_sample_rate, f32_to_pcm16le};

/// What a live connection yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Frame(Frame),
    /// The peer sent a close frame.
    Closed { code: Option<u16>, reason: String },
}

/// An open, receive-only stream of frames.
#[async_trait]
pub trait Connection: Send {
    /// Next inbound event. `None` means the stream ended without a close frame.
    ///
    /// Must be cancel safe: the session drops a pending `recv` on cancellation
    /// and idle timeout.
    async fn recv(&mut self) -> Option<Result<ConnectionEvent, StreamError>>;

    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Opens connections to a streaming endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, StreamError>;
}

/// Handle returned by [`ConnectionManager::start`].
#[derive(Debug)]
pub struct StreamHandle {
    id: SessionId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<SessionState>,
}

impl StreamHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Stop the session deliberately.
    ///
    /// Returns `true` only for the call that actually requested the stop;
    /// repeated calls, or calls after the session already ended, are no-ops.
    pub fn cancel(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }
        self.cancel.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to reach its terminal state.
    pub async fn join(self) -> SessionState {
        let StreamHandle { task, cancel, .. } = self;
        let state = match task.await {
            Ok(state) => state,
            Err(e) => {
                error!("stream task ended abnormally: {e}");
                SessionState::Failed
            }
        };
        drop(cancel);
        state
    }
}

/// Resolves once the handle requests cancellation. A dropped handle never does.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let handle_dropped = rx.wait_for(|c| *c).await.is_err();
    if handle_dropped {
        std::future::pending::<()>().await;
    }
}

/// Result of processing inbound events until the connection stops being useful.
enum Step {
    Cancelled,
    Complete { sample_rate: u32 },
    ServerError(String),
    Protocol(StreamError),
    Disconnected(StreamError),
}

pub struct ConnectionManager<T> {
    transport: Arc<T>,
    config: StreamConfig,
    policy: ReconnectPolicy,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, config: StreamConfig) -> Self {
        let policy = config.reconnect_policy();
        Self {
            transport: Arc::new(transport),
            config,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start streaming `request` and report to `events`.
    ///
    /// Returns immediately. Must be called from within a Tokio runtime.
    pub fn start<E: StreamEvents>(&self, request: StreamRequest, events: E) -> StreamHandle {
        let session = StreamSession::new(
            request,
            self.config.audio_format,
            self.config.progress_per_chunk,
        );
        let id = session.id();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let dispatcher = EventDispatcher::new(Box::new(events), cancel_rx.clone());

        let span = info_span!("stream", session = %id);
        let task = tokio::spawn(self.clone().run(session, dispatcher, cancel_rx).instrument(span));

        StreamHandle {
            id,
            cancel: cancel_tx,
            task,
        }
    }

    /// Open a connection for `session`, bounded by the connect timeout.
    ///
    /// On reconnect the number of retained chunks is passed as `resume_from`.
    pub async fn open(&self, session: &mut StreamSession) -> Result<(), StreamError> {
        debug_assert!(!session.has_connection(), "session already has a live connection");
        let url = self.config.stream_url(session.request(), session.chunk_count())?;
        debug!(%url, "opening stream connection");

        let conn = match tokio::time::timeout(self.config.connect_timeout(), self.transport.connect(&url)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(StreamError::ConnectionOpenFailure(format!(
                    "no open confirmation within {}s",
                    self.config.connect_timeout_secs
                )))
            }
        };
        session.attach_connection(conn);
        Ok(())
    }

    /// Close the session's live connection, if any, and record why.
    pub async fn close(&self, session: &mut StreamSession, reason: CloseReason) {
        session.set_close_reason(reason);
        if let Some(mut conn) = session.take_connection() {
            match tokio::time::timeout(self.config.connect_timeout(), conn.close()).await {
                Ok(Ok(())) => debug!(?reason, "connection closed"),
                Ok(Err(e)) => debug!(?reason, "error while closing connection: {e}"),
                Err(_) => debug!(?reason, "timed out closing connection"),
            }
        }
    }

    pub fn is_deliberate_close(&self, session: &StreamSession) -> bool {
        session.close_reason() == Some(CloseReason::Deliberate)
    }

    async fn run(
        self,
        mut session: StreamSession,
        mut events: EventDispatcher,
        mut cancel: watch::Receiver<bool>,
    ) -> SessionState {
        info!(
            language = %session.request().language,
            chars = session.request().text.chars().count(),
            "starting stream"
        );
        session.transition(SessionState::Connecting);

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    return self.finish_cancelled(&mut session, &mut events).await;
                }
                res = self.open(&mut session) => res,
            };

            match opened {
                Ok(()) => {
                    session.mark_open();
                    info!(retained_chunks = session.chunk_count(), "stream connection open");
                    events.open();
                }
                Err(e) if e.is_recoverable() => {
                    warn!("failed to open stream connection: {e}");
                    match self.recover(&mut session, &mut events, &mut cancel, e).await {
                        Some(state) => return state,
                        None => continue,
                    }
                }
                Err(e) => {
                    error!("cannot open stream: {e}");
                    session.transition(SessionState::Failed);
                    events.fail(&e);
                    events.close();
                    return SessionState::Failed;
                }
            }

            let step = self.pump(&mut session, &mut events, &mut cancel).await;
            match step {
                Step::Cancelled => return self.finish_cancelled(&mut session, &mut events).await,
                Step::Complete { sample_rate } => {
                    return self.finish_complete(&mut session, &mut events, sample_rate).await;
                }
                Step::ServerError(message) => {
                    return self
                        .finish_failed(
                            &mut session,
                            &mut events,
                            StreamError::ServerReported(message),
                            CloseReason::ServerError,
                        )
                        .await;
                }
                Step::Protocol(err) => {
                    return self
                        .finish_failed(&mut session, &mut events, err, CloseReason::ProtocolViolation)
                        .await;
                }
                Step::Disconnected(e) => {
                    // The peer is gone; there is nothing left to close gracefully.
                    drop(session.take_connection());
                    warn!(retained_chunks = session.chunk_count(), "stream connection lost: {e}");
                    if let Some(state) = self.recover(&mut session, &mut events, &mut cancel, e).await {
                        return state;
                    }
                }
            }
        }
    }

    /// Process inbound events in arrival order until one ends the connection.
    async fn pump(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        cancel: &mut watch::Receiver<bool>,
    ) -> Step {
        let idle = self.config.idle_timeout();
        loop {
            let Some(conn) = session.connection_mut() else {
                return Step::Disconnected(StreamError::AbnormalDisconnect(
                    "no live connection".to_string(),
                ));
            };

            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Step::Cancelled,
                res = tokio::time::timeout(idle, conn.recv()) => res,
            };

            let step = match next {
                Err(_) => Some(Step::Disconnected(StreamError::AbnormalDisconnect(format!(
                    "no data received for {}s",
                    self.config.idle_timeout_secs
                )))),
                Ok(None) => Some(Step::Disconnected(StreamError::AbnormalDisconnect(
                    "connection ended without a close frame".to_string(),
                ))),
                Ok(Some(Err(e))) => Some(Step::Disconnected(e)),
                Ok(Some(Ok(ConnectionEvent::Closed { code, reason }))) => {
                    Some(self.on_peer_close(session, code, &reason))
                }
                Ok(Some(Ok(ConnectionEvent::Frame(frame)))) => self.on_frame(session, events, frame),
            };

            if let Some(step) = step {
                return step;
            }
        }
    }

    fn on_frame(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        frame: Frame,
    ) -> Option<Step> {
        match classify(frame) {
            Classified::Audio(bytes) => {
                self.accept_audio(session, events, bytes);
                None
            }
            Classified::Control(msg) => self.on_control(session, events, msg),
            Classified::Malformed(reason) => Some(Step::Protocol(StreamError::ProtocolViolation(reason))),
        }
    }

    fn accept_audio(&self, session: &mut StreamSession, events: &mut EventDispatcher, bytes: Bytes) {
        let len = bytes.len();
        let progress = session.append_audio(bytes);
        trace!(chunk = progress.chunks, bytes = len, percent = progress.percent, "audio chunk");
        events.progress(progress);
    }

    fn on_control(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        msg: ControlMessage,
    ) -> Option<Step> {
        match msg {
            ControlMessage::MelFrame { mel } => {
                let frame = session.next_mel_frame(mel);
                events.mel_frame(&frame);
                None
            }
            ControlMessage::Chunk { audio, mel, chunk } => {
                if let Some(index) = chunk {
                    // Indices are 1-based; anything already retained is a resend.
                    if index <= session.chunk_count() {
                        debug!(index, retained = session.chunk_count(), "dropping resent chunk");
                        return None;
                    }
                }
                self.accept_audio(session, events, Bytes::from(f32_to_pcm16le(&audio)));
                if let Some(mel) = mel {
                    let frame = session.next_mel_frame(mel);
                    events.mel_frame(&frame);
                }
                None
            }
            ControlMessage::Complete {
                sample_rate,
                total_chunks,
                total_samples,
            } => {
                if let Some(expected) = total_chunks {
                    if expected != session.chunk_count() {
                        warn!(expected, received = session.chunk_count(), "chunk total mismatch");
                    }
                }
                if let Some(expected) = total_samples {
                    if expected != session.sample_count() {
                        warn!(expected, received = session.sample_count(), "sample total mismatch");
                    }
                }
                let sample_rate = match sample_rate.map(check_sample_rate) {
                    Some(Ok(rate)) => rate,
                    Some(Err(e)) => return Some(Step::Protocol(e)),
                    None => self.fallback_sample_rate(session),
                };
                Some(Step::Complete { sample_rate })
            }
            ControlMessage::Error { message } => Some(Step::ServerError(message)),
            ControlMessage::Metadata {
                sample_rate,
                total_samples,
                total_chunks,
                hop_size,
            } => {
                debug!(sample_rate, total_samples, total_chunks, ?hop_size, "stream metadata");
                match check_sample_rate(sample_rate) {
                    Ok(rate) => {
                        session.set_sample_rate_hint(rate);
                        None
                    }
                    Err(e) => Some(Step::Protocol(e)),
                }
            }
            ControlMessage::Status { status, message } => {
                if status == "complete" {
                    return Some(Step::Complete {
                        sample_rate: self.fallback_sample_rate(session),
                    });
                }
                debug!(%status, message = message.as_deref().unwrap_or(""), "stream status");
                None
            }
            ControlMessage::Unknown => {
                trace!("ignoring unknown control message");
                None
            }
        }
    }

    fn on_peer_close(&self, session: &StreamSession, code: Option<u16>, reason: &str) -> Step {
        match code {
            Some(1000) if session.chunk_count() > 0 => {
                warn!(
                    chunks = session.chunk_count(),
                    "server closed without a completion message, finalizing received audio"
                );
                Step::Complete {
                    sample_rate: self.fallback_sample_rate(session),
                }
            }
            _ => Step::Disconnected(StreamError::AbnormalDisconnect(match code {
                Some(code) => format!("server closed connection (code {code}): {reason}"),
                None => "server closed connection".to_string(),
            })),
        }
    }

    fn fallback_sample_rate(&self, session: &StreamSession) -> u32 {
        session
            .sample_rate_hint()
            .unwrap_or(self.config.default_sample_rate)
    }

    /// Ask the reconnect policy what to do after a recoverable failure.
    ///
    /// Returns the terminal state when the session ended, `None` to reopen.
    async fn recover(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        cancel: &mut watch::Receiver<bool>,
        cause: StreamError,
    ) -> Option<SessionState> {
        if session.is_cancelled() || self.is_deliberate_close(session) {
            return Some(self.finish_cancelled(session, events).await);
        }

        match self.policy.on_abnormal_close(session) {
            ReconnectDecision::Reconnect { attempt, delay } => {
                warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting"
                );
                session.transition(SessionState::Reconnecting);
                events.reconnecting(attempt, self.policy.max_attempts);

                tokio::select! {
                    biased;
                    _ = cancelled(cancel) => Some(self.finish_cancelled(session, events).await),
                    _ = tokio::time::sleep(delay) => None,
                }
            }
            ReconnectDecision::GiveUp { attempts } => {
                let err = StreamError::ReconnectExhausted {
                    attempts,
                    last: cause.to_string(),
                };
                error!("{err}");
                session.transition(SessionState::Failed);
                events.fail(&err);
                events.close();
                Some(SessionState::Failed)
            }
        }
    }

    async fn finish_cancelled(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
    ) -> SessionState {
        session.mark_cancelled();
        info!(state = %session.state(), chunks = session.chunk_count(), "stream cancelled");
        self.close(session, CloseReason::Deliberate).await;
        session.transition(SessionState::Closed);
        events.close();
        SessionState::Closed
    }

    async fn finish_complete(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        sample_rate: u32,
    ) -> SessionState {
        session.transition(SessionState::Completing);
        let artifact = match session.finalize(sample_rate) {
            Ok(artifact) => artifact,
            Err(e) => {
                return self
                    .finish_failed(session, events, e, CloseReason::ProtocolViolation)
                    .await;
            }
        };
        info!(
            chunks = artifact.chunk_count,
            samples = artifact.sample_count,
            sample_rate,
            duration_ms = artifact.duration_ms(),
            "stream complete"
        );
        events.complete(&artifact);
        self.close(session, CloseReason::Completed).await;
        session.transition(SessionState::Closed);
        events.close();
        SessionState::Closed
    }

    async fn finish_failed(
        &self,
        session: &mut StreamSession,
        events: &mut EventDispatcher,
        err: StreamError,
        reason: CloseReason,
    ) -> SessionState {
        error!("stream failed: {err}");
        events.fail(&err);
        self.close(session, reason).await;
        session.transition(SessionState::Failed);
        events.close();
        SessionState::Failed
    }
}
