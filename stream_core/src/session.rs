//! Per-request session state.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use crate::assembler::{AudioArtifact, ChunkAssembler};
use crate::connection::Connection;
use crate::error::StreamError;
use crate::progress::{Progress, ProgressTracker};
use crate::wav::AudioFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What to synthesize. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub text: String,
    pub language: String,
}

impl StreamRequest {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Completing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Transitions only move forward, except for the `Open <-> Reconnecting` cycle.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed | Failed, _) => false,
            (_, Closed | Failed) => true,
            (Idle, Connecting) => true,
            (Connecting, Open | Reconnecting) => true,
            (Open, Reconnecting | Completing) => true,
            (Reconnecting, Open | Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Completing => "completing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a connection was closed from the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Caller invoked the cancellation handle.
    Deliberate,
    Completed,
    ServerError,
    ProtocolViolation,
}

/// One time-step of mel magnitudes, indexed in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct MelFrame {
    pub index: u64,
    pub magnitudes: Vec<f32>,
}

/// The single owner of everything a streaming request accumulates.
pub struct StreamSession {
    id: SessionId,
    state: SessionState,
    request: StreamRequest,
    connection: Option<Box<dyn Connection>>,
    close_reason: Option<CloseReason>,
    assembler: ChunkAssembler,
    finalized: bool,
    progress: ProgressTracker,
    reconnect_attempts: u32,
    cancelled: bool,
    sample_rate_hint: Option<u32>,
    mel_frames: u64,
}

impl StreamSession {
    pub fn new(request: StreamRequest, format: AudioFormat, percent_per_chunk: u32) -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            request,
            connection: None,
            close_reason: None,
            assembler: ChunkAssembler::new(format),
            finalized: false,
            progress: ProgressTracker::new(percent_per_chunk),
            reconnect_attempts: 0,
            cancelled: false,
            sample_rate_hint: None,
            mel_frames: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
    }

    /// Connection confirmed: the reconnect budget starts over.
    pub(crate) fn mark_open(&mut self) {
        self.transition(SessionState::Open);
        self.reconnect_attempts = 0;
        self.close_reason = None;
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub(crate) fn record_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts += 1;
        self.reconnect_attempts
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn attach_connection(&mut self, conn: Box<dyn Connection>) {
        debug_assert!(self.connection.is_none(), "session already owns a live connection");
        self.connection = Some(conn);
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut Box<dyn Connection>> {
        self.connection.as_mut()
    }

    pub(crate) fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.connection.take()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub(crate) fn set_close_reason(&mut self, reason: CloseReason) {
        self.close_reason = Some(reason);
    }

    pub(crate) fn append_audio(&mut self, chunk: Bytes) -> Progress {
        self.assembler.append(chunk);
        self.progress.on_chunk_received()
    }

    pub fn chunk_count(&self) -> u64 {
        self.assembler.chunk_count()
    }

    pub fn sample_count(&self) -> u64 {
        self.assembler.sample_count()
    }

    pub fn sample_rate_hint(&self) -> Option<u32> {
        self.sample_rate_hint
    }

    pub(crate) fn set_sample_rate_hint(&mut self, sample_rate: u32) {
        self.sample_rate_hint = Some(sample_rate);
    }

    pub(crate) fn next_mel_frame(&mut self, magnitudes: Vec<f32>) -> MelFrame {
        let frame = MelFrame {
            index: self.mel_frames,
            magnitudes,
        };
        self.mel_frames += 1;
        frame
    }

    /// Build the artifact from everything received so far.
    ///
    /// # Panics
    ///
    /// Panics when called a second time for the same session.
    pub(crate) fn finalize(&mut self, sample_rate: u32) -> Result<AudioArtifact, StreamError> {
        assert!(!self.finalized, "session {} finalized twice", self.id);
        self.finalized = true;
        std::mem::take(&mut self.assembler).finalize(sample_rate)
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("request", &self.request)
            .field("connection", &self.connection.as_ref().map(|_| "<Connection>"))
            .field("chunk_count", &self.chunk_count())
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
