//! Caller-facing event contract.
//!
//! Callers either implement [`StreamEvents`] directly or hand in the sending
//! half of an unbounded channel and consume [`StreamEvent`]s from one place.

use tokio::sync::{mpsc, watch};

use crate::assembler::AudioArtifact;
use crate::error::StreamError;
use crate::progress::Progress;
use crate::session::MelFrame;

/// Session lifecycle callbacks. Every method defaults to a no-op.
pub trait StreamEvents: Send + 'static {
    fn on_open(&mut self) {}

    fn on_progress(&mut self, _progress: Progress) {}

    fn on_mel_frame(&mut self, _frame: &MelFrame) {}

    fn on_error(&mut self, _error: &StreamError) {}

    fn on_reconnecting(&mut self, _attempt: u32, _max_attempts: u32) {}

    fn on_audio_blob(&mut self, _artifact: &AudioArtifact) {}

    fn on_complete(&mut self, _artifact: &AudioArtifact, _chunk_count: u64, _sample_count: u64) {}

    /// Fires exactly once per session, last.
    fn on_close(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Open,
    Progress(Progress),
    MelFrame(MelFrame),
    Error(StreamError),
    Reconnecting { attempt: u32, max_attempts: u32 },
    AudioBlob(AudioArtifact),
    Complete {
        artifact: AudioArtifact,
        chunk_count: u64,
        sample_count: u64,
    },
    Close,
}

impl StreamEvents for mpsc::UnboundedSender<StreamEvent> {
    fn on_open(&mut self) {
        let _ = self.send(StreamEvent::Open);
    }

    fn on_progress(&mut self, progress: Progress) {
        let _ = self.send(StreamEvent::Progress(progress));
    }

    fn on_mel_frame(&mut self, frame: &MelFrame) {
        let _ = self.send(StreamEvent::MelFrame(frame.clone()));
    }

    fn on_error(&mut self, error: &StreamError) {
        let _ = self.send(StreamEvent::Error(error.clone()));
    }

    fn on_reconnecting(&mut self, attempt: u32, max_attempts: u32) {
        let _ = self.send(StreamEvent::Reconnecting { attempt, max_attempts });
    }

    fn on_audio_blob(&mut self, artifact: &AudioArtifact) {
        let _ = self.send(StreamEvent::AudioBlob(artifact.clone()));
    }

    fn on_complete(&mut self, artifact: &AudioArtifact, chunk_count: u64, sample_count: u64) {
        let _ = self.send(StreamEvent::Complete {
            artifact: artifact.clone(),
            chunk_count,
            sample_count,
        });
    }

    fn on_close(&mut self) {
        let _ = self.send(StreamEvent::Close);
    }
}

/// Gatekeeper in front of the caller's [`StreamEvents`].
///
/// Nothing but `on_close` is delivered once the session is cancelled, at most
/// one terminal outcome (completion or terminal error) is delivered, and
/// `on_close` is delivered exactly once.
pub(crate) struct EventDispatcher {
    sink: Box<dyn StreamEvents>,
    cancelled: watch::Receiver<bool>,
    terminated: bool,
    closed: bool,
}

impl EventDispatcher {
    pub(crate) fn new(sink: Box<dyn StreamEvents>, cancelled: watch::Receiver<bool>) -> Self {
        Self {
            sink,
            cancelled,
            terminated: false,
            closed: false,
        }
    }

    fn live(&self) -> bool {
        !self.closed && !self.terminated && !*self.cancelled.borrow()
    }

    pub(crate) fn open(&mut self) {
        if self.live() {
            self.sink.on_open();
        }
    }

    pub(crate) fn progress(&mut self, progress: Progress) {
        if self.live() {
            self.sink.on_progress(progress);
        }
    }

    pub(crate) fn mel_frame(&mut self, frame: &MelFrame) {
        if self.live() {
            self.sink.on_mel_frame(frame);
        }
    }

    pub(crate) fn reconnecting(&mut self, attempt: u32, max_attempts: u32) {
        if self.live() {
            self.sink.on_reconnecting(attempt, max_attempts);
        }
    }

    /// Report a terminal error. Later terminal reports are dropped.
    pub(crate) fn fail(&mut self, error: &StreamError) {
        if self.live() {
            self.sink.on_error(error);
        }
        self.terminated = true;
    }

    pub(crate) fn complete(&mut self, artifact: &AudioArtifact) {
        if self.live() {
            self.sink.on_audio_blob(artifact);
            self.sink
                .on_complete(artifact, artifact.chunk_count, artifact.sample_count);
        }
        self.terminated = true;
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sink.on_close();
        }
    }
}
