//! Client-side session manager for streaming speech synthesis.
//!
//! A session opens one WebSocket to the synthesis server, receives raw PCM
//! as binary frames interleaved with JSON control messages, reports progress
//! and mel frames while audio arrives, and finally assembles everything into
//! a WAV artifact. Dropped connections are retried with bounded backoff; the
//! caller can stop a session at any point through its [`StreamHandle`].
//!
//! ```no_run
//! use stream_core::{start_stream, StreamConfig, StreamEvent};
//!
//! # async fn run() {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = start_stream(&StreamConfig::from_env(), "Hallo Welt", "de_DE", tx);
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         StreamEvent::Progress(p) => println!("{}%", p.percent),
//!         StreamEvent::Complete { artifact, .. } => artifact.save("out.wav").await.unwrap(),
//!         StreamEvent::Close => break,
//!         _ => {}
//!     }
//! }
//! handle.join().await;
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod events;
pub mod progress;
pub mod reconnect;
pub mod session;
pub mod wav;
pub mod ws;

pub use assembler::{AudioArtifact, ChunkAssembler};
pub use config::StreamConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionManager, StreamHandle, Transport};
pub use demux::{classify, Classified, ControlMessage, Frame};
pub use error::StreamError;
pub use events::{StreamEvent, StreamEvents};
pub use progress::{Progress, ProgressTracker};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use session::{CloseReason, MelFrame, SessionId, SessionState, StreamRequest, StreamSession};
pub use wav::AudioFormat;
pub use ws::WebSocketTransport;

/// Start a WebSocket streaming session for `text` in `language`.
///
/// `text` and `language` are expected to be validated by the caller.
pub fn start_stream<E: StreamEvents>(
    config: &StreamConfig,
    text: &str,
    language: &str,
    events: E,
) -> StreamHandle {
    ConnectionManager::new(WebSocketTransport, config.clone())
        .start(StreamRequest::new(text, language), events)
}
