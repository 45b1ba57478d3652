use thiserror::Error;

/// Errors surfaced by a streaming session.
///
/// Only `ConnectionOpenFailure` and `AbnormalDisconnect` are recoverable; the
/// session retries those internally until the reconnect budget runs out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionOpenFailure(String),

    #[error("Connection lost: {0}")]
    AbnormalDisconnect(String),

    #[error("Protocol error: {0}")]
    ProtocolViolation(String),

    #[error("Server error: {0}")]
    ServerReported(String),

    #[error("Connection lost after {attempts} reconnect attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },

    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Audio payload of {0} bytes exceeds the WAV size limit")]
    PayloadTooLarge(u64),

    #[error("IO error: {0}")]
    Io(String),
}

impl StreamError {
    /// Whether the reconnect policy may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionOpenFailure(_) | StreamError::AbnormalDisconnect(_)
        )
    }
}

impl From<url::ParseError> for StreamError {
    fn from(e: url::ParseError) -> Self {
        StreamError::InvalidEndpoint(e.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}
