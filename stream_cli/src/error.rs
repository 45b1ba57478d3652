use stream_core::{SessionState, StreamError};
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Stream ended in state '{0}'")]
    Ended(SessionState),
}
