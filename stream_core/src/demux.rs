//! Classification of inbound frames.
//!
//! Binary frames are raw PCM. Text frames are JSON control messages keyed by
//! a `type` discriminant; unknown discriminants deserialize to
//! [`ControlMessage::Unknown`] and are skipped by the session.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

/// One data frame as delivered by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

/// Structured sideband message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    MelFrame {
        #[serde(alias = "data")]
        mel: Vec<f32>,
    },
    Complete {
        sample_rate: Option<u32>,
        total_chunks: Option<u64>,
        total_samples: Option<u64>,
    },
    Error {
        message: String,
    },
    /// Stream parameters announced by the server before and after audio.
    Metadata {
        sample_rate: u32,
        #[serde(default)]
        total_samples: u64,
        #[serde(default)]
        total_chunks: u64,
        hop_size: Option<u32>,
    },
    Status {
        status: String,
        message: Option<String>,
    },
    /// Audio delivered inline as f32 samples, optionally with its mel frame.
    Chunk {
        audio: Vec<f32>,
        mel: Option<Vec<f32>>,
        chunk: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

/// Result of demultiplexing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Audio(Bytes),
    Control(ControlMessage),
    Malformed(String),
}

pub fn classify(frame: Frame) -> Classified {
    match frame {
        Frame::Binary(bytes) => Classified::Audio(bytes),
        Frame::Text(text) => parse_control(&text),
    }
}

fn parse_control(text: &str) -> Classified {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Classified::Malformed(format!("invalid JSON control frame: {e}")),
    };

    if !value.is_object() {
        return Classified::Malformed(format!("control frame is not an object: {}", truncate(text)));
    }

    if value.get("type").is_some() {
        return match ControlMessage::deserialize(value) {
            Ok(msg) => Classified::Control(msg),
            Err(e) => Classified::Malformed(format!("invalid control message: {e}")),
        };
    }

    // Error objects without a discriminant: {"error": "...", "code": 400}
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        let message = match value.get("code").and_then(|c| c.as_u64()) {
            Some(code) => format!("{error} (code {code})"),
            None => error.to_string(),
        };
        return Classified::Control(ControlMessage::Error { message });
    }

    Classified::Malformed(format!("control frame has no type: {}", truncate(text)))
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
