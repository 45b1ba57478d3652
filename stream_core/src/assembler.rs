//! Reassembly of streamed audio into a playable WAV artifact.

use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use bytes::{Bytes, BytesMut};

use crate::error::StreamError;
use crate::wav::{wav_header, AudioFormat, WAV_HEADER_LEN};

/// Accumulates audio chunks in arrival order.
///
/// Chunks are never reordered or dropped: the decoded signal is only correct
/// when the payload is the exact concatenation of what came off the wire.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunks: Vec<Bytes>,
    byte_len: u64,
    format: AudioFormat,
}

impl ChunkAssembler {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            chunks: Vec::new(),
            byte_len: 0,
            format,
        }
    }

    pub fn append(&mut self, chunk: Bytes) {
        self.byte_len += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn sample_count(&self) -> u64 {
        self.format.samples_in(self.byte_len)
    }

    /// Concatenate every chunk behind a WAV header.
    ///
    /// Consumes the assembler, so an artifact can only be built once. Fails
    /// when the header cannot describe the payload or the sample rate.
    pub fn finalize(self, sample_rate: u32) -> Result<AudioArtifact, StreamError> {
        let data_len =
            u32::try_from(self.byte_len).map_err(|_| StreamError::PayloadTooLarge(self.byte_len))?;
        let header = wav_header(data_len, sample_rate, self.format)?;
        let pad = (data_len % 2) as usize;

        let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + self.byte_len as usize + pad);
        out.extend_from_slice(&header);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        if pad == 1 {
            out.extend_from_slice(&[0]);
        }

        Ok(AudioArtifact {
            bytes: out.freeze(),
            payload_len: self.byte_len as usize,
            sample_rate,
            format: self.format,
            chunk_count: self.chunks.len() as u64,
            sample_count: self.format.samples_in(self.byte_len),
        })
    }
}

/// A finalized WAV file plus the totals observed while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    bytes: Bytes,
    payload_len: usize,
    pub sample_rate: u32,
    pub format: AudioFormat,
    pub chunk_count: u64,
    pub sample_count: u64,
}

impl AudioArtifact {
    /// The complete WAV file, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// The raw audio exactly as received, without header or pad byte.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_LEN..WAV_HEADER_LEN + self.payload_len]
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.sample_count * 1000 / self.sample_rate as u64
    }

    /// Base64 of the whole WAV file, the shape the web player consumes.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StreamError> {
        tokio::fs::write(path.as_ref(), &self.bytes).await?;
        Ok(())
    }
}
