use crate::error::StreamError;

/// Size of the canonical PCM RIFF/WAVE header.
pub const WAV_HEADER_LEN: usize = 44;

/// Highest sample rate accepted from a server.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Reject rates no PCM stream is produced at.
pub fn check_sample_rate(sample_rate: u32) -> Result<u32, StreamError> {
    if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
        return Err(StreamError::ProtocolViolation(format!(
            "implausible sample rate {sample_rate} Hz (max {MAX_SAMPLE_RATE})"
        )));
    }
    Ok(sample_rate)
}

/// PCM layout of the raw audio carried by binary frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl AudioFormat {
    /// Bytes per sample frame (all channels).
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Number of sample frames contained in `byte_len` bytes of payload.
    pub fn samples_in(&self, byte_len: u64) -> u64 {
        match self.block_align() {
            0 => 0,
            align => byte_len / align as u64,
        }
    }
}

/// Build a PCM RIFF/WAVE header sized for `data_len` payload bytes.
///
/// RIFF chunks are word aligned, so an odd payload is accounted for with one
/// trailing pad byte that the caller must append after the data.
pub fn wav_header(
    data_len: u32,
    sample_rate: u32,
    format: AudioFormat,
) -> Result<[u8; WAV_HEADER_LEN], StreamError> {
    let block_align = format.block_align();
    let byte_rate = sample_rate.checked_mul(block_align as u32).ok_or_else(|| {
        StreamError::ProtocolViolation(format!("sample rate {sample_rate} Hz overflows the WAV byte rate"))
    })?;
    let pad = data_len % 2;
    let riff_size = data_len
        .checked_add(36 + pad)
        .ok_or(StreamError::PayloadTooLarge(data_len as u64))?;

    let mut out = [0u8; WAV_HEADER_LEN];

    // RIFF header
    out[0..4].copy_from_slice(b"RIFF");
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    out[8..12].copy_from_slice(b"WAVE");

    // fmt chunk
    out[12..16].copy_from_slice(b"fmt ");
    out[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    out[22..24].copy_from_slice(&format.channels.to_le_bytes());
    out[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    out[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    out[32..34].copy_from_slice(&block_align.to_le_bytes());
    out[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data chunk
    out[36..40].copy_from_slice(b"data");
    out[40..44].copy_from_slice(&data_len.to_le_bytes());

    Ok(out)
}

/// Convert f32 samples in [-1.0, 1.0] to 16-bit little-endian PCM bytes.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes());
    }
    out
}
