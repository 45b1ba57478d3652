/// Progress snapshot handed to `on_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub chunks: u64,
    pub percent: u8,
}

/// Estimates progress from the number of audio chunks received.
///
/// The stream length is unknown until completion, so each chunk is worth a
/// fixed share and the result is clamped at 100.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    chunks: u64,
    percent_per_chunk: u32,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new(percent_per_chunk: u32) -> Self {
        Self {
            chunks: 0,
            percent_per_chunk,
            last_percent: 0,
        }
    }

    pub fn on_chunk_received(&mut self) -> Progress {
        self.chunks += 1;
        let raw = self.chunks.saturating_mul(self.percent_per_chunk as u64).min(100) as u8;
        self.last_percent = self.last_percent.max(raw);
        Progress {
            chunks: self.chunks,
            percent: self.last_percent,
        }
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(2)
    }
}
