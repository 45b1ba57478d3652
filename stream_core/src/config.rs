// Configuration for streaming sessions

use std::time::Duration;

use url::Url;

use crate::error::StreamError;
use crate::reconnect::ReconnectPolicy;
use crate::session::StreamRequest;
use crate::wav::AudioFormat;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base WebSocket URL; the language and text are appended as path segments.
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub progress_per_chunk: u32,
    /// Used when the server never announces a sample rate.
    pub default_sample_rate: u32,
    pub audio_format: AudioFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8085/stream".to_string(),
            connect_timeout_secs: 10,
            idle_timeout_secs: 30,
            max_reconnect_attempts: 3,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 8000,
            progress_per_chunk: 2,
            default_sample_rate: 22_050,
            audio_format: AudioFormat::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl StreamConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let endpoint = std::env::var("STREAM_ENDPOINT")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.endpoint);

        Self {
            endpoint,
            connect_timeout_secs: env_or("STREAM_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            idle_timeout_secs: env_or("STREAM_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_reconnect_attempts: env_or(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_base_ms: env_or("STREAM_RECONNECT_BASE_MS", defaults.reconnect_base_ms),
            reconnect_max_ms: env_or("STREAM_RECONNECT_MAX_MS", defaults.reconnect_max_ms),
            progress_per_chunk: env_or("STREAM_PROGRESS_PER_CHUNK", defaults.progress_per_chunk),
            default_sample_rate: env_or("STREAM_DEFAULT_SAMPLE_RATE", defaults.default_sample_rate),
            audio_format: defaults.audio_format,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    /// `{endpoint}/{language}/{text}`, with `?resume_from=n` once chunks are retained.
    pub fn stream_url(&self, request: &StreamRequest, resume_from: u64) -> Result<Url, StreamError> {
        let mut url = Url::parse(&self.endpoint)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(StreamError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}' (expected ws or wss)"
                )))
            }
        }

        url.path_segments_mut()
            .map_err(|_| StreamError::InvalidEndpoint(format!("{} cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .push(&request.language)
            .push(&request.text);

        if resume_from > 0 {
            url.query_pairs_mut()
                .append_pair("resume_from", &resume_from.to_string());
        }
        Ok(url)
    }
}
