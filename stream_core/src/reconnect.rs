use std::time::Duration;

use crate::session::StreamSession;

/// Outcome of evaluating an abnormal close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Reconnect { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Bounded exponential backoff for re-opening a dropped stream.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the given (1-based) attempt: `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Called for every abnormal, non-deliberate close. Counts the attempt on
    /// the session when another one is allowed.
    pub fn on_abnormal_close(&self, session: &mut StreamSession) -> ReconnectDecision {
        let attempts = session.reconnect_attempts();
        if attempts >= self.max_attempts {
            return ReconnectDecision::GiveUp { attempts };
        }
        let attempt = session.record_reconnect_attempt();
        ReconnectDecision::Reconnect {
            attempt,
            delay: self.delay_for(attempt),
        }
    }
}
