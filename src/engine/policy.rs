//! Caller-driven reconnection policy
//!
//! Pure decisions only. The engine never sleeps or retries on its own; the
//! tick loop asks this policy how long to wait before the next `connect`.

use crate::config::ReconnectSection;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// None = unlimited
    pub max_attempts: Option<u32>,
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make connection attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Max attempts exceeded
    GiveUp,
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }

    /// Decide the next step after `failed_attempts` consecutive failures
    pub fn decide(&self, failed_attempts: u32) -> ReconnectDecision {
        if let Some(max_attempts) = self.max_attempts {
            if failed_attempts >= max_attempts {
                return ReconnectDecision::GiveUp;
            }
        }

        let attempt = failed_attempts + 1;
        ReconnectDecision::Proceed {
            attempt,
            delay: self.backoff_delay(attempt),
        }
    }

    /// Worst-case total backoff before giving up; None when unlimited
    pub fn max_total_delay(&self) -> Option<Duration> {
        self.max_attempts
            .map(|max| (1..=max).map(|attempt| self.backoff_delay(attempt)).sum())
    }
}
