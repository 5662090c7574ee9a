//! Request pacing: retry backoff and inter-page delays, both jittered.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry behavior for a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per page before giving up on the API (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff grows by this much per failed attempt, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,

    /// Uniform random extra on each backoff, in milliseconds.
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_jitter_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_ms: default_retry_base_ms(),
            jitter_ms: default_retry_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_ms.saturating_mul(u64::from(attempt.max(1)));
        Duration::from_millis(base.saturating_add(jitter(self.jitter_ms)))
    }
}

/// Pacing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Fixed delay between page requests, in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Uniform random extra between pages, in milliseconds.
    #[serde(default = "default_page_jitter_ms")]
    pub page_jitter_ms: u64,
}

fn default_page_delay_ms() -> u64 {
    700
}

fn default_page_jitter_ms() -> u64 {
    900
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            page_delay_ms: default_page_delay_ms(),
            page_jitter_ms: default_page_jitter_ms(),
        }
    }
}

impl PacingConfig {
    /// No waiting at all; same attempt count as the default.
    pub fn immediate() -> Self {
        Self {
            retry: RetryPolicy {
                base_ms: 0,
                jitter_ms: 0,
                ..RetryPolicy::default()
            },
            page_delay_ms: 0,
            page_jitter_ms: 0,
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms.saturating_add(jitter(self.page_jitter_ms)))
    }

    pub async fn wait_between_pages(&self) {
        sleep_nonzero(self.page_delay()).await;
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        sleep_nonzero(self.retry.delay_for(attempt)).await;
    }
}

fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=max_ms)
    }
}

async fn sleep_nonzero(delay: Duration) {
    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_with_attempt() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let first = policy.delay_for(1);
            let second = policy.delay_for(2);
            assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(2000));
            assert!(second >= Duration::from_millis(2000) && second <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_page_delay_bounds() {
        let pacing = PacingConfig::default();
        for _ in 0..20 {
            let delay = pacing.page_delay();
            assert!(delay >= Duration::from_millis(700) && delay <= Duration::from_millis(1600));
        }
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let pacing = PacingConfig::immediate();
        assert_eq!(pacing.page_delay(), Duration::ZERO);
        assert_eq!(pacing.retry.delay_for(3), Duration::ZERO);
        assert_eq!(pacing.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let pacing: PacingConfig = serde_json::from_str(r#"{"page_delay_ms": 50}"#).unwrap();
        assert_eq!(pacing.page_delay_ms, 50);
        assert_eq!(pacing.page_jitter_ms, 900);
        assert_eq!(pacing.retry, RetryPolicy::default());
    }
}
