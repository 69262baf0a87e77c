use std::time::Duration;

use serde::Deserialize;

/// Bounded exponential backoff shared by every request the fetcher makes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 2000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Pause after the failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let ms = self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_until_cap() {
        let p = RetryPolicy {
            max_attempts: 6,
            base_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let ms: Vec<u128> = (0..5).map(|a| p.backoff(a).as_millis()).collect();
        assert_eq!(ms, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn attempts_are_bounded() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(0));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));

        let single = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!single.should_retry(0));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(200), Duration::from_millis(p.max_backoff_ms));
    }
}
