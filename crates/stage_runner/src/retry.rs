//! Retry policy: bounded attempts with capped exponential backoff

use std::time::Duration;

use contracts::RetryConfig;
use rand::Rng;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration, jitter: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap: cap.max(base),
            jitter,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, `attempts` being the ones already made
    ///
    /// `base * 2^(attempts - 1)`, capped, then optionally jittered into
    /// `[delay / 2, delay]`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let delay = self
            .base
            .checked_mul(1 << exp)
            .unwrap_or(self.cap)
            .min(self.cap);

        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let ms = delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.jitter,
        )
    }
}

/// Sleep for `delay` unless cancelled first
///
/// Returns `false` when the token fired.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            jitter,
        )
    }

    #[test]
    fn test_allows_retry_until_limit() {
        let policy = policy(false);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
        assert!(!policy.allows_retry(6));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = policy(false);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = policy(true);
        for _ in 0..100 {
            let d = policy.delay(3);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::immediate(2));
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay(1), Duration::ZERO);

        // zero attempts still allows the first one
        assert_eq!(RetryPolicy::from(&RetryConfig::immediate(0)).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(5), &token).await);

        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(5), &token).await);
        assert!(!sleep_or_cancel(Duration::ZERO, &token).await);
    }
}
