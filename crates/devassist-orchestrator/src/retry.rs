//! Retry budget and backoff for the primary provider.

use core::time::Duration;

use devassist_core::config::FailoverConfig;
use tracing::debug;

/// Retry and fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls made to the primary pair before giving up on it
    pub max_attempts: u32,
    /// Backoff after the first rate-limited call
    pub initial_backoff: Duration,
    /// Ceiling on the computed exponential backoff
    pub max_backoff: Duration,
    /// Whether other providers are tried after the primary is exhausted
    pub fallback: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FailoverConfig::default())
    }
}

impl RetryPolicy {
    /// Reads the failover section of the configuration.
    pub fn from_config(config: &FailoverConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            fallback: config.enabled,
        }
    }

    /// Wait before retrying after the `attempt`-th (zero-based) rate limit.
    ///
    /// A vendor-supplied delay is honoured as given, never shortened.
    /// Otherwise the initial backoff doubles per attempt, capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.initial_backoff
                .saturating_mul(factor)
                .min(self.max_backoff)
        });
        debug!("Backoff for attempt {attempt}: {delay:?}");
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10, None), Duration::from_secs(60));
        assert_eq!(policy.delay_for(64, None), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(2, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(600))),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_zero_retries_still_makes_one_attempt() {
        let config = FailoverConfig {
            max_retries: 0,
            ..FailoverConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
