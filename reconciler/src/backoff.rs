use std::time::Duration;

use config::BackoffConfig;

/// Failure backoff: the minimum delay doubled once per recorded failure,
/// capped at the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min)
        }
    }

    /// Delay before the next attempt, given the failure count recorded
    /// before the attempt that just failed.
    pub fn delay(&self, failure_count: u32) -> Duration {
        let factor = 1_u32.checked_shl(failure_count).unwrap_or(u32::MAX);
        self.min
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(600))
    }

    #[test]
    fn test_doubling_up_to_ceiling() {
        let policy = policy();
        assert_eq!(policy.delay(0), Duration::from_secs(10));
        assert_eq!(policy.delay(1), Duration::from_secs(20));
        assert_eq!(policy.delay(5), Duration::from_secs(320));
        assert_eq!(policy.delay(6), Duration::from_secs(600));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_from_config() {
        let policy = BackoffPolicy::from(&BackoffConfig::default());
        assert_eq!(policy.min(), Duration::from_secs(10));
        assert_eq!(policy.max(), Duration::from_secs(600));
    }

    #[test]
    fn test_max_below_min_is_raised() {
        let policy = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_delay_is_non_decreasing(
            min_ms in 1_u64..100_000,
            extra_ms in 0_u64..10_000_000,
            m in 0_u32..200,
            step in 0_u32..200
        ) {
            let policy = BackoffPolicy::new(
                Duration::from_millis(min_ms),
                Duration::from_millis(min_ms + extra_ms)
            );
            let n = m.saturating_add(step);
            prop_assert!(policy.delay(n) >= policy.delay(m));
            prop_assert!(policy.delay(n) <= policy.max());
        }

        #[test]
        fn prop_first_delay_is_minimum(min_ms in 1_u64..100_000, extra_ms in 0_u64..10_000_000) {
            let policy = BackoffPolicy::new(
                Duration::from_millis(min_ms),
                Duration::from_millis(min_ms + extra_ms)
            );
            prop_assert_eq!(policy.delay(0), policy.min());
        }
    }
}
