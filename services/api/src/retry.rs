//! services/api/src/retry.rs
//!
//! A small retry policy for calls to the generative-text provider.
//!
//! Rate-limit responses back off exponentially with random jitter; other
//! transient provider errors pause briefly and try again. Exhaustion is a
//! soft failure: the caller skips this unit of work and tries again on the
//! next run.

use std::time::Duration;

use rand::Rng;

/// How a failed provider call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// 429-equivalent; wait out the exponential backoff window.
    RateLimited,
    /// Timeouts, 5xx and similar; short fixed pause, then retry.
    Transient,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff delay.
    pub max_jitter: Duration,
    /// Pause used for non-rate-limit transient errors.
    pub transient_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_jitter: Duration::from_secs(3),
            transient_pause: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying `attempt` (0-based), without jitter:
    /// `base_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Full delay for a failed attempt of the given class, jitter included.
    pub fn delay_for(&self, class: RetryClass, attempt: u32) -> Duration {
        match class {
            RetryClass::RateLimited => {
                let jitter_ms = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
                self.backoff_delay(attempt) + Duration::from_millis(jitter_ms)
            }
            RetryClass::Transient => self.transient_pause,
        }
    }

    /// Sleeps for the computed delay. Split from `delay_for` so tests can
    /// check the arithmetic without waiting.
    pub async fn pause(&self, class: RetryClass, attempt: u32) {
        tokio::time::sleep(self.delay_for(class, attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(40));
    }

    #[test]
    fn rate_limit_delay_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let floor = policy.backoff_delay(attempt);
            let ceiling = floor + policy.max_jitter;
            for _ in 0..20 {
                let d = policy.delay_for(RetryClass::RateLimited, attempt);
                assert!(d >= floor && d <= ceiling, "delay {:?} out of bounds", d);
            }
        }
    }

    #[test]
    fn transient_delay_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(RetryClass::Transient, 0),
            policy.transient_pause
        );
        assert_eq!(
            policy.delay_for(RetryClass::Transient, 4),
            policy.transient_pause
        );
    }
}
