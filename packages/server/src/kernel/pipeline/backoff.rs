//! Exponential backoff policy for failed attempts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Strategy applied to a computed delay before scheduling.
///
/// The baseline pipeline runs without jitter; the seam exists so a
/// spread can be added without touching any caller.
pub trait Jitter: Send + Sync {
    fn apply(&self, delay: Duration) -> Duration;
}

/// Default strategy: the delay is used as computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn apply(&self, delay: Duration) -> Duration {
        delay
    }
}

/// Maps a retry count to the next eligible attempt time and decides
/// when a job has exhausted its retries.
#[derive(Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    max_retries: i32,
    jitter: Arc<dyn Jitter>,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_retries: i32) -> Self {
        Self {
            base: base.max(Duration::zero()),
            cap,
            max_retries,
            jitter: Arc::new(NoJitter),
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Delay for a failure that brought the counter to `retry_count`:
    /// `base * 2^(retry_count - 1)`, clamped to the cap. The counter is
    /// post-increment, so the first failure waits exactly `base`.
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).max(0).min(62) as u32;
        let factor = 1i64 << exponent;
        let delay = self
            .base
            .num_milliseconds()
            .saturating_mul(factor)
            .min(self.cap.num_milliseconds());
        Duration::milliseconds(delay)
    }

    /// Timestamp of the next attempt for a job whose counter just
    /// reached `retry_count`.
    pub fn next_attempt(&self, retry_count: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.jitter.apply(self.delay_for(retry_count))
    }

    /// A job is exhausted once its counter reaches `max_retries`.
    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_retries
    }
}

impl std::fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("base", &self.base)
            .field("cap", &self.cap)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_retry_until_cap() {
        let policy = BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6);
        assert_eq!(policy.delay_for(1), Duration::minutes(5));
        assert_eq!(policy.delay_for(2), Duration::minutes(10));
        assert_eq!(policy.delay_for(3), Duration::minutes(20));
        assert_eq!(policy.delay_for(7), Duration::minutes(320));
        assert_eq!(policy.delay_for(8), Duration::minutes(360));
        assert_eq!(policy.delay_for(30), Duration::minutes(360));
    }

    #[test]
    fn backoff_formula_holds_for_all_counts() {
        let base = Duration::minutes(5);
        let cap = Duration::minutes(360);
        let policy = BackoffPolicy::new(base, cap, 6);
        let now = Utc::now();
        for retry_count in 1..=16 {
            let expected = Duration::milliseconds(
                (base.num_milliseconds() << (retry_count - 1)).min(cap.num_milliseconds()),
            );
            assert_eq!(policy.next_attempt(retry_count as i32, now) - now, expected);
        }
    }

    #[test]
    fn large_retry_counts_do_not_overflow() {
        let policy = BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6);
        assert_eq!(policy.delay_for(i32::MAX), Duration::minutes(360));
    }

    #[test]
    fn exhaustion_at_max_retries() {
        let policy = BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6);
        assert!(!policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
        assert!(policy.is_exhausted(7));
    }

    #[test]
    fn jitter_strategy_is_pluggable() {
        struct DoubleJitter;
        impl Jitter for DoubleJitter {
            fn apply(&self, delay: Duration) -> Duration {
                delay * 2
            }
        }

        let policy = BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6)
            .with_jitter(Arc::new(DoubleJitter));
        let now = Utc::now();
        assert_eq!(policy.next_attempt(1, now) - now, Duration::minutes(10));
    }
}
