//! Bounded exponential backoff for readiness polling.

use std::time::Duration;

/// Polling schedule: `initial * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second poll.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth factor between polls.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Schedule that never sleeps longer than `delay`; used by tests.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after the given (zero-based) attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(16)).unwrap_or(16);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(40));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(1000), Duration::from_secs(60));
    }

    #[test]
    fn test_fixed_schedule() {
        let backoff = Backoff::fixed(Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(7), Duration::from_millis(10));
    }
}
