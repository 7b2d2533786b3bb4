use rand::Rng;
use std::time::Duration;

/// Reconnect backoff schedule.
///
/// `delay_for(i) = min(initial_delay * multiplier^i, max_delay)`, optionally
/// jittered by +/-50%. `max_attempts == None` retries forever.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: Some(10),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Maps the configuration convention (`-1` = unbounded) onto the policy.
    pub fn attempts_from_config(max_retry_attempts: i64) -> Option<u32> {
        if max_retry_attempts < 0 {
            None
        } else {
            Some(u32::try_from(max_retry_attempts).unwrap_or(u32::MAX))
        }
    }

    /// Delay to wait before reconnect attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        if self.jitter {
            apply_jitter(capped).min(self.max_delay)
        } else {
            capped
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        let max_nanos = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= max_nanos {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// True once `failures` consecutive connect failures use up the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5);
    Duration::from_nanos((delay.as_nanos() as f64 * jitter_factor) as u64)
}
