//! Exponential backoff with jitter.
//!
//! Each key tracks its own failure count; the delay doubles per consecutive
//! failure and is capped at `max`. A small random jitter is mixed in so that
//! many keys failing at once don't all wake up on the same tick.

use std::time::Duration;

use rand::Rng;

/// Stateless exponential-backoff-with-jitter calculator, keyed externally by
/// a per-item failure count.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Creates a calculator with the given base delay and ceiling.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the delay for the given 0-indexed failure count, jittered by
    /// up to +/-25%.
    #[must_use]
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        let exp = failure_count.min(32);
        let unjittered = self
            .base
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .unwrap_or(self.max)
            .min(self.max);

        let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
        let jittered_secs = unjittered.as_secs_f64() * (1.0 + jitter_frac);
        Duration::from_secs_f64(jittered_secs.max(0.0)).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_with_failure_count() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        // Jitter is +/-25%, so compare bounds rather than exact values.
        let d0 = backoff.delay_for(0);
        let d3 = backoff.delay_for(3);
        assert!(d0 <= Duration::from_millis(1_250));
        assert!(d3 >= Duration::from_secs(6) && d3 <= Duration::from_secs(10));
    }

    #[test]
    fn caps_at_max() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert!(backoff.delay_for(20) <= Duration::from_secs(10));
    }
}
