use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jittered exponential backoff between consecutive failed watch polls.
pub struct ExponentialBackoff {
    min_interval: Duration,
    max_interval: Duration,
    jitter_rate: f64,
    rng: StdRng,
}

impl ExponentialBackoff {
    pub fn new(min_interval: Duration, max_interval: Duration, jitter_rate: f64) -> Self {
        Self::with_rng(min_interval, max_interval, jitter_rate, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new), with a caller-provided generator so the
    /// delay sequence is reproducible under a fixed seed.
    pub fn with_rng(
        min_interval: Duration,
        max_interval: Duration,
        jitter_rate: f64,
        rng: StdRng,
    ) -> Self {
        Self {
            min_interval,
            max_interval,
            jitter_rate,
            rng,
        }
    }

    /// The delay to sleep before attempt `attempt` (1-based): the minimum
    /// interval doubled per failed attempt, saturating at the maximum
    /// interval, with a uniform jitter of ±`jitter_rate` applied.
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let factor = self
            .rng
            .gen_range(1.0 - self.jitter_rate..=1.0 + self.jitter_rate);
        let jittered = base.as_secs_f64() * factor;
        if jittered.is_finite() && jittered > 0.0 {
            Duration::from_secs_f64(jittered)
        } else {
            Duration::ZERO
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.min_interval;
        }
        // The exponent clamp keeps the f64 arithmetic finite; anything past
        // it already saturates at the maximum interval.
        let exponent = (attempt - 1).min(63);
        let scaled = self.min_interval.as_secs_f64() * (2.0f64).powi(exponent as i32);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn seeded(seed: u64) -> ExponentialBackoff {
        ExponentialBackoff::with_rng(
            Duration::from_secs(2),
            Duration::from_secs(60),
            0.2,
            StdRng::seed_from_u64(seed),
        )
    }

    #[test]
    fn delays_stay_within_jitter_bounds() {
        let mut backoff = seeded(42);
        for attempt in 1..=5u32 {
            let base = if attempt == 1 {
                2.0
            } else {
                (2.0f64 * 2.0f64.powi(attempt as i32 - 1)).min(60.0)
            };
            let delay = backoff.next_delay(attempt).as_secs_f64();
            assert!(
                delay >= base * 0.8 && delay <= base * 1.2,
                "attempt {attempt}: delay {delay} outside [{}, {}]",
                base * 0.8,
                base * 1.2
            );
        }
    }

    #[test]
    fn saturates_at_max_interval() {
        let mut backoff = seeded(7);
        for attempt in [6, 7, 100, u32::MAX] {
            let delay = backoff.next_delay(attempt).as_secs_f64();
            assert!(delay >= 60.0 * 0.8, "attempt {attempt}: delay {delay}");
            assert!(delay <= 60.0 * 1.2, "attempt {attempt}: delay {delay}");
        }
    }

    #[test]
    fn deterministic_under_a_fixed_seed() {
        let mut first = seeded(1234);
        let mut second = seeded(1234);
        for attempt in 1..=10 {
            assert_eq!(first.next_delay(attempt), second.next_delay(attempt));
        }
    }

    #[test]
    fn base_grows_monotonically_until_saturation() {
        let backoff = seeded(0);
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let base = backoff.base_delay(attempt);
            assert!(base >= previous, "attempt {attempt}");
            previous = base;
        }
        assert_eq!(previous, Duration::from_secs(60));
    }
}
