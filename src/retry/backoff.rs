//! Exponential backoff with jitter.
//!
//! Delays grow as `initial_delay * 2^(attempt - 1)`, are capped at
//! `max_delay` before jitter is applied, then perturbed by up to ±25% and
//! floored at `min_delay`. The cap-before-jitter order bounds every delay at
//! `max_delay * 1.25` regardless of attempt number.

use std::sync::Mutex;
use std::time::Duration;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Fraction of the capped delay used for multiplicative jitter.
const JITTER_FRACTION: f64 = 0.25;

/// Default floor applied after jitter.
const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);

/// Largest exponent fed into the doubling; beyond this the cap dominates.
const MAX_EXPONENT: u32 = 31;

/// Backoff policy mapping an attempt number to a delay.
///
/// The policy is pure apart from its random source. The source is a
/// `ChaCha8Rng` so tests can construct a [`BackoffPolicy::seeded`] policy
/// and get a reproducible delay sequence.
#[derive(Debug)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    min_delay: Duration,
    rng: Mutex<ChaCha8Rng>,
}

impl BackoffPolicy {
    /// Creates a policy with an OS-seeded random source.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::with_rng(
            initial_delay,
            max_delay,
            ChaCha8Rng::from_rng(&mut rand::rng()),
        )
    }

    /// Creates a policy with a deterministic random source.
    pub fn seeded(initial_delay: Duration, max_delay: Duration, seed: u64) -> Self {
        Self::with_rng(initial_delay, max_delay, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(initial_delay: Duration, max_delay: Duration, rng: ChaCha8Rng) -> Self {
        Self {
            initial_delay,
            max_delay,
            min_delay: DEFAULT_MIN_DELAY,
            rng: Mutex::new(rng),
        }
    }

    /// Sets the floor applied after jitter.
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Computes the delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = base.min(self.max_delay);

        let jitter: f64 = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.random_range(-JITTER_FRACTION..=JITTER_FRACTION)
        };

        capped.mul_f64(1.0 + jitter).max(self.min_delay)
    }
}
