//! Retry policies for optimistic configuration updates
//!
//! Concurrent writers to the same study configuration race on a compare-and-swap
//! of the stored version. The loser receives a `ConfigurationConflict` and is
//! expected to re-resolve and retry. This module provides the bounded,
//! jittered exponential backoff used for those retries.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

/// A global seed for the random number generator used by seeded policies
///
/// This seed ensures reproducible backoff schedules in tests.
pub const RNG_SEED: u64 = 42;

/// Default number of attempts before giving up on a conflicting update
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Bounded exponential backoff with jitter
///
/// The delay before retry `n` (zero-based) is drawn uniformly from
/// `[0, min(max_delay, base_delay * 2^n)]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay cap for the first retry
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    seed: Option<u64>,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            seed: None,
        }
    }
}
impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            seed: None,
        }
    }

    /// A policy that never sleeps, useful for in-memory stores
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Fixes the jitter seed so that delay schedules are reproducible
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the jitter source for one retry loop
    pub(crate) fn rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        }
    }

    /// Computes the delay before retry number `retry` (zero-based)
    ///
    /// # Arguments
    ///
    /// * `retry` - Number of retries already performed
    /// * `rng` - The random number generator used for jitter
    ///
    /// # Type Parameters
    ///
    /// * `R` - A type that implements the `Rng` trait from the `rand` crate
    pub fn delay<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let cap = self
            .base_delay
            .saturating_mul(1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX))
            .min(self.max_delay);
        let cap_micros = cap.as_micros() as u64;
        if cap_micros == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rng.random_range(0..=cap_micros))
    }
}
