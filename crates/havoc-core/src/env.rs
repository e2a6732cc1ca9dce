//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples monitor logic from system resources
//! (time and randomness). Session keys, scheduling jitter and payload choice
//! all draw from it, so a seeded simulation replays the same cycle exactly.
//!
//! The environment is implemented twice:
//!
//! 1. `SimEnv` (havoc-harness): Turmoil's virtual time and a seeded RNG
//! 2. [`SystemEnv`]: the real clock and OS entropy
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Duration;

use rand::{RngCore, rngs::OsRng};

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production, because session secret keys are drawn from it
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (the cycle orchestrator) sleeps; the session's idle
    /// timer runs on the tokio clock, which Turmoil also virtualizes.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fills the provided buffer with random bytes, reporting an entropy
    /// source failure instead of panicking.
    ///
    /// Used where the caller can recover, such as session key generation.
    ///
    /// # Errors
    ///
    /// Returns [`rand::Error`] if the entropy source is unavailable.
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), rand::Error> {
        self.random_bytes(buffer);
        Ok(())
    }

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random index in `0..bound`.
    ///
    /// Modulo bias is negligible for the small bounds used here (payload
    /// lists, interval widths in seconds).
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    fn random_below(&self, bound: u64) -> u64 {
        assert!(bound > 0, "random_below requires a non-zero bound");
        self.random_u64() % bound
    }

    /// Picks a duration uniformly in `min..=max` at whole-second granularity.
    ///
    /// Returns `min` if the range is empty or inverted.
    fn random_duration(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span = max.as_secs() - min.as_secs();
        min + Duration::from_secs(self.random_below(span + 1))
    }
}

/// Production environment: system clock, tokio timers and OS entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }

    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(buffer)
    }
}
