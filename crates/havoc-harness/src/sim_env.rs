//! Simulation environment: Turmoil virtual time and a seeded RNG.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use havoc_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Environment for simulated sessions.
///
/// - **Virtual Time**: `now()` and `sleep()` use the tokio clock, which
///   Turmoil drives, so a 30 second idle window passes instantly.
/// - **Seeded RNG**: session keys, tokens and schedule draws come from a
///   ChaCha20 stream, so a seed replays the same session byte for byte.
///
/// Clones share one RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}
