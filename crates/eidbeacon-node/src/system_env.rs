//! Production Environment implementation using system time and RNG.
//!
//! Time comes from `std::time::Instant`, sleeping from tokio and randomness
//! from the OS via getrandom. Production behaviour is therefore not
//! reproducible; the harness's `SimEnv` is.

use std::time::Duration;

use eidbeacon_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Security
///
/// Random bytes seed X25519 key pairs, unlock challenges, eTLM salts and
/// device addresses, so they come straight from the OS entropy source.
///
/// # Panics
///
/// Panics if the OS RNG fails. A beacon without working randomness would
/// hand out predictable challenges and keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - beacon cannot operate securely");
    }
}
