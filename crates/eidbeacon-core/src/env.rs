//! Environment abstraction for deterministic testing.
//!
//! Decouples beacon logic from system resources (time, randomness). The
//! simulation harness provides a virtual clock and a seeded RNG; production
//! uses the OS clock and entropy source.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production,
///   since it feeds key pairs, unlock challenges and eTLM salts
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`; simulation uses a virtual
    /// `Duration` since start.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps; the state machines never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fixed-size random array (key material, challenges, salts, addresses).
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        u64::from_be_bytes(self.random_array())
    }
}
