//! Chaotic storage wrapper for fault injection testing
//!
//! Delegates to another backend but fails a seeded, reproducible fraction
//! of operations. Used to check that persistence failures flag slots instead
//! of corrupting state.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use eidbeacon_core::StorageKey;

use super::{Storage, StorageError};

/// Storage wrapper that randomly injects failures.
///
/// A failed operation never reaches the inner backend, so the inner state
/// reflects exactly the operations that reported success.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner` with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking state after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.next() < self.failure_rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> std::fmt::Debug for ChaoticStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaoticStorage")
            .field("failure_rate", &self.failure_rate)
            .field("operation_count", &self.operation_count())
            .finish_non_exhaustive()
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn store(&self, key: StorageKey, value: &[u8]) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.store(key, value)
    }

    fn load(&self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.roll()?;
        self.inner.load(key)
    }

    fn clear(&self, key: StorageKey) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.clear(key)
    }

    fn keys(&self) -> Result<Vec<StorageKey>, StorageError> {
        self.roll()?;
        self.inner.keys()
    }

    fn pending_operations(&self) -> usize {
        self.inner.pending_operations()
    }

    fn wait_for_idle(&self) -> Result<(), StorageError> {
        self.inner.wait_for_idle()
    }
}

#[cfg(test)]
mod tests {
    use eidbeacon_core::SlotIndex;

    use super::*;
    use crate::storage::MemoryStorage;

    fn slot_key(i: u8) -> StorageKey {
        StorageKey::Slot(SlotIndex::clamped(i % 5))
    }

    #[test]
    fn zero_failure_rate_never_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);

        for i in 0..100u8 {
            chaotic.store(slot_key(i), &[i]).expect("should not fail with 0% rate");
        }

        assert_eq!(chaotic.inner().len(), 5);
        assert_eq!(chaotic.operation_count(), 100);
    }

    #[test]
    fn full_failure_rate_always_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);

        assert!(chaotic.store(StorageKey::LockKey, &[0; 16]).is_err());
        assert!(chaotic.load(StorageKey::LockKey).is_err());
        assert!(chaotic.clear(StorageKey::LockKey).is_err());
        assert!(chaotic.inner().is_empty());
    }

    #[test]
    fn same_seed_same_failures() {
        let first = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);
        let second = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);

        for i in 0..100u8 {
            let a = first.store(slot_key(i), &[i]);
            let b = second.store(slot_key(i), &[i]);

            assert_eq!(a.is_ok(), b.is_ok(), "determinism violated at iteration {i}");
        }
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.5);
    }
}
