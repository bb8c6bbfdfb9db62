//! Storage abstraction for persisted beacon state.
//!
//! Records are opaque byte strings under a logical [`StorageKey`]; encoding
//! is the core's concern. The trait is synchronous: a successful `store`
//! or `clear` is durable when it returns.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
use eidbeacon_core::StorageKey;
pub use error::StorageError;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// Key-value storage for the lock key, slot records and key-pair secrets.
///
/// Must be Clone (the driver and tests may hold the same backend), Send +
/// Sync, and synchronous. Clones share the same underlying records.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Write `value` under `key`, replacing any previous record.
    fn store(&self, key: StorageKey, value: &[u8]) -> Result<(), StorageError>;

    /// Record stored under `key`, `None` if absent.
    fn load(&self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete the record under `key`. Deleting an absent key succeeds.
    fn clear(&self, key: StorageKey) -> Result<(), StorageError>;

    /// Every key with a record. Order is not guaranteed.
    fn keys(&self) -> Result<Vec<StorageKey>, StorageError>;

    /// Operations accepted but not yet durable.
    ///
    /// Synchronous backends complete every operation before returning.
    fn pending_operations(&self) -> usize {
        0
    }

    /// Block until [`Self::pending_operations`] reaches zero.
    fn wait_for_idle(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
