#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use eidbeacon_core::StorageKey;

use super::{Storage, StorageError};

/// In-memory storage for tests and diskless runs.
///
/// Records live in an `Arc<Mutex<HashMap>>`, so clones see the same state.
/// A poisoned lock is recovered: every operation replaces whole records and
/// cannot leave one half-written.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<StorageKey, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Whether no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<StorageKey, Vec<u8>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").field("records", &self.len()).finish()
    }
}

impl Storage for MemoryStorage {
    fn store(&self, key: StorageKey, value: &[u8]) -> Result<(), StorageError> {
        self.records().insert(key, value.to_vec());
        Ok(())
    }

    fn load(&self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records().get(&key).cloned())
    }

    fn clear(&self, key: StorageKey) -> Result<(), StorageError> {
        self.records().remove(&key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<StorageKey>, StorageError> {
        Ok(self.records().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use eidbeacon_core::SlotIndex;

    use super::*;

    #[test]
    fn store_then_load() {
        let storage = MemoryStorage::new();

        storage.store(StorageKey::LockKey, &[0xAA; 16]).expect("store");

        assert_eq!(storage.load(StorageKey::LockKey).expect("load"), Some(vec![0xAA; 16]));
        assert_eq!(storage.load(StorageKey::Slot(SlotIndex::FIRST)).expect("load"), None);
    }

    #[test]
    fn store_replaces_record() {
        let storage = MemoryStorage::new();
        let key = StorageKey::Slot(SlotIndex::clamped(3));

        storage.store(key, &[1, 2, 3]).expect("store");
        storage.store(key, &[4]).expect("store");

        assert_eq!(storage.load(key).expect("load"), Some(vec![4]));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let storage = MemoryStorage::new();
        let key = StorageKey::KeyPair(SlotIndex::FIRST);
        storage.store(key, &[0; 32]).expect("store");

        storage.clear(key).expect("clear");
        storage.clear(key).expect("clear again");

        assert!(storage.is_empty());
    }

    #[test]
    fn clones_share_records() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();

        clone.store(StorageKey::LockKey, &[7; 16]).expect("store");

        assert_eq!(storage.keys().expect("keys"), vec![StorageKey::LockKey]);
    }
}
