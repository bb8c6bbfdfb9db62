//! Redb-backed durable storage.
//!
//! Every store and clear is its own ACID write transaction; a crash leaves
//! either the old record or the new one.

use std::{path::Path, sync::Arc};

use eidbeacon_core::StorageKey;
use redb::{Database, ReadableTable, TableDefinition};

use super::{Storage, StorageError};

/// Table: kv
/// Key: `StorageKey` text form ("lock_key", "slot/N", "key_pair/N")
/// Value: record bytes as produced by the core
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a database at `path` and make sure the table exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(KV).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

impl Storage for RedbStorage {
    fn store(&self, key: StorageKey, value: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(KV).map_err(io)?;
            table.insert(key.to_bytes().as_slice(), value).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load(&self, key: StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KV).map_err(io)?;

        let value = table.get(key.to_bytes().as_slice()).map_err(io)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn clear(&self, key: StorageKey) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(KV).map_err(io)?;
            table.remove(key.to_bytes().as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<StorageKey>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KV).map_err(io)?;

        let mut keys = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let raw = key.value();
            let parsed = StorageKey::parse(raw)
                .ok_or_else(|| StorageError::InvalidKey(String::from_utf8_lossy(raw).into_owned()))?;
            keys.push(parsed);
        }
        Ok(keys)
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

#[cfg(test)]
mod tests {
    use eidbeacon_core::SlotIndex;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn store_load_clear() {
        let dir = tempdir().expect("tempdir");
        let storage = RedbStorage::open(dir.path().join("beacon.redb")).expect("open");
        let key = StorageKey::Slot(SlotIndex::clamped(2));

        storage.store(key, &[0xA1, 0x02]).expect("store");
        assert_eq!(storage.load(key).expect("load"), Some(vec![0xA1, 0x02]));

        storage.clear(key).expect("clear");
        assert_eq!(storage.load(key).expect("load"), None);
    }

    #[test]
    fn keys_parse_back() {
        let dir = tempdir().expect("tempdir");
        let storage = RedbStorage::open(dir.path().join("beacon.redb")).expect("open");
        let stored =
            [StorageKey::LockKey, StorageKey::Slot(SlotIndex::FIRST), StorageKey::KeyPair(SlotIndex::FIRST)];
        for key in stored {
            storage.store(key, b"x").expect("store");
        }

        let mut keys = storage.keys().expect("keys");
        keys.sort();

        let mut expected = stored.to_vec();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn foreign_key_is_reported() {
        let dir = tempdir().expect("tempdir");
        let storage = RedbStorage::open(dir.path().join("beacon.redb")).expect("open");
        let txn = storage.db.begin_write().expect("txn");
        {
            let mut table = txn.open_table(KV).expect("table");
            table.insert(b"slot/9".as_slice(), b"x".as_slice()).expect("insert");
        }
        txn.commit().expect("commit");

        assert_eq!(storage.keys(), Err(StorageError::InvalidKey("slot/9".to_string())));
    }
}
