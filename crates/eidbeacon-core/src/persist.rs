//! Persisted records and their storage keys.
//!
//! Records are CBOR-encoded. The lock key and key-pair secrets are stored as
//! raw bytes; slot records as [`StoredSlot`].

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::BeaconError, slot::SlotIndex};

/// Logical storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageKey {
    /// 16-byte lock key
    LockKey,
    /// Slot configuration record
    Slot(SlotIndex),
    /// 32-byte X25519 secret of a slot's key pair
    KeyPair(SlotIndex),
}

impl StorageKey {
    /// Byte form used by storage backends.
    pub fn to_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse the byte form.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        if text == "lock_key" {
            return Some(Self::LockKey);
        }
        let (kind, index) = text.split_once('/')?;
        let index: u8 = index.parse().ok()?;
        let slot = SlotIndex::clamped(index);
        if slot.to_u8() != index {
            return None;
        }
        match kind {
            "slot" => Some(Self::Slot(slot)),
            "key_pair" => Some(Self::KeyPair(slot)),
            _ => None,
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockKey => f.write_str("lock_key"),
            Self::Slot(slot) => write!(f, "slot/{slot}"),
            Self::KeyPair(slot) => write!(f, "key_pair/{slot}"),
        }
    }
}

/// What a slot broadcasts, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredContent {
    /// Unconfigured
    Empty,
    /// UID, URL or TLM slot: the write that configured it
    Frame(Vec<u8>),
    /// EID slot: enough to regenerate TK and EID after a reboot
    Eid {
        /// Rotation exponent
        rotation_exponent: u8,
        /// Time counter when persisted
        clock_seconds: u32,
        /// Identity key
        identity_key: [u8; 16],
    },
}

/// Persisted slot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSlot {
    /// Advertising interval in milliseconds
    pub interval_ms: u16,
    /// Radio transmit power in dBm
    pub tx_power: i8,
    /// Frame content
    pub content: StoredContent,
}

/// CBOR-encode a record stored under `key`.
pub fn encode<T: Serialize>(key: StorageKey, value: &T) -> Result<Vec<u8>, BeaconError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| BeaconError::PersistenceFailure {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(out)
}

/// Decode a CBOR record stored under `key`.
pub fn decode<T: DeserializeOwned>(key: StorageKey, bytes: &[u8]) -> Result<T, BeaconError> {
    ciborium::from_reader(bytes).map_err(|e| BeaconError::PersistenceFailure {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a fixed-size raw record (lock key, key-pair secret).
pub fn decode_raw<const N: usize>(key: StorageKey, bytes: &[u8]) -> Result<[u8; N], BeaconError> {
    bytes.try_into().map_err(|_| BeaconError::PersistenceFailure {
        key: key.to_string(),
        reason: format!("expected {N} bytes, found {}", bytes.len()),
    })
}
