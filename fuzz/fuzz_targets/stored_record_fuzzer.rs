//! Fuzz target for persisted record decoding
//!
//! Storage contents are untrusted after a crash or a flash fault. Records
//! are CBOR; boot decodes every one of them.
//!
//! # Strategy
//!
//! - Deeply nested: arrays and maps nested to arbitrary depth
//! - Huge lengths: CBOR claiming massive byte, string or array lengths
//! - Random bytes: arbitrary data under every storage key
//!
//! # Invariants
//!
//! - Decoding completes quickly and never panics
//! - Boot always produces a beacon; corrupt records are skipped
//! - A corrupt lock key falls back to the factory key and is rewritten

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use eidbeacon_core::{
    BeaconAction, BeaconConfig, BeaconCore, DEFAULT_LOCK_KEY, FixedSensors, SlotIndex, StorageKey,
    StoredSlot, persist,
};
use eidbeacon_harness::SimEnv;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum RecordAttack {
    DeeplyNested { depth: u8, map: bool },
    HugeLength { claimed_len_exponent: u8 },
    RandomRecords { lock_key: Option<Vec<u8>>, slots: Vec<(u8, Vec<u8>)>, key_pairs: Vec<(u8, Vec<u8>)> },
}

fuzz_target!(|attack: RecordAttack| {
    match attack {
        RecordAttack::DeeplyNested { depth, map } => {
            let bytes = create_nested_cbor(usize::from(depth % 64), map);
            let _ = persist::decode::<StoredSlot>(StorageKey::Slot(SlotIndex::FIRST), &bytes);
        }

        RecordAttack::HugeLength { claimed_len_exponent } => {
            let exponent = u32::from(claimed_len_exponent % 33);
            let claimed = 1u64.checked_shl(exponent).map_or(u32::MAX, |v| v.min(u64::from(u32::MAX)) as u32);
            for header in [0x5A, 0x7A, 0x9A] {
                let mut bytes = vec![header];
                bytes.extend_from_slice(&claimed.to_be_bytes());
                bytes.extend([0x01; 8]);
                let _ = persist::decode::<StoredSlot>(StorageKey::Slot(SlotIndex::FIRST), &bytes);
            }
        }

        RecordAttack::RandomRecords { lock_key, slots, key_pairs } => {
            let mut storage = BTreeMap::new();
            if let Some(bytes) = lock_key {
                storage.insert(StorageKey::LockKey, bytes);
            }
            for (index, bytes) in slots {
                storage.insert(StorageKey::Slot(SlotIndex::clamped(index)), bytes);
            }
            for (index, bytes) in key_pairs {
                storage.insert(StorageKey::KeyPair(SlotIndex::clamped(index)), bytes);
            }

            let valid_lock_key = storage.get(&StorageKey::LockKey).is_some_and(|key| key.len() == 16);
            let (core, actions) = BeaconCore::restore(
                BeaconConfig::default(),
                FixedSensors::default(),
                |key| storage.get(&key).cloned(),
                &SimEnv::with_seed(0),
            );

            let rewrote_lock_key = actions.iter().any(|action| {
                matches!(action, BeaconAction::Persist { key: StorageKey::LockKey, value } if value == &DEFAULT_LOCK_KEY)
            });
            assert_eq!(rewrote_lock_key, !valid_lock_key);
            for slot in core.slot_store().enumerate_configured() {
                assert!(eidbeacon_proto::power::is_supported(core.slot_store().slot(slot).tx_power()));
            }
        }
    }
});

fn create_nested_cbor(depth: usize, map: bool) -> Vec<u8> {
    let mut bytes = Vec::new();
    for _ in 0..depth {
        if map {
            bytes.extend_from_slice(&[0xA1, 0x61, b'a']);
        } else {
            bytes.push(0x81);
        }
    }
    bytes.push(0x01);
    bytes
}
