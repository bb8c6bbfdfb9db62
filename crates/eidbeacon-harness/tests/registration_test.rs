//! EID registration end to end: a model phone registers a slot and must be
//! able to predict every EID the beacon broadcasts afterwards.

use std::time::Duration;

use eidbeacon_core::{
    BeaconConfig, DEFAULT_LOCK_KEY, SlotIndex, SlotState, StorageKey, StoredContent, StoredSlot,
    persist,
};
use eidbeacon_harness::{InvariantRegistry, ModelPhone, SimBeacon};
use eidbeacon_proto::{BroadcastFrame, Characteristic, EidReadback, FrameType};

fn registered_beacon(seed: u64, rotation_exponent: u8) -> (SimBeacon, ModelPhone) {
    let mut beacon = SimBeacon::new(seed);
    let mut phone = ModelPhone::new(beacon.env());
    beacon.start();
    beacon.connect();
    phone
        .register(&mut beacon, SlotIndex::FIRST, &DEFAULT_LOCK_KEY, rotation_exponent)
        .expect("registration succeeds");
    beacon.disconnect();
    (beacon, phone)
}

/// Register slot 0, then overwrite it with `write` in a fresh session.
fn rewrite_registered_slot(seed: u64, write: &[u8]) -> (SimBeacon, ModelPhone) {
    let (mut beacon, phone) = registered_beacon(seed, 10);
    assert!(beacon.storage().contains_key(&StorageKey::KeyPair(SlotIndex::FIRST)));
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");
    let _ = beacon.write(Characteristic::SlotData, write);
    beacon.disconnect();
    (beacon, phone)
}

fn assert_slot_forgotten(beacon: &SimBeacon) {
    let slot = SlotIndex::FIRST;
    let core = beacon.core();
    assert_eq!(core.slot_store().slot(slot).state(), SlotState::Unconfigured);
    assert!(!core.security().is_occupied(slot));
    assert_eq!(core.security().eid(slot), None);
    assert_eq!(core.security().public_key(slot), None);
    assert!(!beacon.storage().contains_key(&StorageKey::KeyPair(slot)));

    let stored = beacon.storage().get(&StorageKey::Slot(slot)).expect("slot record");
    let record: StoredSlot = persist::decode(StorageKey::Slot(slot), stored).expect("decodes");
    assert_eq!(record.content, StoredContent::Empty);
}

fn zero_key_exchange_write(rotation_exponent: u8) -> Vec<u8> {
    let mut write = vec![FrameType::Eid.to_u8()];
    write.extend_from_slice(&[0; 32]);
    write.push(rotation_exponent);
    write
}

#[test]
fn clearing_registered_slot_forgets_its_keys() {
    let (beacon, _) = rewrite_registered_slot(8, &[]);

    assert_slot_forgotten(&beacon);
}

#[test]
fn rejected_exponent_on_registered_slot_forgets_its_keys() {
    let (mut beacon, phone) = registered_beacon(9, 10);
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");
    beacon.write(Characteristic::SlotData, &phone.key_exchange_write(17)).expect("staged");
    beacon.disconnect();

    assert_slot_forgotten(&beacon);

    // Nothing rotates for a slot that no longer broadcasts an EID.
    let changes = beacon.address_changes();
    beacon.advance(Duration::from_secs(86_400));
    assert_eq!(beacon.address_changes(), changes);
}

#[test]
fn oversized_write_on_registered_slot_forgets_its_keys() {
    let (beacon, _) = rewrite_registered_slot(10, &[FrameType::Eid.to_u8(); 35]);

    assert_slot_forgotten(&beacon);
}

#[test]
fn failed_key_agreement_then_registration_persists_live_key_pair() {
    let (mut beacon, mut phone) = rewrite_registered_slot(11, &zero_key_exchange_write(10));
    assert_slot_forgotten(&beacon);

    beacon.connect();
    phone
        .register(&mut beacon, SlotIndex::FIRST, &DEFAULT_LOCK_KEY, 10)
        .expect("registration succeeds");
    beacon.disconnect();

    let live = beacon.core().security().key_pair_secret(SlotIndex::FIRST).expect("key pair");
    let stored = beacon.storage().get(&StorageKey::KeyPair(SlotIndex::FIRST)).expect("persisted");
    assert_eq!(stored.as_slice(), &live);

    beacon.restart(BeaconConfig::default());
    let slot = SlotIndex::FIRST;
    let clock = beacon.core().security().clock_seconds(slot).expect("occupied");
    assert_eq!(beacon.core().security().eid(slot), phone.predict_eid(slot, clock));
}

#[test]
fn ecdh_registration_configures_eid_slot() {
    let (beacon, phone) = registered_beacon(1, 10);
    let core = beacon.core();

    assert_eq!(core.slot_store().slot(SlotIndex::FIRST).state(), SlotState::Configured(FrameType::Eid));
    let clock = core.security().clock_seconds(SlotIndex::FIRST).expect("occupied");
    assert_eq!(phone.predict_eid(SlotIndex::FIRST, clock), core.security().eid(SlotIndex::FIRST));
    assert!(beacon.address_changes() >= 1);
}

#[test]
fn phone_predicts_broadcast_eids_across_rotations() {
    let (mut beacon, phone) = registered_beacon(2, 4);
    let registry = InvariantRegistry::standard();
    let start = beacon.env().elapsed();
    let clock_at_start = beacon.core().security().clock_seconds(SlotIndex::FIRST).expect("occupied");

    // 300 s crosses the 0xFF00 + 256 temporary-key rollover and many 16 s windows.
    beacon.advance(Duration::from_secs(300));
    registry.assert_all(&beacon.snapshot(), "after 300 s");

    let broadcasts = beacon.advertised_since(start);
    assert!(broadcasts.len() > 250);
    for (at, slot, frame) in broadcasts {
        let BroadcastFrame::Eid(eid_frame) = frame else {
            panic!("slot {slot} broadcast {frame:?}");
        };
        let clock = clock_at_start + (at - start).as_secs() as u32;
        assert_eq!(Some(*eid_frame.eid()), phone.predict_eid(slot, clock), "at {at:?}");
    }
}

#[test]
fn readback_reports_clock_and_eid() {
    let (mut beacon, phone) = registered_beacon(3, 8);
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");

    let readback =
        EidReadback::parse(&beacon.read(Characteristic::SlotData).expect("read")).expect("parses");

    assert_eq!(readback.rotation_exponent, 8);
    assert_eq!(Some(readback.eid), phone.predict_eid(SlotIndex::FIRST, readback.clock_seconds));
}

#[test]
fn identity_key_readback_is_wrapped_under_lock_key() {
    let (mut beacon, phone) = registered_beacon(4, 10);
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");

    let wrapped: [u8; 16] = beacon
        .read(Characteristic::EidIdentityKey)
        .expect("read")
        .try_into()
        .expect("16 bytes");

    let registration = phone.registration(SlotIndex::FIRST).expect("registered");
    assert_eq!(
        eidbeacon_crypto::decrypt_block(&DEFAULT_LOCK_KEY, &wrapped),
        *registration.identity_key.as_bytes()
    );
}

#[test]
fn shared_key_registration() {
    let mut beacon = SimBeacon::new(5);
    let mut phone = ModelPhone::new(beacon.env());
    beacon.start();
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");
    beacon.write(Characteristic::ActiveSlot, &[2]).expect("select");

    let ik = eidbeacon_crypto::AesKey::from_bytes([0x5C; 16]);
    let write = phone.shared_key_write(SlotIndex::clamped(2), &DEFAULT_LOCK_KEY, ik, 12);
    beacon.write(Characteristic::SlotData, &write).expect("write");

    let slot = SlotIndex::clamped(2);
    let clock = beacon.core().security().clock_seconds(slot).expect("occupied");
    assert_eq!(beacon.core().security().eid(slot), phone.predict_eid(slot, clock));
}

#[test]
fn invalid_rotation_exponent_is_rejected() {
    let mut beacon = SimBeacon::new(6);
    let phone = ModelPhone::new(beacon.env());
    beacon.start();
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");

    beacon.write(Characteristic::SlotData, &phone.key_exchange_write(17)).expect("staged");

    assert_eq!(beacon.core().slot_store().slot(SlotIndex::FIRST).state(), SlotState::Unconfigured);
    assert!(!beacon.core().security().is_occupied(SlotIndex::FIRST));
}

#[test]
fn encrypted_telemetry_opens_with_registered_key() {
    let (mut beacon, phone) = registered_beacon(7, 10);
    beacon.connect();
    beacon.unlock(&DEFAULT_LOCK_KEY).expect("unlock");
    beacon.write(Characteristic::ActiveSlot, &[1]).expect("select");
    beacon.write(Characteristic::SlotData, &[FrameType::Tlm.to_u8()]).expect("tlm");
    beacon.disconnect();
    let start = beacon.env().elapsed();

    beacon.advance(Duration::from_secs(5));

    let clock = beacon.core().security().clock_seconds(SlotIndex::FIRST).expect("occupied");
    let etlm: Vec<_> = beacon
        .advertised_since(start)
        .into_iter()
        .filter_map(|(_, _, frame)| match frame {
            BroadcastFrame::Etlm(frame) => Some(frame),
            _ => None,
        })
        .collect();
    assert!(!etlm.is_empty());
    for frame in etlm {
        // The EID window is 1024 s, so every frame in these 5 s shares one nonce prefix.
        let body = phone.open_etlm(SlotIndex::FIRST, clock, &frame).expect("tag verifies");
        assert_eq!(&body[..2], &[0, 0]);
    }
}
