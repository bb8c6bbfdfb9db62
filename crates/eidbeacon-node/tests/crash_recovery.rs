//! Crash recovery tests for `RedbStorage`.
//!
//! A beacon is configured, dropped and booted again from the same database
//! file, simulating a power cycle.

use std::{path::Path, time::Duration};

use eidbeacon_core::{
    BeaconAction, BeaconConfig, BeaconEvent, DEFAULT_LOCK_KEY, FixedSensors, SlotIndex, SlotState,
};
use eidbeacon_crypto::encrypt_block;
use eidbeacon_harness::SimEnv;
use eidbeacon_node::{BeaconDriver, RedbStorage, Storage};
use eidbeacon_proto::{Characteristic, FrameType};
use tempfile::tempdir;

type Driver = BeaconDriver<SimEnv, RedbStorage, FixedSensors>;

const NEW_KEY: [u8; 16] = [0x3C; 16];

fn boot(path: &Path, seed: u64) -> Driver {
    let storage = RedbStorage::open(path).unwrap();
    let (driver, _) =
        BeaconDriver::boot(SimEnv::with_seed(seed), storage, BeaconConfig::default(), FixedSensors::default())
            .unwrap();
    driver
}

fn read(driver: &mut Driver, characteristic: Characteristic) -> Vec<u8> {
    driver
        .handle(BeaconEvent::Read(characteristic))
        .unwrap()
        .into_iter()
        .find_map(|action| match action {
            BeaconAction::ReadResponse { value, .. } => Some(value),
            _ => None,
        })
        .unwrap()
}

fn write(driver: &mut Driver, characteristic: Characteristic, value: &[u8]) {
    driver.handle(BeaconEvent::Write { characteristic, value: value.to_vec() }).unwrap();
}

fn connect_and_unlock(driver: &mut Driver, key: &[u8; 16]) {
    driver.handle(BeaconEvent::Connected).unwrap();
    let challenge: [u8; 16] = read(driver, Characteristic::Unlock).try_into().unwrap();
    write(driver, Characteristic::Unlock, &encrypt_block(key, &challenge));
}

#[test]
fn test_uid_slot_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("beacon.redb");
    let mut uid = vec![0x00];
    uid.extend(0x40u8..0x50);

    {
        let mut driver = boot(&db_path, 1);
        driver.handle(BeaconEvent::Start).unwrap();
        connect_and_unlock(&mut driver, &DEFAULT_LOCK_KEY);
        write(&mut driver, Characteristic::ActiveSlot, &[1]);
        write(&mut driver, Characteristic::SlotData, &uid);
        driver.handle(BeaconEvent::Disconnected).unwrap();
    }

    let driver = boot(&db_path, 2);
    let store = driver.core().slot_store();
    let slot = SlotIndex::clamped(1);

    assert_eq!(store.slot(slot).state(), SlotState::Configured(FrameType::Uid));
    assert_eq!(&store.get_frame(slot, driver.core().security())[2..18], &uid[1..]);
    assert_eq!(store.enumerate_configured(), vec![SlotIndex::FIRST, slot]);
}

#[test]
fn test_lock_key_change_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("beacon.redb");

    {
        let mut driver = boot(&db_path, 1);
        connect_and_unlock(&mut driver, &DEFAULT_LOCK_KEY);
        let mut change = vec![0x00];
        change.extend(encrypt_block(&DEFAULT_LOCK_KEY, &NEW_KEY));
        write(&mut driver, Characteristic::LockState, &change);
    }

    let storage = RedbStorage::open(&db_path).unwrap();
    assert_eq!(storage.load(eidbeacon_core::StorageKey::LockKey).unwrap(), Some(NEW_KEY.to_vec()));
    drop(storage);

    let mut driver = boot(&db_path, 2);
    connect_and_unlock(&mut driver, &NEW_KEY);
    assert_eq!(read(&mut driver, Characteristic::LockState), vec![0x01]);
}

#[test]
fn test_eid_slot_resumes_clock_and_identifier() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("beacon.redb");
    let identity_key = [0x77; 16];
    let slot = SlotIndex::clamped(2);

    let (clock, eid) = {
        let mut driver = boot(&db_path, 1);
        driver.handle(BeaconEvent::Start).unwrap();
        connect_and_unlock(&mut driver, &DEFAULT_LOCK_KEY);
        write(&mut driver, Characteristic::ActiveSlot, &[2]);
        let mut shared = vec![0x30];
        shared.extend(encrypt_block(&DEFAULT_LOCK_KEY, &identity_key));
        shared.push(8);
        write(&mut driver, Characteristic::SlotData, &shared);

        driver.env().advance(Duration::from_secs(100));
        driver.tick();
        driver.handle(BeaconEvent::Disconnected).unwrap();

        let security = driver.core().security();
        (security.clock_seconds(slot).unwrap(), security.eid(slot).unwrap())
    };

    let driver = boot(&db_path, 2);
    let security = driver.core().security();

    assert_eq!(
        driver.core().slot_store().slot(slot).state(),
        SlotState::Configured(FrameType::Eid)
    );
    assert_eq!(security.clock_seconds(slot), Some(clock));
    assert_eq!(security.eid(slot), Some(eid));
    assert_eq!(security.rotation_exponent(slot), Some(8));
}

#[test]
fn test_factory_reset_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("beacon.redb");

    {
        let mut driver = boot(&db_path, 1);
        connect_and_unlock(&mut driver, &DEFAULT_LOCK_KEY);
        write(&mut driver, Characteristic::ActiveSlot, &[3]);
        write(&mut driver, Characteristic::SlotData, &[0x20]);
        write(&mut driver, Characteristic::FactoryReset, &[0x0B]);
    }

    let storage = RedbStorage::open(&db_path).unwrap();
    assert_eq!(storage.keys().unwrap(), vec![eidbeacon_core::StorageKey::LockKey]);
    drop(storage);

    let driver = boot(&db_path, 2);
    assert_eq!(driver.core().slot_store().enumerate_configured(), vec![SlotIndex::FIRST]);
}
