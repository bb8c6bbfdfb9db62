//! Configuration resources exposed to a connected peer.
//!
//! Reads and writes arrive as [`BeaconEvent`](crate::BeaconEvent)s naming a
//! [`Characteristic`]; the transport that carries them is out of scope. Every
//! access passes [`check_access`] first. Accepted writes halt the radio for
//! one quiet interval so the next pass picks up the new configuration.

use eidbeacon_proto::{
    Characteristic, LockCommand, LockStateValue, ProtocolError,
    config::{FACTORY_RESET_COMMAND, MAX_SLOT_WRITE_LEN, parse_dbm, parse_interval},
    power,
};

use crate::{
    beacon::{BeaconAction, BeaconCore, LogLevel},
    env::Environment,
    error::BeaconError,
    persist::StorageKey,
    security::SecurityEvent,
    slot::{MAX_SLOTS, SlotIndex},
    telemetry::Sensors,
    work::WorkItem,
};

/// Kind of access a peer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read the resource
    Read,
    /// Write the resource
    Write,
}

/// Gate a resource access on the lock state.
///
/// The lock state is always readable. While locked only the unlock resource
/// is reachable; while unlocked everything but the unlock resource is.
///
/// # Errors
///
/// - `BeaconError::AccessDenied` otherwise
pub fn check_access(
    state: LockStateValue,
    characteristic: Characteristic,
    access: Access,
) -> Result<(), BeaconError> {
    let allowed = match (characteristic, access) {
        (Characteristic::LockState, Access::Read) => true,
        (Characteristic::Unlock, _) => !state.is_unlocked(),
        _ => state.is_unlocked(),
    };
    if allowed { Ok(()) } else { Err(BeaconError::AccessDenied(characteristic)) }
}

/// Per-connection configuration state.
#[derive(Debug, Clone, Default)]
pub struct ConfigSession {
    pub(crate) active_slot: SlotIndex,
    pub(crate) long_write: Vec<u8>,
    pub(crate) remain_connectable: bool,
    advertised_tx_power: [Option<i8>; MAX_SLOTS],
}

impl ConfigSession {
    pub(crate) fn connected(&mut self) {
        self.active_slot = SlotIndex::FIRST;
        self.long_write.clear();
    }

    pub(crate) fn disconnected(&mut self) {
        self.long_write.clear();
    }
}

impl<S: Sensors> BeaconCore<S> {
    pub(crate) fn handle_read<E: Environment>(
        &mut self,
        characteristic: Characteristic,
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        check_access(self.lock_state(), characteristic, Access::Read)?;

        let slot = self.session.active_slot;
        let value = match characteristic {
            Characteristic::BroadcastCapabilities => self.store.capabilities().to_bytes(),
            Characteristic::ActiveSlot => vec![slot.to_u8()],
            Characteristic::AdvertisingInterval => {
                self.store.slot(slot).interval_ms().to_be_bytes().to_vec()
            },
            Characteristic::RadioTxPower => vec![self.store.slot(slot).tx_power() as u8],
            Characteristic::AdvancedAdvertisedTxPower => {
                vec![self.advertised_tx_power(slot) as u8]
            },
            Characteristic::LockState => vec![self.lock_state().to_u8()],
            Characteristic::Unlock => self.security.generate_challenge(env).to_vec(),
            Characteristic::PublicEcdhKey => {
                self.security.public_key(slot).unwrap_or_default().to_vec()
            },
            Characteristic::EidIdentityKey => self.store.encrypted_identity_key(slot)?.to_vec(),
            Characteristic::SlotData => self.store.get_frame(slot, &self.security),
            Characteristic::FactoryReset => {
                return Err(BeaconError::AccessDenied(characteristic));
            },
            Characteristic::RemainConnectable => vec![0x01],
        };
        Ok(vec![BeaconAction::ReadResponse { characteristic, value }])
    }

    pub(crate) fn handle_write<E: Environment>(
        &mut self,
        characteristic: Characteristic,
        value: &[u8],
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        check_access(self.lock_state(), characteristic, Access::Write)?;

        let slot = self.session.active_slot;
        let applied = match characteristic {
            Characteristic::BroadcastCapabilities
            | Characteristic::PublicEcdhKey
            | Characteristic::EidIdentityKey => {
                return Err(BeaconError::AccessDenied(characteristic));
            },
            Characteristic::Unlock => return self.write_unlock(value, env),
            Characteristic::ActiveSlot => {
                let [raw] = value else {
                    return Err(length_error(characteristic, 1, value.len()));
                };
                self.session.active_slot = SlotIndex::clamped(*raw);
                Vec::new()
            },
            Characteristic::AdvertisingInterval => {
                let ms = parse_interval(value)
                    .map_err(|e| BeaconError::invalid_value(characteristic, &e))?;
                let applied = self.store.set_advertising_interval(slot, ms, false);
                self.persist_all_slots();
                vec![BeaconAction::log(
                    LogLevel::Debug,
                    format!("slot {slot} interval {applied} ms"),
                )]
            },
            Characteristic::RadioTxPower => {
                let dbm =
                    parse_dbm(value).map_err(|e| BeaconError::invalid_value(characteristic, &e))?;
                let applied = self.store.set_tx_power(slot, dbm, false);
                self.persist_all_slots();
                vec![BeaconAction::log(LogLevel::Debug, format!("slot {slot} tx power {applied} dBm"))]
            },
            Characteristic::AdvancedAdvertisedTxPower => {
                let dbm =
                    parse_dbm(value).map_err(|e| BeaconError::invalid_value(characteristic, &e))?;
                self.session.advertised_tx_power[slot.get()] = Some(dbm);
                Vec::new()
            },
            Characteristic::LockState => self.write_lock_state(value, env),
            Characteristic::SlotData => {
                let had_key_pair = self.security.public_key(slot).is_some();
                if let Err(err) = self.store.stage_write(slot, value, &mut self.security) {
                    self.write_rejected(slot, had_key_pair);
                    return Err(err);
                }
                self.work.push(WorkItem::EncodeSlot(slot));
                Vec::new()
            },
            Characteristic::FactoryReset => self.write_factory_reset(value, env)?,
            Characteristic::RemainConnectable => {
                let [flag] = value else {
                    return Err(length_error(characteristic, 1, value.len()));
                };
                self.session.remain_connectable = *flag != 0;
                Vec::new()
            },
        };

        let mut actions = self.schedule(env, |scheduler, src| scheduler.write_requested(src));
        actions.extend(applied);
        Ok(actions)
    }

    pub(crate) fn handle_prepare_write(
        &mut self,
        characteristic: Characteristic,
        offset: usize,
        value: &[u8],
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        check_access(self.lock_state(), characteristic, Access::Write)?;
        if characteristic != Characteristic::SlotData {
            return Err(BeaconError::InvalidValue {
                characteristic,
                reason: "long writes are only accepted for slot data".to_string(),
            });
        }

        let buffer = &mut self.session.long_write;
        if offset > buffer.len() {
            let reason = format!("offset {offset} past {} buffered bytes", buffer.len());
            buffer.clear();
            return Err(BeaconError::InvalidValue { characteristic, reason });
        }
        let length = offset + value.len();
        if length > MAX_SLOT_WRITE_LEN {
            let frame_type = buffer.first().or(value.first()).copied().unwrap_or_default();
            buffer.clear();
            return Err(BeaconError::InvalidFrameLength { frame_type, length });
        }
        buffer.truncate(offset);
        buffer.extend_from_slice(value);
        Ok(Vec::new())
    }

    pub(crate) fn handle_execute_write<E: Environment>(
        &mut self,
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        let buffer = std::mem::take(&mut self.session.long_write);
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        self.handle_write(Characteristic::SlotData, &buffer, env)
    }

    fn write_unlock<E: Environment>(
        &mut self,
        token: &[u8],
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        let events = self.security.verify_unlock(token);
        if events.is_empty() {
            return Err(BeaconError::AccessDenied(Characteristic::Unlock));
        }
        Ok(self.security_actions(&events, env))
    }

    fn write_lock_state<E: Environment>(&mut self, value: &[u8], env: &E) -> Vec<BeaconAction> {
        let command = LockCommand::parse(value);
        let mut actions = Vec::new();
        if let LockCommand::ChangeKey { encrypted_key, .. } = &command {
            let events = self.security.update_lock_key(encrypted_key);
            self.rewrap_identity_keys();
            actions.extend(self.security_actions(&events, env));
        }
        let state = command.resulting_state();
        self.security.lock_mut().set_state(state);
        actions.push(BeaconAction::log(LogLevel::Info, format!("lock state {state:?}")));
        actions
    }

    fn write_factory_reset<E: Environment>(
        &mut self,
        value: &[u8],
        env: &E,
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        if value != [FACTORY_RESET_COMMAND] {
            return Err(BeaconError::InvalidValue {
                characteristic: Characteristic::FactoryReset,
                reason: format!("expected {FACTORY_RESET_COMMAND:#04x}"),
            });
        }
        let events = self.store.factory_reset(&mut self.security);
        self.session.advertised_tx_power = [None; MAX_SLOTS];
        self.session.active_slot = SlotIndex::FIRST;

        let mut actions = vec![BeaconAction::log(LogLevel::Warn, "factory reset")];
        actions.extend(self.security_actions(&events, env));
        actions.extend(SlotIndex::all().map(|slot| BeaconAction::ClearPersisted(StorageKey::Slot(slot))));
        Ok(actions)
    }

    /// Cached read-back copies of identity keys are wrapped under the lock
    /// key and go stale when it changes.
    fn rewrap_identity_keys(&mut self) {
        let events: Vec<_> = self
            .store
            .enumerate_eid_slots()
            .into_iter()
            .filter_map(|slot| {
                self.security
                    .encrypted_identity_key(slot)
                    .map(|encrypted_identity_key| SecurityEvent::IdentityKeyReady {
                        slot,
                        encrypted_identity_key,
                    })
            })
            .collect();
        self.store.apply_security_events(&events);
    }

    fn advertised_tx_power(&self, slot: SlotIndex) -> i8 {
        self.session.advertised_tx_power[slot.get()]
            .unwrap_or_else(|| power::ranging_for(self.store.slot(slot).tx_power()).unwrap_or(0))
    }

    fn persist_all_slots(&mut self) {
        for slot in SlotIndex::all() {
            self.work.push(WorkItem::PersistSlot(slot));
        }
    }
}

fn length_error(characteristic: Characteristic, expected: usize, actual: usize) -> BeaconError {
    BeaconError::invalid_value(
        characteristic,
        &ProtocolError::InvalidValueLength { expected, actual },
    )
}

#[cfg(test)]
mod tests {
    use eidbeacon_crypto::{AesKey, encrypt_block};
    use eidbeacon_proto::FrameType;

    use super::*;
    use crate::{
        beacon::{BeaconConfig, BeaconEvent},
        lock::DEFAULT_LOCK_KEY,
        slot_store::SlotState,
        telemetry::FixedSensors,
        test_env::TestEnv,
    };

    fn beacon() -> BeaconCore<FixedSensors> {
        BeaconCore::new(
            BeaconConfig::default(),
            AesKey::from_bytes(DEFAULT_LOCK_KEY),
            FixedSensors::default(),
        )
    }

    fn read(core: &mut BeaconCore<FixedSensors>, env: &TestEnv, ch: Characteristic) -> Vec<u8> {
        let actions = core.process_event(BeaconEvent::Read(ch), env).expect("read allowed");
        match actions.as_slice() {
            [BeaconAction::ReadResponse { value, .. }] => value.clone(),
            other => panic!("unexpected actions {other:?}"),
        }
    }

    fn write(
        core: &mut BeaconCore<FixedSensors>,
        env: &TestEnv,
        ch: Characteristic,
        value: &[u8],
    ) -> Result<Vec<BeaconAction>, BeaconError> {
        core.process_event(BeaconEvent::Write { characteristic: ch, value: value.to_vec() }, env)
    }

    fn unlock(core: &mut BeaconCore<FixedSensors>, env: &TestEnv) {
        let challenge: [u8; 16] =
            read(core, env, Characteristic::Unlock).try_into().expect("16-byte challenge");
        let token = encrypt_block(&DEFAULT_LOCK_KEY, &challenge);
        write(core, env, Characteristic::Unlock, &token).expect("unlock accepted");
    }

    #[test]
    fn access_gate_table() {
        use Access::{Read, Write};
        use LockStateValue::{Locked, Unlocked, UnlockedNoAutoRelock};

        assert!(check_access(Locked, Characteristic::LockState, Read).is_ok());
        assert!(check_access(Locked, Characteristic::Unlock, Read).is_ok());
        assert!(check_access(Locked, Characteristic::Unlock, Write).is_ok());
        assert_eq!(
            check_access(Locked, Characteristic::SlotData, Read),
            Err(BeaconError::AccessDenied(Characteristic::SlotData))
        );
        assert!(check_access(Locked, Characteristic::LockState, Write).is_err());
        assert!(check_access(Unlocked, Characteristic::SlotData, Write).is_ok());
        assert!(check_access(Unlocked, Characteristic::Unlock, Read).is_err());
        assert!(check_access(UnlockedNoAutoRelock, Characteristic::LockState, Write).is_ok());
    }

    #[test]
    fn unlock_with_valid_token() {
        let env = TestEnv::with_seed(1);
        let mut core = beacon();

        unlock(&mut core, &env);

        assert_eq!(core.lock_state(), LockStateValue::Unlocked);
        assert_eq!(read(&mut core, &env, Characteristic::LockState), vec![0x01]);
    }

    #[test]
    fn wrong_token_stays_locked() {
        let env = TestEnv::with_seed(2);
        let mut core = beacon();
        let _ = read(&mut core, &env, Characteristic::Unlock);

        let err = write(&mut core, &env, Characteristic::Unlock, &[0u8; 16]).unwrap_err();

        assert_eq!(err, BeaconError::AccessDenied(Characteristic::Unlock));
        assert_eq!(core.lock_state(), LockStateValue::Locked);
    }

    #[test]
    fn active_slot_clamps_and_resets_on_connect() {
        let env = TestEnv::with_seed(3);
        let mut core = beacon();
        unlock(&mut core, &env);

        write(&mut core, &env, Characteristic::ActiveSlot, &[9]).expect("write");
        assert_eq!(core.active_slot(), SlotIndex::LAST);

        core.process_event(BeaconEvent::Connected, &env).expect("connect");
        assert_eq!(core.active_slot(), SlotIndex::FIRST);
    }

    #[test]
    fn uid_write_then_read_back() {
        let env = TestEnv::with_seed(4);
        let mut core = beacon();
        unlock(&mut core, &env);
        write(&mut core, &env, Characteristic::ActiveSlot, &[1]).expect("write");

        let mut uid = vec![0x00];
        uid.extend_from_slice(&[0xAB; 16]);
        let actions = write(&mut core, &env, Characteristic::SlotData, &uid).expect("staged");
        assert!(actions.contains(&BeaconAction::StopAdvertising));
        core.drain(&env);

        assert_eq!(
            core.slot_store().slot(SlotIndex::clamped(1)).state(),
            SlotState::Configured(FrameType::Uid)
        );
        let frame = read(&mut core, &env, Characteristic::SlotData);
        assert_eq!(frame.len(), 20);
        assert_eq!(&frame[2..18], &[0xAB; 16]);
    }

    #[test]
    fn short_uid_write_unconfigures_slot() {
        let env = TestEnv::with_seed(5);
        let mut core = beacon();
        unlock(&mut core, &env);

        let mut uid = vec![0x00];
        uid.extend_from_slice(&[0xAB; 15]);
        write(&mut core, &env, Characteristic::SlotData, &uid).expect("staged");
        let actions = core.drain(&env);

        assert!(actions.iter().any(|a| matches!(a, BeaconAction::Log { level: LogLevel::Warn, .. })));
        assert_eq!(core.slot_store().slot(SlotIndex::FIRST).state(), SlotState::Unconfigured);
        assert!(read(&mut core, &env, Characteristic::SlotData).is_empty());
    }

    #[test]
    fn long_write_accumulates_fragments() {
        let env = TestEnv::with_seed(6);
        let mut core = beacon();
        unlock(&mut core, &env);
        let mut uid = vec![0x00];
        uid.extend_from_slice(&[0x11; 16]);

        for (offset, chunk) in [(0, &uid[..10]), (10, &uid[10..])] {
            core.process_event(
                BeaconEvent::PrepareWrite {
                    characteristic: Characteristic::SlotData,
                    offset,
                    value: chunk.to_vec(),
                },
                &env,
            )
            .expect("fragment");
        }
        core.process_event(BeaconEvent::ExecuteWrite, &env).expect("execute");
        core.drain(&env);

        assert_eq!(
            core.slot_store().slot(SlotIndex::FIRST).state(),
            SlotState::Configured(FrameType::Uid)
        );
    }

    #[test]
    fn long_write_rejects_overflow() {
        let env = TestEnv::with_seed(7);
        let mut core = beacon();
        unlock(&mut core, &env);

        let err = core
            .process_event(
                BeaconEvent::PrepareWrite {
                    characteristic: Characteristic::SlotData,
                    offset: 0,
                    value: vec![0x30; 35],
                },
                &env,
            )
            .unwrap_err();

        assert_eq!(err, BeaconError::InvalidFrameLength { frame_type: 0x30, length: 35 });
    }

    #[test]
    fn lock_key_change_then_relock() {
        let env = TestEnv::with_seed(8);
        let mut core = beacon();
        unlock(&mut core, &env);
        let new_key = [0x42; 16];
        let mut value = vec![0x00];
        value.extend_from_slice(&encrypt_block(&DEFAULT_LOCK_KEY, &new_key));

        let actions = write(&mut core, &env, Characteristic::LockState, &value).expect("write");

        assert!(actions.contains(&BeaconAction::Persist {
            key: StorageKey::LockKey,
            value: new_key.to_vec()
        }));
        assert_eq!(core.lock_state(), LockStateValue::Locked);
        assert_eq!(core.security().lock().key(), &AesKey::from_bytes(new_key));
    }

    #[test]
    fn disable_auto_relock_survives_disconnect() {
        let env = TestEnv::with_seed(9);
        let mut core = beacon();
        core.process_event(BeaconEvent::Connected, &env).expect("connect");
        unlock(&mut core, &env);

        write(&mut core, &env, Characteristic::LockState, &[0x02]).expect("write");
        core.process_event(BeaconEvent::Disconnected, &env).expect("disconnect");

        assert_eq!(core.lock_state(), LockStateValue::UnlockedNoAutoRelock);
    }

    #[test]
    fn eid_identity_key_requires_eid_slot() {
        let env = TestEnv::with_seed(10);
        let mut core = beacon();
        unlock(&mut core, &env);

        let err = core
            .process_event(BeaconEvent::Read(Characteristic::EidIdentityKey), &env)
            .unwrap_err();

        assert_eq!(err, BeaconError::NotEidSlot(0));
        assert_eq!(err.att_status(false), 0x02);
    }

    #[test]
    fn factory_reset_clears_records() {
        let env = TestEnv::with_seed(11);
        let mut core = beacon();
        unlock(&mut core, &env);

        assert!(write(&mut core, &env, Characteristic::FactoryReset, &[0x01]).is_err());
        let actions = write(&mut core, &env, Characteristic::FactoryReset, &[0x0B]).expect("reset");

        let cleared = actions
            .iter()
            .filter(|a| matches!(a, BeaconAction::ClearPersisted(StorageKey::Slot(_))))
            .count();
        assert_eq!(cleared, MAX_SLOTS);
        assert_eq!(
            core.slot_store().slot(SlotIndex::FIRST).state(),
            SlotState::Configured(FrameType::Url)
        );
    }

    #[test]
    fn capabilities_read() {
        let env = TestEnv::with_seed(12);
        let mut core = beacon();
        unlock(&mut core, &env);

        let caps = read(&mut core, &env, Characteristic::BroadcastCapabilities);

        assert_eq!(&caps[..4], &[0x00, 5, 5, 0x02]);
        assert_eq!(&caps[4..6], &[0x00, 0x0F]);
    }

    #[test]
    fn rejected_write_does_not_halt_radio() {
        let env = TestEnv::with_seed(13);
        let mut core = beacon();
        unlock(&mut core, &env);
        core.process_event(BeaconEvent::Start, &env).expect("start");

        assert!(write(&mut core, &env, Characteristic::AdvertisingInterval, &[1, 2, 3]).is_err());
        assert!(core.scheduler().is_armed(crate::scheduler::Timer::Interval));
    }
}
