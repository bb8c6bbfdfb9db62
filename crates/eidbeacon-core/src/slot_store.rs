//! Broadcast slot configuration.
//!
//! A fixed arena of [`MAX_SLOTS`] records addressed by [`SlotIndex`]. Each
//! slot remembers the write that configured it, its interval and transmit
//! power, and the encoded frame the scheduler puts on the air.
//!
//! Slot-data writes take two steps. [`SlotStore::stage_write`] stores the
//! bytes and marks the slot [`SlotState::Staged`]; [`SlotStore::encode_staged`]
//! later validates them and builds the frame, handing EID writes to the
//! [`SecurityEngine`]. The scheduler never sees a frame for a slot that is
//! staged or waiting for key material.

use eidbeacon_crypto::AesKey;
use eidbeacon_proto::{
    BroadcastCapabilities, BroadcastFrame, EidFrame, FrameType, SlotWrite, UidFrame, UrlFrame,
    config::MAX_SLOT_WRITE_LEN, power,
};

use crate::{
    env::Environment,
    error::BeaconError,
    persist::{StoredContent, StoredSlot},
    security::{SecurityEngine, SecurityEvent},
    slot::{MAX_SLOTS, SlotIndex},
};

/// Shortest accepted advertising interval.
pub const MIN_INTERVAL_MS: u16 = 100;

/// Longest accepted advertising interval.
pub const MAX_INTERVAL_MS: u16 = 10_240;

/// Interval of a factory-fresh beacon.
pub const DEFAULT_INTERVAL_MS: u16 = 1000;

/// Transmit power of a factory-fresh beacon.
pub const DEFAULT_TX_POWER: i8 = 0;

/// Slot 0 of a factory-fresh beacon: `http://www.nordicsemi.com`.
pub const DEFAULT_SLOT_WRITE: &[u8] =
    &[0x10, 0x00, b'n', b'o', b'r', b'd', b'i', b'c', b's', b'e', b'm', b'i', 0x00];

/// Slot store configuration.
#[derive(Debug, Clone)]
pub struct SlotStoreConfig {
    /// Advertised capabilities; decides whether interval and transmit power
    /// are per slot or global
    pub capabilities: BroadcastCapabilities,
    /// Factory interval for every slot
    pub default_interval_ms: u16,
    /// Factory transmit power for every slot
    pub default_tx_power: i8,
    /// Factory slot-data write for slot 0
    pub default_write: Vec<u8>,
}

impl Default for SlotStoreConfig {
    fn default() -> Self {
        Self {
            capabilities: BroadcastCapabilities::standard(MAX_SLOTS as u8),
            default_interval_ms: DEFAULT_INTERVAL_MS,
            default_tx_power: DEFAULT_TX_POWER,
            default_write: DEFAULT_SLOT_WRITE.to_vec(),
        }
    }
}

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing to broadcast
    Unconfigured,
    /// Write stored, not yet validated or encoded
    Staged,
    /// EID write accepted, key material not yet derived
    AwaitingKeyMaterial,
    /// Frame ready
    Configured(FrameType),
}

/// One broadcast slot.
#[derive(Debug, Clone)]
pub struct AdvertisingSlot {
    write_buffer: Vec<u8>,
    state: SlotState,
    interval_ms: u16,
    tx_power: i8,
    frame: Option<BroadcastFrame>,
    last_broadcast: Option<BroadcastFrame>,
    encrypted_identity_key: Option<[u8; 16]>,
    unpersisted: bool,
}

impl AdvertisingSlot {
    fn empty(interval_ms: u16, tx_power: i8) -> Self {
        Self {
            write_buffer: Vec::new(),
            state: SlotState::Unconfigured,
            interval_ms,
            tx_power,
            frame: None,
            last_broadcast: None,
            encrypted_identity_key: None,
            unpersisted: false,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Advertising interval in milliseconds.
    pub fn interval_ms(&self) -> u16 {
        self.interval_ms
    }

    /// Radio transmit power in dBm.
    pub fn tx_power(&self) -> i8 {
        self.tx_power
    }

    /// The write that configured this slot.
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Whether the last persistence attempt for this slot failed.
    pub fn is_unpersisted(&self) -> bool {
        self.unpersisted
    }
}

/// The slot arena.
#[derive(Debug, Clone)]
pub struct SlotStore {
    config: SlotStoreConfig,
    slots: [AdvertisingSlot; MAX_SLOTS],
}

impl SlotStore {
    /// Store holding the factory defaults.
    pub fn new(config: SlotStoreConfig) -> Self {
        let interval = config.default_interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
        let tx_power = if power::is_supported(config.default_tx_power) {
            config.default_tx_power
        } else {
            DEFAULT_TX_POWER
        };
        let mut store = Self {
            slots: std::array::from_fn(|_| AdvertisingSlot::empty(interval, tx_power)),
            config,
        };
        store.install_default_write();
        store
    }

    /// Store the raw bytes of a slot-data write and mark the slot staged.
    ///
    /// # Errors
    ///
    /// - `BeaconError::InvalidFrameLength` if the write exceeds the longest
    ///   slot write; the slot is left unconfigured and its key material is
    ///   destroyed
    pub fn stage_write(
        &mut self,
        slot: SlotIndex,
        bytes: &[u8],
        security: &mut SecurityEngine,
    ) -> Result<(), BeaconError> {
        if bytes.len() > MAX_SLOT_WRITE_LEN {
            self.reject(slot, security);
            return Err(BeaconError::InvalidFrameLength {
                frame_type: bytes[0],
                length: bytes.len(),
            });
        }
        let state = &mut self.slots[slot.get()];
        state.write_buffer = bytes.to_vec();
        state.state = SlotState::Staged;
        state.frame = None;
        state.last_broadcast = None;
        Ok(())
    }

    /// Validate and encode a staged write.
    ///
    /// Non-EID writes destroy the slot's security state. EID writes go to the
    /// security engine; the slot becomes `Configured(Eid)` when its first EID
    /// is derived. Returns the security events produced.
    ///
    /// # Errors
    ///
    /// - `BeaconError::InvalidFrameLength` / `UnsupportedFrameType` for a
    ///   malformed write
    /// - `BeaconError::InvalidRotationExponent` / `KeyAgreementFailed` from
    ///   EID registration
    ///
    /// On error the slot is unconfigured and any key material it held,
    /// including its key pair, is destroyed.
    pub fn encode_staged<E: Environment>(
        &mut self,
        slot: SlotIndex,
        security: &mut SecurityEngine,
        env: &E,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        if self.slots[slot.get()].state != SlotState::Staged {
            return Ok(Vec::new());
        }
        let write = match SlotWrite::parse(&self.slots[slot.get()].write_buffer) {
            Ok(write) => write,
            Err(err) => {
                self.reject(slot, security);
                return Err(err.into());
            },
        };

        let mut events = Vec::new();
        if write.frame_type() != Some(FrameType::Eid) {
            events.extend(security.destroy_slot_state(slot));
            self.slots[slot.get()].encrypted_identity_key = None;
        }

        let result = match &write {
            SlotWrite::EidKeyExchange { peer_public_key, rotation_exponent } => {
                self.await_key_material(slot);
                security.receive_peer_public_key(slot, peer_public_key, *rotation_exponent, env)
            },
            SlotWrite::EidSharedKey { encrypted_identity_key, rotation_exponent } => {
                self.await_key_material(slot);
                security.receive_shared_identity_key(
                    slot,
                    encrypted_identity_key,
                    *rotation_exponent,
                )
            },
            plain => self.encode_plain(slot, plain).map(|()| Vec::new()),
        };

        match result {
            Ok(registration) => {
                self.apply_security_events(&registration);
                events.extend(registration);
                Ok(events)
            },
            Err(err) => {
                self.reject(slot, security);
                Err(err)
            },
        }
    }

    /// Stage and immediately encode a slot-data write.
    ///
    /// # Errors
    ///
    /// See [`SlotStore::stage_write`] and [`SlotStore::encode_staged`].
    pub fn set_frame<E: Environment>(
        &mut self,
        slot: SlotIndex,
        bytes: &[u8],
        security: &mut SecurityEngine,
        env: &E,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        self.stage_write(slot, bytes, security)?;
        self.encode_staged(slot, security, env)
    }

    /// Slot-data read-back.
    ///
    /// UID and URL slots return their frame, TLM slots the last telemetry
    /// frame broadcast, EID slots `0x30 | k | clock | eid`. Anything not yet
    /// configured reads as empty.
    pub fn get_frame(&self, slot: SlotIndex, security: &SecurityEngine) -> Vec<u8> {
        let state = &self.slots[slot.get()];
        match state.state {
            SlotState::Unconfigured | SlotState::Staged | SlotState::AwaitingKeyMaterial => {
                Vec::new()
            },
            SlotState::Configured(FrameType::Eid) => security
                .readback(slot)
                .map(|readback| readback.to_bytes().to_vec())
                .unwrap_or_default(),
            SlotState::Configured(FrameType::Tlm) => {
                state.last_broadcast.as_ref().map(BroadcastFrame::to_vec).unwrap_or_default()
            },
            SlotState::Configured(_) => {
                state.frame.as_ref().map(BroadcastFrame::to_vec).unwrap_or_default()
            },
        }
    }

    /// Set the advertising interval, clamped to
    /// [`MIN_INTERVAL_MS`]..=[`MAX_INTERVAL_MS`].
    ///
    /// Applies to every slot when `global` is set or the beacon does not
    /// support per-slot intervals. Returns the interval applied.
    pub fn set_advertising_interval(&mut self, slot: SlotIndex, ms: u16, global: bool) -> u16 {
        let ms = ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
        if global || !self.config.capabilities.variable_interval() {
            for state in &mut self.slots {
                state.interval_ms = ms;
            }
        } else {
            self.slots[slot.get()].interval_ms = ms;
        }
        ms
    }

    /// Set the radio transmit power.
    ///
    /// Unsupported values leave the power unchanged. Applies to every slot
    /// when `global` is set or the beacon does not support per-slot power.
    /// Returns the power in effect for `slot`.
    pub fn set_tx_power(&mut self, slot: SlotIndex, dbm: i8, global: bool) -> i8 {
        if !power::is_supported(dbm) {
            self.refresh_ranging(slot);
            return self.slots[slot.get()].tx_power;
        }
        if global || !self.config.capabilities.variable_tx_power() {
            for target in SlotIndex::all() {
                self.slots[target.get()].tx_power = dbm;
                self.refresh_ranging(target);
            }
        } else {
            self.slots[slot.get()].tx_power = dbm;
            self.refresh_ranging(slot);
        }
        dbm
    }

    /// Slots whose write buffer configures a frame, in index order.
    pub fn enumerate_configured(&self) -> Vec<SlotIndex> {
        SlotIndex::all().filter(|slot| self.is_configured(*slot)).collect()
    }

    /// Slots with a derived EID, in index order.
    pub fn enumerate_eid_slots(&self) -> Vec<SlotIndex> {
        SlotIndex::all()
            .filter(|slot| self.slots[slot.get()].state == SlotState::Configured(FrameType::Eid))
            .collect()
    }

    /// Whether telemetry must go out encrypted: a TLM slot and at least one
    /// EID slot are configured.
    pub fn tlm_requires_encryption(&self) -> bool {
        let has_tlm = self.slots.iter().any(|s| s.state == SlotState::Configured(FrameType::Tlm));
        has_tlm && !self.enumerate_eid_slots().is_empty()
    }

    /// Whether the slot's write buffer is non-empty and not a single zero.
    pub fn is_configured(&self, slot: SlotIndex) -> bool {
        let buffer = &self.slots[slot.get()].write_buffer;
        !buffer.is_empty() && buffer.as_slice() != [0x00]
    }

    /// Whether the slot broadcasts telemetry.
    pub fn is_tlm(&self, slot: SlotIndex) -> bool {
        self.slots[slot.get()].state == SlotState::Configured(FrameType::Tlm)
    }

    /// Encoded UID, URL or EID frame, if ready.
    pub fn ready_frame(&self, slot: SlotIndex) -> Option<&BroadcastFrame> {
        let state = &self.slots[slot.get()];
        match state.state {
            SlotState::Configured(FrameType::Tlm) => None,
            SlotState::Configured(_) => state.frame.as_ref(),
            _ => None,
        }
    }

    /// Remember the telemetry frame last broadcast from a TLM slot.
    pub fn record_broadcast(&mut self, slot: SlotIndex, frame: BroadcastFrame) {
        self.slots[slot.get()].last_broadcast = Some(frame);
    }

    /// Whether a TLM slot has broadcast anything yet.
    pub fn has_broadcast(&self, slot: SlotIndex) -> bool {
        self.slots[slot.get()].last_broadcast.is_some()
    }

    /// Interval of slot 0, which paces the whole schedule.
    pub fn global_interval_ms(&self) -> u16 {
        self.slots[SlotIndex::FIRST.get()].interval_ms
    }

    /// Store an interval the scheduler had to enlarge.
    pub fn publish_global_interval(&mut self, ms: u16) {
        for state in &mut self.slots {
            state.interval_ms = ms;
        }
    }

    /// Identity key of an EID slot, encrypted under the lock key.
    ///
    /// # Errors
    ///
    /// - `BeaconError::NotEidSlot` if the slot is not a ready EID slot
    pub fn encrypted_identity_key(&self, slot: SlotIndex) -> Result<[u8; 16], BeaconError> {
        let state = &self.slots[slot.get()];
        match (state.state, state.encrypted_identity_key) {
            (SlotState::Configured(FrameType::Eid), Some(key)) => Ok(key),
            _ => Err(BeaconError::NotEidSlot(slot.to_u8())),
        }
    }

    /// Update frames and caches from security events.
    pub fn apply_security_events(&mut self, events: &[SecurityEvent]) {
        for event in events {
            match event {
                SecurityEvent::EidRotated { slot, eid } => {
                    let state = &mut self.slots[slot.get()];
                    if is_eid_bound(state.state) {
                        let ranging = ranging_data(state.tx_power);
                        state.frame = Some(BroadcastFrame::Eid(EidFrame::new(ranging, *eid)));
                        state.state = SlotState::Configured(FrameType::Eid);
                    }
                },
                SecurityEvent::IdentityKeyReady { slot, encrypted_identity_key } => {
                    let state = &mut self.slots[slot.get()];
                    if is_eid_bound(state.state) {
                        state.encrypted_identity_key = Some(*encrypted_identity_key);
                    }
                },
                _ => {},
            }
        }
    }

    /// Persistence record for a slot.
    ///
    /// `None` while a write is staged or waiting for key material.
    pub fn stored_slot(&self, slot: SlotIndex, security: &SecurityEngine) -> Option<StoredSlot> {
        let state = &self.slots[slot.get()];
        let content = match state.state {
            SlotState::Unconfigured => StoredContent::Empty,
            SlotState::Staged | SlotState::AwaitingKeyMaterial => return None,
            SlotState::Configured(FrameType::Eid) => {
                let readback = security.readback(slot)?;
                StoredContent::Eid {
                    rotation_exponent: readback.rotation_exponent,
                    clock_seconds: readback.clock_seconds,
                    identity_key: *security.identity_key(slot)?.as_bytes(),
                }
            },
            SlotState::Configured(_) => StoredContent::Frame(state.write_buffer.clone()),
        };
        Some(StoredSlot { interval_ms: state.interval_ms, tx_power: state.tx_power, content })
    }

    /// Rebuild a slot from its persistence record.
    ///
    /// # Errors
    ///
    /// - `BeaconError::PersistenceFailure` if the record holds an EID write
    ///   instead of EID key material
    /// - any error of [`SlotStore::encode_staged`] for a corrupt frame
    pub fn restore_slot<E: Environment>(
        &mut self,
        slot: SlotIndex,
        stored: &StoredSlot,
        security: &mut SecurityEngine,
        env: &E,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        let state = &mut self.slots[slot.get()];
        state.interval_ms = stored.interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
        if power::is_supported(stored.tx_power) {
            state.tx_power = stored.tx_power;
        }

        match &stored.content {
            StoredContent::Empty => {
                self.mark_unconfigured(slot);
                Ok(Vec::new())
            },
            StoredContent::Frame(bytes) => {
                if bytes.first() == Some(&FrameType::Eid.to_u8()) {
                    self.mark_unconfigured(slot);
                    return Err(BeaconError::PersistenceFailure {
                        key: format!("slot/{slot}"),
                        reason: "EID write stored without key material".to_string(),
                    });
                }
                self.set_frame(slot, bytes, security, env)
            },
            StoredContent::Eid { rotation_exponent, clock_seconds, identity_key } => {
                self.await_key_material(slot);
                self.slots[slot.get()].write_buffer =
                    vec![FrameType::Eid.to_u8(), *rotation_exponent];
                let identity_key = AesKey::from_bytes(*identity_key);
                match security.restore_slot(slot, *rotation_exponent, *clock_seconds, identity_key)
                {
                    Ok(events) => {
                        self.apply_security_events(&events);
                        Ok(events)
                    },
                    Err(err) => {
                        self.mark_unconfigured(slot);
                        Err(err)
                    },
                }
            },
        }
    }

    /// Wipe every slot back to the factory defaults and destroy all security
    /// state.
    pub fn factory_reset(&mut self, security: &mut SecurityEngine) -> Vec<SecurityEvent> {
        let events = SlotIndex::all().flat_map(|slot| security.destroy_slot_state(slot)).collect();
        let interval = self.config.default_interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
        let tx_power = if power::is_supported(self.config.default_tx_power) {
            self.config.default_tx_power
        } else {
            DEFAULT_TX_POWER
        };
        self.slots = std::array::from_fn(|_| AdvertisingSlot::empty(interval, tx_power));
        self.install_default_write();
        events
    }

    /// Record whether the slot's last persistence attempt failed.
    pub fn set_unpersisted(&mut self, slot: SlotIndex, unpersisted: bool) {
        self.slots[slot.get()].unpersisted = unpersisted;
    }

    /// A slot record.
    pub fn slot(&self, slot: SlotIndex) -> &AdvertisingSlot {
        &self.slots[slot.get()]
    }

    /// Advertised capabilities.
    pub fn capabilities(&self) -> &BroadcastCapabilities {
        &self.config.capabilities
    }

    fn install_default_write(&mut self) {
        let Ok(write) = SlotWrite::parse(&self.config.default_write) else {
            return;
        };
        if matches!(write, SlotWrite::Clear) || write.frame_type() == Some(FrameType::Eid) {
            return;
        }
        let slot = SlotIndex::FIRST;
        self.slots[slot.get()].write_buffer.clone_from(&self.config.default_write);
        if self.encode_plain(slot, &write).is_err() {
            self.mark_unconfigured(slot);
        }
    }

    fn encode_plain(&mut self, slot: SlotIndex, write: &SlotWrite) -> Result<(), BeaconError> {
        let ranging = ranging_data(self.slots[slot.get()].tx_power);
        let frame = match write {
            SlotWrite::Uid { namespace, instance } => {
                Some(BroadcastFrame::Uid(UidFrame::new(ranging, *namespace, *instance)))
            },
            SlotWrite::Url { scheme, encoded_url } => {
                Some(BroadcastFrame::Url(UrlFrame::new(ranging, *scheme, encoded_url)?))
            },
            // telemetry frames are built when broadcast
            SlotWrite::Tlm => None,
            SlotWrite::Clear | SlotWrite::EidKeyExchange { .. } | SlotWrite::EidSharedKey { .. } => {
                self.mark_unconfigured(slot);
                return Ok(());
            },
        };

        let state = &mut self.slots[slot.get()];
        state.state =
            SlotState::Configured(frame.as_ref().map_or(FrameType::Tlm, BroadcastFrame::frame_type));
        state.frame = frame;
        state.last_broadcast = None;
        Ok(())
    }

    fn await_key_material(&mut self, slot: SlotIndex) {
        let state = &mut self.slots[slot.get()];
        state.state = SlotState::AwaitingKeyMaterial;
        state.frame = None;
        state.last_broadcast = None;
    }

    /// Unconfigure `slot` after a rejected write.
    ///
    /// The slot must not keep rotating an identifier it no longer
    /// broadcasts. Callers clear the persisted key pair themselves.
    fn reject(&mut self, slot: SlotIndex, security: &mut SecurityEngine) {
        let _ = security.destroy_slot_state(slot);
        self.mark_unconfigured(slot);
    }

    fn mark_unconfigured(&mut self, slot: SlotIndex) {
        let state = &mut self.slots[slot.get()];
        state.write_buffer.clear();
        state.state = SlotState::Unconfigured;
        state.frame = None;
        state.last_broadcast = None;
        state.encrypted_identity_key = None;
    }

    fn refresh_ranging(&mut self, slot: SlotIndex) {
        let state = &mut self.slots[slot.get()];
        let ranging = ranging_data(state.tx_power);
        if let Some(frame) = state.frame.as_mut() {
            frame.set_ranging_data(ranging);
        }
    }
}

fn is_eid_bound(state: SlotState) -> bool {
    matches!(state, SlotState::AwaitingKeyMaterial | SlotState::Configured(FrameType::Eid))
}

fn ranging_data(tx_power: i8) -> i8 {
    power::ranging_for(tx_power).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use eidbeacon_crypto::encrypt_block;

    use super::*;
    use crate::test_env::TestEnv;

    const LOCK_KEY: [u8; 16] = [0x11; 16];

    fn fixture() -> (SlotStore, SecurityEngine, TestEnv) {
        (
            SlotStore::new(SlotStoreConfig::default()),
            SecurityEngine::new(AesKey::from_bytes(LOCK_KEY)),
            TestEnv::with_seed(5),
        )
    }

    fn uid_write() -> Vec<u8> {
        let mut write = vec![0x00];
        write.extend(0u8..16);
        write
    }

    fn eid_shared_write(k: u8) -> Vec<u8> {
        let mut write = vec![0x30];
        write.extend(encrypt_block(&LOCK_KEY, &[0x42; 16]));
        write.push(k);
        write
    }

    #[test]
    fn factory_slot_is_the_default_url() {
        let (store, security, _) = fixture();

        let frame = store.get_frame(SlotIndex::FIRST, &security);

        assert_eq!(frame.len(), DEFAULT_SLOT_WRITE.len() + 1);
        assert_eq!(frame[0], 0x10);
        assert_eq!(frame[1] as i8, -9);
        assert_eq!(&frame[2..], &DEFAULT_SLOT_WRITE[1..]);
        assert_eq!(store.enumerate_configured(), vec![SlotIndex::FIRST]);
    }

    #[test]
    fn uid_write_encodes_twenty_bytes() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(1);

        store.set_frame(slot, &uid_write(), &mut security, &env).expect("valid");

        let frame = store.get_frame(slot, &security);
        assert_eq!(frame.len(), 20);
        assert_eq!(&frame[2..18], &uid_write()[1..]);
        assert_eq!(store.slot(slot).state(), SlotState::Configured(FrameType::Uid));
    }

    #[test]
    fn short_uid_write_leaves_slot_unconfigured() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(1);

        let result = store.set_frame(slot, &uid_write()[..16], &mut security, &env);

        assert_eq!(result, Err(BeaconError::InvalidFrameLength { frame_type: 0x00, length: 16 }));
        assert!(!store.is_configured(slot));
        assert!(store.get_frame(slot, &security).is_empty());
    }

    #[test]
    fn url_readback_is_write_plus_ranging() {
        let (mut store, mut security, env) = fixture();
        let write = [0x10, 0x03, b'a', b'b', b'c', 0x07];

        store.set_frame(SlotIndex::FIRST, &write, &mut security, &env).expect("valid");

        assert_eq!(store.get_frame(SlotIndex::FIRST, &security).len(), write.len() + 1);
    }

    #[test]
    fn clear_write_unconfigures() {
        let (mut store, mut security, env) = fixture();

        store.set_frame(SlotIndex::FIRST, &[0x00], &mut security, &env).expect("clear");

        assert!(store.enumerate_configured().is_empty());
        assert_eq!(store.slot(SlotIndex::FIRST).state(), SlotState::Unconfigured);
    }

    #[test]
    fn staged_slot_has_no_frame() {
        let (mut store, mut security, _) = fixture();

        store.stage_write(SlotIndex::FIRST, &uid_write(), &mut security).expect("fits");

        assert_eq!(store.slot(SlotIndex::FIRST).state(), SlotState::Staged);
        assert!(store.is_configured(SlotIndex::FIRST));
        assert!(store.ready_frame(SlotIndex::FIRST).is_none());
    }

    #[test]
    fn interval_is_clamped_and_global() {
        let (mut store, ..) = fixture();

        assert_eq!(store.set_advertising_interval(SlotIndex::clamped(2), 50, false), 100);
        assert!(SlotIndex::all().all(|slot| store.slot(slot).interval_ms() == 100));

        assert_eq!(store.set_advertising_interval(SlotIndex::FIRST, 20_000, false), 10_240);
        assert_eq!(store.global_interval_ms(), 10_240);
    }

    #[test]
    fn unsupported_tx_power_keeps_current() {
        let (mut store, ..) = fixture();

        assert_eq!(store.set_tx_power(SlotIndex::FIRST, 5, false), 0);
        assert_eq!(store.set_tx_power(SlotIndex::FIRST, -4, false), -4);
        assert_eq!(store.ready_frame(SlotIndex::FIRST).and_then(BroadcastFrame::ranging_data), Some(-14));
        assert_eq!(store.slot(SlotIndex::clamped(1)).tx_power(), 0);
    }

    #[test]
    fn eid_write_configures_after_registration() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(3);

        let events = store.set_frame(slot, &eid_shared_write(8), &mut security, &env).expect("ok");

        assert!(events.iter().any(|e| matches!(e, SecurityEvent::EidRotated { .. })));
        assert_eq!(store.enumerate_eid_slots(), vec![slot]);
        let readback = store.get_frame(slot, &security);
        assert_eq!(readback.len(), 14);
        assert_eq!(readback[..6], [0x30, 8, 0x00, 0x00, 0xFF, 0x00]);
        assert_eq!(&readback[6..], &security.eid(slot).expect("occupied"));
        assert_eq!(
            store.encrypted_identity_key(slot),
            Ok(encrypt_block(&LOCK_KEY, &[0x42; 16]))
        );
    }

    #[test]
    fn bad_rotation_exponent_unconfigures() {
        let (mut store, mut security, env) = fixture();

        let result = store.set_frame(SlotIndex::FIRST, &eid_shared_write(20), &mut security, &env);

        assert_eq!(result, Err(BeaconError::InvalidRotationExponent(20)));
        assert!(!store.is_configured(SlotIndex::FIRST));
    }

    #[test]
    fn non_eid_write_destroys_security_state() {
        let (mut store, mut security, env) = fixture();
        store.set_frame(SlotIndex::FIRST, &eid_shared_write(8), &mut security, &env).expect("ok");

        store.set_frame(SlotIndex::FIRST, &uid_write(), &mut security, &env).expect("ok");

        assert!(!security.is_occupied(SlotIndex::FIRST));
        assert_eq!(
            store.encrypted_identity_key(SlotIndex::FIRST),
            Err(BeaconError::NotEidSlot(0))
        );
    }

    #[test]
    fn clearing_an_eid_slot_destroys_security_state() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(1);
        store.set_frame(slot, &eid_shared_write(8), &mut security, &env).expect("ok");

        store.set_frame(slot, &[], &mut security, &env).expect("clear");

        assert!(!security.is_occupied(slot));
        assert_eq!(security.eid(slot), None);
        assert!(security.advance_clock(86_400).is_empty());
    }

    #[test]
    fn rejected_eid_rewrite_destroys_security_state() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(1);
        store.set_frame(slot, &eid_shared_write(8), &mut security, &env).expect("ok");

        let result = store.set_frame(slot, &eid_shared_write(17), &mut security, &env);

        assert_eq!(result, Err(BeaconError::InvalidRotationExponent(17)));
        assert_eq!(store.slot(slot).state(), SlotState::Unconfigured);
        assert!(!security.is_occupied(slot));
        assert!(security.advance_clock(86_400).is_empty());
    }

    #[test]
    fn oversized_write_over_eid_slot_destroys_security_state() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(2);
        store.set_frame(slot, &eid_shared_write(8), &mut security, &env).expect("ok");

        let result = store.stage_write(slot, &[0x30; MAX_SLOT_WRITE_LEN + 1], &mut security);

        assert_eq!(
            result,
            Err(BeaconError::InvalidFrameLength { frame_type: 0x30, length: MAX_SLOT_WRITE_LEN + 1 })
        );
        assert_eq!(store.slot(slot).state(), SlotState::Unconfigured);
        assert!(!security.is_occupied(slot));
        assert_eq!(security.eid(slot), None);
    }

    #[test]
    fn failed_key_exchange_discards_the_key_pair() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(3);
        security.restore_key_pair(slot, [0x33; 32]);
        let mut write = vec![0x30];
        write.extend([0u8; 32]);
        write.push(8);

        let result = store.set_frame(slot, &write, &mut security, &env);

        assert!(matches!(result, Err(BeaconError::KeyAgreementFailed { .. })));
        assert_eq!(security.public_key(slot), None);
        assert!(!store.is_configured(slot));
    }

    #[test]
    fn tlm_encryption_needs_an_eid_slot() {
        let (mut store, mut security, env) = fixture();
        store.set_frame(SlotIndex::clamped(1), &[0x20], &mut security, &env).expect("tlm");
        assert!(!store.tlm_requires_encryption());
        assert!(store.get_frame(SlotIndex::clamped(1), &security).is_empty());

        store.set_frame(SlotIndex::clamped(2), &eid_shared_write(4), &mut security, &env).expect("eid");
        assert!(store.tlm_requires_encryption());
    }

    #[test]
    fn eid_slot_survives_persistence() {
        let (mut store, mut security, env) = fixture();
        let slot = SlotIndex::clamped(2);
        store.set_frame(slot, &eid_shared_write(8), &mut security, &env).expect("ok");
        security.advance_clock(1000);
        let record = store.stored_slot(slot, &security).expect("configured");

        let (mut fresh, mut fresh_security, _) = fixture();
        fresh.restore_slot(slot, &record, &mut fresh_security, &env).expect("restores");

        assert_eq!(fresh.get_frame(slot, &fresh_security), store.get_frame(slot, &security));
        assert_eq!(fresh_security.clock_seconds(slot), Some(0xFF00 + 1000));
    }

    #[test]
    fn factory_reset_restores_defaults() {
        let (mut store, mut security, env) = fixture();
        store.set_frame(SlotIndex::FIRST, &eid_shared_write(8), &mut security, &env).expect("ok");
        store.set_advertising_interval(SlotIndex::FIRST, 2000, true);

        store.factory_reset(&mut security);

        assert!(!security.is_occupied(SlotIndex::FIRST));
        assert_eq!(store.global_interval_ms(), DEFAULT_INTERVAL_MS);
        assert_eq!(store.slot(SlotIndex::FIRST).state(), SlotState::Configured(FrameType::Url));
    }
}
