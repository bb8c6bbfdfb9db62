//! Per-slot EID key material and the lock.
//!
//! The engine owns everything secret on the beacon: each slot's identity key
//! (IK), temporary key (TK), current EID, rotation exponent, time counter and
//! X25519 key pair, plus the lock key. It never touches frames; the slot
//! store learns about new EIDs and identity keys through the
//! [`SecurityEvent`]s returned from every mutating operation.
//!
//! # Registration
//!
//! ```text
//! shared IK:  IK = AES-ECB-decrypt(lock_key, IK')
//! ECDH:       IK = HMAC(HMAC(X25519(beacon, peer), peer ‖ beacon), 0x01)[..16]
//!                   │
//!                   ▼
//!             occupied, clock = 0xFF00 on first registration
//!                   │
//!                   ▼
//!             rotate TK, rotate EID  →  EidRotated, (EcdhReady), IdentityKeyReady
//! ```
//!
//! # Invariants
//!
//! - An unoccupied slot holds all-zero keys and no key pair.
//! - `temporary_key` is always `derive_temporary_key(identity_key, clock)` and
//!   `eid` is always `derive_eid(temporary_key, k, clock)` for occupied slots.

use eidbeacon_crypto::{
    AesKey, BeaconKeyPair, TEMPORARY_KEY_PERIOD_BITS, derive_eid, derive_temporary_key,
    identity_key_from_agreement, seal_telemetry, window_start,
};
use eidbeacon_proto::{EidReadback, EtlmFrame, TelemetryBody};

use crate::{
    env::Environment,
    error::BeaconError,
    lock::LockState,
    slot::{MAX_SLOTS, SlotIndex},
};

/// Time counter of a slot when it is first registered.
pub const INITIAL_CLOCK_SECONDS: u32 = 0xFF00;

/// Largest accepted rotation exponent.
pub const MAX_ROTATION_EXPONENT: u8 = 16;

/// Key pairs tried before key agreement is abandoned.
pub const MAX_KEY_AGREEMENT_ATTEMPTS: u8 = 2;

/// Interval between time-counter persistence requests.
pub const CLOCK_PERSIST_PERIOD_SECS: u64 = 86_400;

/// Notifications from the security engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A slot's EID changed
    EidRotated {
        /// Slot whose EID changed
        slot: SlotIndex,
        /// New identifier
        eid: [u8; 8],
    },
    /// Key agreement completed; the slot's public key is readable
    EcdhReady(SlotIndex),
    /// A slot has a new identity key
    IdentityKeyReady {
        /// Registered slot
        slot: SlotIndex,
        /// IK encrypted under the lock key, for read-back
        encrypted_identity_key: [u8; 16],
    },
    /// A new key pair was generated and should be persisted
    KeyPairCreated(SlotIndex),
    /// A key pair was destroyed; its persisted copy should go too
    KeyPairDiscarded(SlotIndex),
    /// A slot's time counter should be persisted
    PersistTimeRequested(SlotIndex),
    /// Unlock token verified
    Unlocked,
    /// Lock key replaced; the new key should be persisted
    LockKeyChanged,
}

#[derive(Debug, Default)]
struct SecuritySlot {
    occupied: bool,
    identity_key: AesKey,
    temporary_key: AesKey,
    eid: [u8; 8],
    rotation_exponent: u8,
    clock_seconds: u32,
    key_pair: Option<BeaconKeyPair>,
}

/// Key material for every slot and the lock.
#[derive(Debug)]
pub struct SecurityEngine {
    slots: [SecuritySlot; MAX_SLOTS],
    lock: LockState,
    seconds_since_persist: u64,
}

impl SecurityEngine {
    /// Engine with no registered slots, locked under `lock_key`.
    pub fn new(lock_key: AesKey) -> Self {
        Self {
            slots: std::array::from_fn(|_| SecuritySlot::default()),
            lock: LockState::new(lock_key),
            seconds_since_persist: 0,
        }
    }

    /// Register `slot` with an identity key sent encrypted under the lock key.
    ///
    /// # Errors
    ///
    /// - `BeaconError::InvalidRotationExponent` if `rotation_exponent > 16`
    pub fn receive_shared_identity_key(
        &mut self,
        slot: SlotIndex,
        encrypted_identity_key: &[u8; 16],
        rotation_exponent: u8,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        check_exponent(rotation_exponent)?;

        let identity_key = self.lock.unwrap_key(encrypted_identity_key);
        let mut events = self.establish(slot, identity_key, rotation_exponent);
        events.push(self.identity_key_ready(slot));
        Ok(events)
    }

    /// Register `slot` by X25519 key agreement with `peer_public_key`.
    ///
    /// Uses the slot's key pair, generating one if the slot has none. An
    /// all-zero shared secret retries with a fresh pair. When every attempt
    /// fails the slot keeps the pair it had.
    ///
    /// # Errors
    ///
    /// - `BeaconError::InvalidRotationExponent` if `rotation_exponent > 16`
    /// - `BeaconError::KeyAgreementFailed` if every attempt produced an
    ///   all-zero shared secret
    pub fn receive_peer_public_key<E: Environment>(
        &mut self,
        slot: SlotIndex,
        peer_public_key: &[u8; 32],
        rotation_exponent: u8,
        env: &E,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        check_exponent(rotation_exponent)?;

        // A generated pair replaces the slot's pair only once agreement succeeds.
        let mut fresh: Option<BeaconKeyPair> = None;
        for attempt in 1..=MAX_KEY_AGREEMENT_ATTEMPTS {
            if attempt > 1 || self.slots[slot.get()].key_pair.is_none() {
                fresh = Some(BeaconKeyPair::from_secret(env.random_array()));
            }
            let agreement = match fresh.as_ref().or(self.slots[slot.get()].key_pair.as_ref()) {
                Some(key_pair) => identity_key_from_agreement(key_pair, peer_public_key),
                None => continue,
            };
            let Ok(identity_key) = agreement else {
                continue;
            };

            let created = fresh.is_some();
            if let Some(key_pair) = fresh.take() {
                self.slots[slot.get()].key_pair = Some(key_pair);
            }
            let mut events = self.establish(slot, identity_key, rotation_exponent);
            events.push(SecurityEvent::EcdhReady(slot));
            events.push(self.identity_key_ready(slot));
            if created {
                events.push(SecurityEvent::KeyPairCreated(slot));
            }
            return Ok(events);
        }

        Err(BeaconError::KeyAgreementFailed {
            slot: slot.to_u8(),
            attempts: MAX_KEY_AGREEMENT_ATTEMPTS,
        })
    }

    /// Re-establish an EID slot from persisted configuration.
    ///
    /// # Errors
    ///
    /// - `BeaconError::InvalidRotationExponent` if the record is corrupt
    pub fn restore_slot(
        &mut self,
        slot: SlotIndex,
        rotation_exponent: u8,
        clock_seconds: u32,
        identity_key: AesKey,
    ) -> Result<Vec<SecurityEvent>, BeaconError> {
        check_exponent(rotation_exponent)?;

        let state = &mut self.slots[slot.get()];
        state.occupied = true;
        state.clock_seconds = clock_seconds;

        let mut events = self.establish(slot, identity_key, rotation_exponent);
        events.push(self.identity_key_ready(slot));
        Ok(events)
    }

    /// Reinstall a persisted key pair.
    pub fn restore_key_pair(&mut self, slot: SlotIndex, secret: [u8; 32]) {
        self.slots[slot.get()].key_pair = Some(BeaconKeyPair::from_secret(secret));
    }

    /// Recompute the slot's TK from its IK and time counter.
    pub fn rotate_temporary_key(&mut self, slot: SlotIndex) {
        let state = &mut self.slots[slot.get()];
        if state.occupied {
            state.temporary_key = derive_temporary_key(&state.identity_key, state.clock_seconds);
        }
    }

    /// Recompute the slot's EID from its TK, `k` and time counter.
    ///
    /// Returns `None` for an unoccupied slot.
    pub fn rotate_eid(&mut self, slot: SlotIndex) -> Option<SecurityEvent> {
        let state = &mut self.slots[slot.get()];
        if !state.occupied {
            return None;
        }
        state.eid =
            derive_eid(&state.temporary_key, state.rotation_exponent, state.clock_seconds);
        Some(SecurityEvent::EidRotated { slot, eid: state.eid })
    }

    /// Advance every occupied slot's time counter by `delta_seconds`.
    ///
    /// Rotates TK on `2^16` boundaries and the EID on `2^k` boundaries, and
    /// requests persistence of every occupied slot once a day.
    pub fn advance_clock(&mut self, delta_seconds: u32) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        if delta_seconds == 0 {
            return events;
        }

        for slot in SlotIndex::all() {
            let state = &mut self.slots[slot.get()];
            if !state.occupied {
                continue;
            }
            let before = state.clock_seconds;
            let after = before.wrapping_add(delta_seconds);
            state.clock_seconds = after;
            let k = state.rotation_exponent;

            if before >> TEMPORARY_KEY_PERIOD_BITS != after >> TEMPORARY_KEY_PERIOD_BITS {
                self.rotate_temporary_key(slot);
            }
            if window_start(before, k) != window_start(after, k) {
                events.extend(self.rotate_eid(slot));
            }
        }

        self.seconds_since_persist += u64::from(delta_seconds);
        if self.seconds_since_persist >= CLOCK_PERSIST_PERIOD_SECS {
            self.seconds_since_persist %= CLOCK_PERSIST_PERIOD_SECS;
            events.extend(
                SlotIndex::all()
                    .filter(|slot| self.is_occupied(*slot))
                    .map(SecurityEvent::PersistTimeRequested),
            );
        }
        events
    }

    /// Seal a telemetry body under `slot`'s identity key.
    ///
    /// Returns `None` for an unoccupied slot.
    pub fn encrypt_telemetry(
        &self,
        slot: SlotIndex,
        body: &TelemetryBody,
        salt: [u8; 2],
    ) -> Option<EtlmFrame> {
        let state = &self.slots[slot.get()];
        if !state.occupied {
            return None;
        }
        let sealed = seal_telemetry(
            &state.identity_key,
            state.clock_seconds,
            state.rotation_exponent,
            salt,
            &body.to_bytes(),
        );
        Some(EtlmFrame::new(sealed.ciphertext, sealed.salt, sealed.tag))
    }

    /// Draw a fresh unlock challenge.
    pub fn generate_challenge<E: Environment>(&mut self, env: &E) -> [u8; 16] {
        self.lock.generate_challenge(env)
    }

    /// Verify an unlock token against the outstanding challenge.
    pub fn verify_unlock(&mut self, token: &[u8]) -> Vec<SecurityEvent> {
        if self.lock.verify(token) { vec![SecurityEvent::Unlocked] } else { Vec::new() }
    }

    /// Replace the lock key with `encrypted_new_key` decrypted under the
    /// current one.
    pub fn update_lock_key(&mut self, encrypted_new_key: &[u8; 16]) -> Vec<SecurityEvent> {
        self.lock.change_key(encrypted_new_key);
        vec![SecurityEvent::LockKeyChanged]
    }

    /// Zero all key material of `slot`.
    pub fn destroy_slot_state(&mut self, slot: SlotIndex) -> Vec<SecurityEvent> {
        let had_key_pair = self.slots[slot.get()].key_pair.is_some();
        self.slots[slot.get()] = SecuritySlot::default();

        if had_key_pair { vec![SecurityEvent::KeyPairDiscarded(slot)] } else { Vec::new() }
    }

    /// Lock key and state.
    pub fn lock(&self) -> &LockState {
        &self.lock
    }

    /// Mutable lock key and state.
    pub fn lock_mut(&mut self) -> &mut LockState {
        &mut self.lock
    }

    /// Whether `slot` holds EID key material.
    pub fn is_occupied(&self, slot: SlotIndex) -> bool {
        self.slots[slot.get()].occupied
    }

    /// Current EID of an occupied slot.
    pub fn eid(&self, slot: SlotIndex) -> Option<[u8; 8]> {
        self.occupied(slot).map(|state| state.eid)
    }

    /// Time counter of an occupied slot.
    pub fn clock_seconds(&self, slot: SlotIndex) -> Option<u32> {
        self.occupied(slot).map(|state| state.clock_seconds)
    }

    /// Rotation exponent of an occupied slot.
    pub fn rotation_exponent(&self, slot: SlotIndex) -> Option<u8> {
        self.occupied(slot).map(|state| state.rotation_exponent)
    }

    /// Identity key of an occupied slot, for persistence.
    pub fn identity_key(&self, slot: SlotIndex) -> Option<&AesKey> {
        self.occupied(slot).map(|state| &state.identity_key)
    }

    /// Identity key encrypted under the lock key.
    pub fn encrypted_identity_key(&self, slot: SlotIndex) -> Option<[u8; 16]> {
        self.identity_key(slot).map(|ik| self.lock.wrap(ik.as_bytes()))
    }

    /// Slot-data read-back for an occupied slot.
    pub fn readback(&self, slot: SlotIndex) -> Option<EidReadback> {
        self.occupied(slot).map(|state| EidReadback {
            rotation_exponent: state.rotation_exponent,
            clock_seconds: state.clock_seconds,
            eid: state.eid,
        })
    }

    /// Public key of the slot's key pair.
    pub fn public_key(&self, slot: SlotIndex) -> Option<[u8; 32]> {
        self.slots[slot.get()].key_pair.as_ref().map(|pair| *pair.public_key())
    }

    /// Secret of the slot's key pair, for persistence.
    pub fn key_pair_secret(&self, slot: SlotIndex) -> Option<[u8; 32]> {
        self.slots[slot.get()].key_pair.as_ref().map(|pair| *pair.secret_bytes())
    }

    fn occupied(&self, slot: SlotIndex) -> Option<&SecuritySlot> {
        let state = &self.slots[slot.get()];
        state.occupied.then_some(state)
    }

    fn establish(
        &mut self,
        slot: SlotIndex,
        identity_key: AesKey,
        rotation_exponent: u8,
    ) -> Vec<SecurityEvent> {
        let state = &mut self.slots[slot.get()];
        if !state.occupied {
            state.clock_seconds = INITIAL_CLOCK_SECONDS;
        }
        state.occupied = true;
        state.identity_key = identity_key;
        state.rotation_exponent = rotation_exponent;

        self.rotate_temporary_key(slot);
        self.rotate_eid(slot).into_iter().collect()
    }

    fn identity_key_ready(&self, slot: SlotIndex) -> SecurityEvent {
        SecurityEvent::IdentityKeyReady {
            slot,
            encrypted_identity_key: self.encrypted_identity_key(slot).unwrap_or_default(),
        }
    }
}

fn check_exponent(rotation_exponent: u8) -> Result<(), BeaconError> {
    if rotation_exponent > MAX_ROTATION_EXPONENT {
        return Err(BeaconError::InvalidRotationExponent(rotation_exponent));
    }
    Ok(())
}
