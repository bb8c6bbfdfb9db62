//! Model of a configuring phone.

use std::collections::BTreeMap;

use eidbeacon_core::{BeaconError, Environment, SlotIndex};
use eidbeacon_crypto::{
    AesKey, BeaconKeyPair, CryptoError, SealedTelemetry, derive_eid, derive_identity_key,
    derive_temporary_key, encrypt_block, open_telemetry,
};
use eidbeacon_proto::{Characteristic, EtlmFrame, FrameType};

use crate::sim_beacon::SimBeacon;

/// What the phone learned from registering one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Identity key shared with the beacon
    pub identity_key: AesKey,
    /// Rotation exponent requested
    pub rotation_exponent: u8,
}

/// A peer that registers EID slots and resolves their broadcasts.
#[derive(Debug)]
pub struct ModelPhone {
    key_pair: BeaconKeyPair,
    registrations: BTreeMap<SlotIndex, Registration>,
}

impl ModelPhone {
    /// Phone with a fresh X25519 key pair.
    pub fn new<E: Environment>(env: &E) -> Self {
        Self { key_pair: BeaconKeyPair::from_secret(env.random_array()), registrations: BTreeMap::new() }
    }

    /// The phone's public key.
    pub fn public_key(&self) -> &[u8; 32] {
        self.key_pair.public_key()
    }

    /// Slot-data write starting an ECDH registration.
    pub fn key_exchange_write(&self, rotation_exponent: u8) -> Vec<u8> {
        let mut write = vec![FrameType::Eid.to_u8()];
        write.extend_from_slice(self.public_key());
        write.push(rotation_exponent);
        write
    }

    /// Derive the identity key from the beacon's public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::ZeroSharedSecret` for a low-order beacon key
    pub fn complete_key_exchange(
        &mut self,
        slot: SlotIndex,
        beacon_public: &[u8; 32],
        rotation_exponent: u8,
    ) -> Result<AesKey, CryptoError> {
        let shared = self.key_pair.shared_secret(beacon_public)?;
        let identity_key = derive_identity_key(&shared, self.public_key(), beacon_public);
        self.registrations
            .insert(slot, Registration { identity_key: identity_key.clone(), rotation_exponent });
        Ok(identity_key)
    }

    /// Slot-data write installing `identity_key` directly, wrapped under
    /// the beacon's lock key.
    pub fn shared_key_write(
        &mut self,
        slot: SlotIndex,
        lock_key: &[u8; 16],
        identity_key: AesKey,
        rotation_exponent: u8,
    ) -> Vec<u8> {
        let mut write = vec![FrameType::Eid.to_u8()];
        write.extend_from_slice(&encrypt_block(lock_key, identity_key.as_bytes()));
        write.push(rotation_exponent);
        self.registrations.insert(slot, Registration { identity_key, rotation_exponent });
        write
    }

    /// Register `slot` over ECDH on a connected beacon.
    ///
    /// Unlocks with `lock_key` if needed, selects the slot, writes the key
    /// exchange and reads back the beacon's public key.
    ///
    /// # Errors
    ///
    /// Any rejection by the beacon; `KeyAgreementFailed` if the beacon
    /// exposes no usable public key.
    pub fn register(
        &mut self,
        beacon: &mut SimBeacon,
        slot: SlotIndex,
        lock_key: &[u8; 16],
        rotation_exponent: u8,
    ) -> Result<AesKey, BeaconError> {
        if !beacon.core().lock_state().is_unlocked() {
            beacon.unlock(lock_key)?;
        }
        beacon.write(Characteristic::ActiveSlot, &[slot.to_u8()])?;
        beacon.write(Characteristic::SlotData, &self.key_exchange_write(rotation_exponent))?;

        let failed = BeaconError::KeyAgreementFailed { slot: slot.to_u8(), attempts: 0 };
        let beacon_public: [u8; 32] =
            beacon.read(Characteristic::PublicEcdhKey)?.try_into().map_err(|_| failed.clone())?;
        if beacon_public == [0; 32] {
            return Err(failed);
        }
        self.complete_key_exchange(slot, &beacon_public, rotation_exponent).map_err(|_| failed)
    }

    /// Registration of `slot`, if any.
    pub fn registration(&self, slot: SlotIndex) -> Option<&Registration> {
        self.registrations.get(&slot)
    }

    /// Forget a slot (it was rewritten or reset).
    pub fn forget(&mut self, slot: SlotIndex) {
        self.registrations.remove(&slot);
    }

    /// Forget every slot.
    pub fn forget_all(&mut self) {
        self.registrations.clear();
    }

    /// EID the beacon should broadcast from `slot` at `clock_seconds`.
    pub fn predict_eid(&self, slot: SlotIndex, clock_seconds: u32) -> Option<[u8; 8]> {
        let registration = self.registrations.get(&slot)?;
        let temporary_key = derive_temporary_key(&registration.identity_key, clock_seconds);
        Some(derive_eid(&temporary_key, registration.rotation_exponent, clock_seconds))
    }

    /// Decrypt an eTLM frame sealed under `slot`'s identity key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::AuthenticationFailed` if the tag does not verify
    pub fn open_etlm(
        &self,
        slot: SlotIndex,
        clock_seconds: u32,
        frame: &EtlmFrame,
    ) -> Result<[u8; 12], CryptoError> {
        let registration =
            self.registrations.get(&slot).ok_or(CryptoError::AuthenticationFailed)?;
        let sealed = SealedTelemetry {
            ciphertext: *frame.encrypted(),
            salt: frame.salt(),
            tag: frame.tag(),
        };
        open_telemetry(
            &registration.identity_key,
            clock_seconds,
            registration.rotation_exponent,
            &sealed,
        )
    }
}
