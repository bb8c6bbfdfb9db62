//! Operations for model-based testing.
//!
//! Operations are generated from arbitrary bytes and cover everything a peer,
//! the button and the power switch can do to a beacon.

use std::time::Duration;

use arbitrary::Arbitrary;
use eidbeacon_core::{BeaconConfig, BeaconError};
use eidbeacon_proto::{Characteristic, FrameType, config::FACTORY_RESET_COMMAND};

use super::ModelPhone;
use crate::sim_beacon::SimBeacon;

/// Longest time a single operation advances the clock.
const MAX_ADVANCE_SECS: u64 = 120;

/// Slot-data content a peer may write.
#[derive(Debug, Clone, Arbitrary)]
pub enum SlotContent {
    /// Empty write
    Clear,
    /// Eddystone-UID
    Uid {
        /// Namespace
        namespace: [u8; 10],
        /// Instance
        instance: [u8; 6],
    },
    /// Eddystone-URL with a raw encoded body
    Url {
        /// URL scheme prefix code
        scheme: u8,
        /// Encoded URL bytes
        body: Vec<u8>,
    },
    /// Plain telemetry
    Tlm,
    /// Arbitrary bytes, usually invalid
    Raw(Vec<u8>),
}

impl SlotContent {
    /// Bytes of the slot-data write.
    pub fn to_write(&self) -> Vec<u8> {
        match self {
            Self::Clear => Vec::new(),
            Self::Uid { namespace, instance } => {
                let mut write = vec![FrameType::Uid.to_u8()];
                write.extend_from_slice(namespace);
                write.extend_from_slice(instance);
                write
            },
            Self::Url { scheme, body } => {
                let mut write = vec![FrameType::Url.to_u8(), scheme % 4];
                write.extend(body.iter().take(17));
                write
            },
            Self::Tlm => vec![FrameType::Tlm.to_u8()],
            Self::Raw(bytes) => bytes.iter().take(40).copied().collect(),
        }
    }
}

/// Operations that can be applied to a simulated beacon.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Let time pass.
    AdvanceTime {
        /// Milliseconds, reduced to at most two minutes
        millis: u32,
    },
    /// A peer connects.
    Connect,
    /// The peer disconnects.
    Disconnect,
    /// The peer unlocks with the current lock key.
    Unlock,
    /// The peer locks the beacon.
    Lock,
    /// The peer selects a slot.
    SelectSlot {
        /// Raw slot index (clamped by the beacon)
        slot: u8,
    },
    /// The peer writes slot data.
    WriteSlot {
        /// Content written
        content: SlotContent,
    },
    /// The peer writes an advertising interval.
    SetInterval {
        /// Interval in milliseconds
        ms: u16,
    },
    /// The peer writes a transmit power.
    SetTxPower {
        /// Power in dBm
        dbm: i8,
    },
    /// The phone registers the active slot over ECDH.
    RegisterEid {
        /// Rotation exponent (reduced modulo 17)
        rotation_exponent: u8,
    },
    /// The registration button is pressed.
    TriggerRegistration,
    /// The peer factory-resets the beacon.
    FactoryReset,
    /// Power cycle.
    Restart,
}

/// How the beacon responded to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Applied
    Accepted,
    /// The beacon rejected it
    Rejected(BeaconError),
    /// Not applicable in the current state (e.g. disconnect while not connected)
    Skipped,
}

impl From<Result<(), BeaconError>> for OperationOutcome {
    fn from(result: Result<(), BeaconError>) -> Self {
        match result {
            Ok(()) => Self::Accepted,
            Err(err) => Self::Rejected(err),
        }
    }
}

impl Operation {
    /// Apply to `beacon`, keeping `phone`'s registrations in step.
    pub fn apply(
        &self,
        beacon: &mut SimBeacon,
        phone: &mut ModelPhone,
        lock_key: &[u8; 16],
    ) -> OperationOutcome {
        let peer_op = !matches!(
            self,
            Self::AdvanceTime { .. } | Self::Connect | Self::TriggerRegistration | Self::Restart
        );
        if peer_op && !beacon.is_connected() {
            return OperationOutcome::Skipped;
        }

        match self {
            Self::AdvanceTime { millis } => {
                let millis = u64::from(*millis) % (MAX_ADVANCE_SECS * 1000);
                beacon.advance(Duration::from_millis(millis));
                OperationOutcome::Accepted
            },
            Self::Connect => {
                if beacon.is_connected() {
                    return OperationOutcome::Skipped;
                }
                beacon.connect();
                OperationOutcome::Accepted
            },
            Self::Disconnect => {
                beacon.disconnect();
                OperationOutcome::Accepted
            },
            Self::Unlock => beacon.unlock(lock_key).into(),
            Self::Lock => beacon.write(Characteristic::LockState, &[0x00]).into(),
            Self::SelectSlot { slot } => beacon.write(Characteristic::ActiveSlot, &[*slot]).into(),
            Self::WriteSlot { content } => {
                let slot = beacon.core().active_slot();
                let result = beacon.write(Characteristic::SlotData, &content.to_write());
                if result.is_ok() {
                    phone.forget(slot);
                }
                result.into()
            },
            Self::SetInterval { ms } => {
                beacon.write(Characteristic::AdvertisingInterval, &ms.to_be_bytes()).into()
            },
            Self::SetTxPower { dbm } => {
                beacon.write(Characteristic::RadioTxPower, &[*dbm as u8]).into()
            },
            Self::RegisterEid { rotation_exponent } => {
                let slot = beacon.core().active_slot();
                phone.forget(slot);
                phone.register(beacon, slot, lock_key, rotation_exponent % 17).map(|_| ()).into()
            },
            Self::TriggerRegistration => {
                beacon.trigger_registration();
                OperationOutcome::Accepted
            },
            Self::FactoryReset => {
                let result = beacon.write(Characteristic::FactoryReset, &[FACTORY_RESET_COMMAND]);
                if result.is_ok() {
                    phone.forget_all();
                }
                result.into()
            },
            Self::Restart => {
                beacon.restart(BeaconConfig::default());
                beacon.start();
                OperationOutcome::Accepted
            },
        }
    }
}
