//! Error types for the beacon core.
//!
//! Every variant is recoverable: the beacon keeps advertising whatever it was
//! advertising before. Peer errors are answered with an error status on the
//! configuration link; persistence failures are logged and mark the affected
//! slot as unpersisted.

use eidbeacon_proto::{Characteristic, ProtocolError};
use thiserror::Error;

/// Errors from slot configuration, key exchange, access control and
/// persistence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    /// Slot write length not accepted for its frame type
    #[error("invalid write length {length} for frame type {frame_type:#04x}")]
    InvalidFrameLength {
        /// Frame-type byte of the write
        frame_type: u8,
        /// Total write length, frame-type byte included
        length: usize,
    },

    /// Slot write names a frame type the beacon does not know
    #[error("unsupported frame type {0:#04x}")]
    UnsupportedFrameType(u8),

    /// EID rotation exponent outside `0..=16`
    #[error("rotation exponent {0} out of range")]
    InvalidRotationExponent(u8),

    /// X25519 produced an all-zero shared secret on every attempt
    #[error("key agreement failed for slot {slot} after {attempts} attempts")]
    KeyAgreementFailed {
        /// Slot being registered
        slot: u8,
        /// Attempts made
        attempts: u8,
    },

    /// A persisted record could not be encoded, decoded or written
    #[error("persistence failure for {key}: {reason}")]
    PersistenceFailure {
        /// Logical storage key
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// Resource not accessible in the current lock state
    #[error("access denied to {0:?}")]
    AccessDenied(Characteristic),

    /// EID identity key requested for a slot without EID configuration
    #[error("slot {0} is not an EID slot")]
    NotEidSlot(u8),

    /// Configuration value rejected
    #[error("invalid value for {characteristic:?}: {reason}")]
    InvalidValue {
        /// Resource being written
        characteristic: Characteristic,
        /// Why the value was rejected
        reason: String,
    },
}

impl BeaconError {
    /// Returns true if the configuring peer caused this error.
    ///
    /// Peer errors are answered on the link; the rest are local faults.
    pub fn is_peer_error(&self) -> bool {
        !matches!(self, Self::PersistenceFailure { .. })
    }

    /// ATT status code used to answer the peer.
    ///
    /// `0x02` read not permitted, `0x03` write not permitted, `0x0D` invalid
    /// attribute value length, `0x13` value not allowed.
    pub fn att_status(&self, is_write: bool) -> u8 {
        match self {
            Self::AccessDenied(_) | Self::NotEidSlot(_) if !is_write => 0x02,
            Self::AccessDenied(_) | Self::NotEidSlot(_) => 0x03,
            Self::InvalidFrameLength { .. } => 0x0D,
            Self::UnsupportedFrameType(_)
            | Self::InvalidRotationExponent(_)
            | Self::KeyAgreementFailed { .. }
            | Self::InvalidValue { .. }
            | Self::PersistenceFailure { .. } => 0x13,
        }
    }

    /// Wrap a value-level protocol error for `characteristic`.
    pub(crate) fn invalid_value(characteristic: Characteristic, err: &ProtocolError) -> Self {
        Self::InvalidValue { characteristic, reason: err.to_string() }
    }
}

/// Slot-write parse errors.
///
/// Length errors become `InvalidFrameLength`, unknown type bytes
/// `UnsupportedFrameType`; anything else can only come from a value resource
/// and is reported against slot data.
impl From<ProtocolError> for BeaconError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidWriteLength { frame_type, length } => {
                Self::InvalidFrameLength { frame_type, length }
            },
            ProtocolError::UnknownFrameType(byte) => Self::UnsupportedFrameType(byte),
            other => Self::invalid_value(Characteristic::SlotData, &other),
        }
    }
}
