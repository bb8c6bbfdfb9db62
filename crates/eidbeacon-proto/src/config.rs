//! Configuration-service wire formats.
//!
//! These are the payloads a configuring peer reads and writes. The transport
//! (GATT in the reference deployment) is out of scope; every resource is
//! identified by a [`Characteristic`] and carries plain bytes.
//!
//! Slot-data write lengths count the frame-type byte:
//!
//! ```text
//! UID          00 | namespace[10] | instance[6]             17
//! URL          10 | scheme | encoded_url[..=17]             2-19
//! TLM          20                                           1
//! EID (ECDH)   30 | peer_public_key[32] | k                 34
//! EID (shared) 30 | encrypted_identity_key[16] | k          18
//! clear        (empty) or 00                                0-1
//! ```

use crate::{
    errors::{ProtocolError, Result},
    frame::FrameType,
    power::SUPPORTED_TX_POWER,
};

/// Slot-data write length for UID.
pub const UID_WRITE_LEN: usize = 17;

/// Shortest URL slot-data write (type and scheme).
pub const URL_WRITE_MIN: usize = 2;

/// Longest URL slot-data write.
pub const URL_WRITE_MAX: usize = 19;

/// Slot-data write length for TLM.
pub const TLM_WRITE_LEN: usize = 1;

/// Slot-data write length for EID via key agreement.
pub const EID_ECDH_WRITE_LEN: usize = 34;

/// Slot-data write length for EID with a pre-shared identity key.
pub const EID_SHARED_WRITE_LEN: usize = 18;

/// Largest slot-data write, also the long-write buffer size.
pub const MAX_SLOT_WRITE_LEN: usize = EID_ECDH_WRITE_LEN;

/// Length of the EID slot-data read-back.
pub const EID_READBACK_LEN: usize = 14;

/// Lock-state write length carrying a new lock key.
pub const LOCK_KEY_WRITE_LEN: usize = 17;

/// Factory-reset write value.
pub const FACTORY_RESET_COMMAND: u8 = 0x0B;

/// Capability bit: per-slot advertising intervals.
pub const CAPABILITY_VARIABLE_INTERVAL: u8 = 0x01;

/// Capability bit: per-slot transmit power.
pub const CAPABILITY_VARIABLE_TX_POWER: u8 = 0x02;

/// Base UUID of the configuration service, `A3C8xxxx-8ED3-4BDF-8A39-A01BEBEDE295`.
pub const SERVICE_BASE_UUID: u128 = 0xA3C8_0000_8ED3_4BDF_8A39_A01B_EBED_E295;

/// Configuration resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Read-only capability summary
    BroadcastCapabilities,
    /// Slot addressed by the per-slot resources
    ActiveSlot,
    /// Advertising interval, big-endian milliseconds
    AdvertisingInterval,
    /// Radio transmit power, signed dBm
    RadioTxPower,
    /// Advertised transmit power override, signed dBm
    AdvancedAdvertisedTxPower,
    /// Lock state read and lock commands
    LockState,
    /// Challenge read and response write
    Unlock,
    /// Beacon public key of the active slot
    PublicEcdhKey,
    /// Identity key of the active slot, encrypted with the lock key
    EidIdentityKey,
    /// Frame configuration of the active slot
    SlotData,
    /// Factory reset trigger
    FactoryReset,
    /// Whether connectable advertising survives a disconnect
    RemainConnectable,
}

impl Characteristic {
    /// Every characteristic, in UUID order.
    pub const ALL: [Self; 12] = [
        Self::BroadcastCapabilities,
        Self::ActiveSlot,
        Self::AdvertisingInterval,
        Self::RadioTxPower,
        Self::AdvancedAdvertisedTxPower,
        Self::LockState,
        Self::Unlock,
        Self::PublicEcdhKey,
        Self::EidIdentityKey,
        Self::SlotData,
        Self::FactoryReset,
        Self::RemainConnectable,
    ];

    /// 16-bit alias inside the service base UUID.
    #[must_use]
    pub const fn short_uuid(self) -> u16 {
        match self {
            Self::BroadcastCapabilities => 0x7501,
            Self::ActiveSlot => 0x7502,
            Self::AdvertisingInterval => 0x7503,
            Self::RadioTxPower => 0x7504,
            Self::AdvancedAdvertisedTxPower => 0x7505,
            Self::LockState => 0x7506,
            Self::Unlock => 0x7507,
            Self::PublicEcdhKey => 0x7508,
            Self::EidIdentityKey => 0x7509,
            Self::SlotData => 0x750A,
            Self::FactoryReset => 0x750B,
            Self::RemainConnectable => 0x750C,
        }
    }

    /// Full 128-bit UUID.
    #[must_use]
    pub const fn uuid(self) -> u128 {
        SERVICE_BASE_UUID | ((self.short_uuid() as u128) << 96)
    }

    /// Look up a characteristic by its 16-bit alias.
    #[must_use]
    pub fn from_short_uuid(short: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.short_uuid() == short)
    }
}

/// A parsed slot-data write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotWrite {
    /// Empty write or a single zero byte
    Clear,
    /// Static identifier
    Uid {
        /// Namespace identifier
        namespace: [u8; 10],
        /// Instance identifier
        instance: [u8; 6],
    },
    /// Compressed URL
    Url {
        /// Scheme prefix code
        scheme: u8,
        /// Compressed URL after the scheme
        encoded_url: Vec<u8>,
    },
    /// Telemetry; contents come from the beacon's counters
    Tlm,
    /// EID registration by key agreement
    EidKeyExchange {
        /// Peer's X25519 public key
        peer_public_key: [u8; 32],
        /// Rotation exponent
        rotation_exponent: u8,
    },
    /// EID registration with an identity key encrypted under the lock key
    EidSharedKey {
        /// Identity key, AES-128-ECB encrypted with the lock key
        encrypted_identity_key: [u8; 16],
        /// Rotation exponent
        rotation_exponent: u8,
    },
}

impl SlotWrite {
    /// Parse a slot-data write.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownFrameType` if the first byte is not a frame
    ///   type
    /// - `ProtocolError::InvalidWriteLength` if the length is not accepted for
    ///   the frame type
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(&type_byte) = bytes.first() else {
            return Ok(Self::Clear);
        };
        if bytes == [0x00] {
            return Ok(Self::Clear);
        }

        let frame_type = FrameType::try_from(type_byte)?;
        let invalid = ProtocolError::InvalidWriteLength { frame_type: type_byte, length: bytes.len() };

        match frame_type {
            FrameType::Uid => {
                if bytes.len() != UID_WRITE_LEN {
                    return Err(invalid);
                }
                let mut namespace = [0u8; 10];
                let mut instance = [0u8; 6];
                namespace.copy_from_slice(&bytes[1..11]);
                instance.copy_from_slice(&bytes[11..17]);
                Ok(Self::Uid { namespace, instance })
            },
            FrameType::Url => {
                if !(URL_WRITE_MIN..=URL_WRITE_MAX).contains(&bytes.len()) {
                    return Err(invalid);
                }
                Ok(Self::Url { scheme: bytes[1], encoded_url: bytes[2..].to_vec() })
            },
            FrameType::Tlm => {
                if bytes.len() != TLM_WRITE_LEN {
                    return Err(invalid);
                }
                Ok(Self::Tlm)
            },
            FrameType::Eid => match bytes.len() {
                EID_ECDH_WRITE_LEN => {
                    let mut peer_public_key = [0u8; 32];
                    peer_public_key.copy_from_slice(&bytes[1..33]);
                    Ok(Self::EidKeyExchange { peer_public_key, rotation_exponent: bytes[33] })
                },
                EID_SHARED_WRITE_LEN => {
                    let mut encrypted_identity_key = [0u8; 16];
                    encrypted_identity_key.copy_from_slice(&bytes[1..17]);
                    Ok(Self::EidSharedKey { encrypted_identity_key, rotation_exponent: bytes[17] })
                },
                _ => Err(invalid),
            },
        }
    }

    /// Frame type configured by this write. `None` for [`SlotWrite::Clear`].
    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Self::Clear => None,
            Self::Uid { .. } => Some(FrameType::Uid),
            Self::Url { .. } => Some(FrameType::Url),
            Self::Tlm => Some(FrameType::Tlm),
            Self::EidKeyExchange { .. } | Self::EidSharedKey { .. } => Some(FrameType::Eid),
        }
    }

    /// Wire encoding, as a peer would send it.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_SLOT_WRITE_LEN);
        match self {
            Self::Clear => {},
            Self::Uid { namespace, instance } => {
                out.push(FrameType::Uid.to_u8());
                out.extend_from_slice(namespace);
                out.extend_from_slice(instance);
            },
            Self::Url { scheme, encoded_url } => {
                out.push(FrameType::Url.to_u8());
                out.push(*scheme);
                out.extend_from_slice(encoded_url);
            },
            Self::Tlm => out.push(FrameType::Tlm.to_u8()),
            Self::EidKeyExchange { peer_public_key, rotation_exponent } => {
                out.push(FrameType::Eid.to_u8());
                out.extend_from_slice(peer_public_key);
                out.push(*rotation_exponent);
            },
            Self::EidSharedKey { encrypted_identity_key, rotation_exponent } => {
                out.push(FrameType::Eid.to_u8());
                out.extend_from_slice(encrypted_identity_key);
                out.push(*rotation_exponent);
            },
        }
        out
    }
}

/// Lock-state resource value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockStateValue {
    /// Only the lock state and unlock resources are accessible
    Locked = 0x00,
    /// Unlocked until the peer disconnects
    Unlocked = 0x01,
    /// Unlocked, and stays unlocked after disconnect
    UnlockedNoAutoRelock = 0x02,
}

impl LockStateValue {
    /// Parse a lock-state byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Locked),
            0x01 => Some(Self::Unlocked),
            0x02 => Some(Self::UnlockedNoAutoRelock),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether configuration resources are accessible.
    #[must_use]
    pub const fn is_unlocked(self) -> bool {
        !matches!(self, Self::Locked)
    }
}

/// A parsed lock-state write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCommand {
    /// `[0x00]`: lock now
    Lock,
    /// `[0x02]`: stay unlocked across disconnects
    DisableAutoRelock,
    /// 17 bytes: state byte followed by the new key encrypted with the old
    ChangeKey {
        /// New lock key, AES-128-ECB encrypted with the current lock key
        encrypted_key: [u8; 16],
        /// State to enter once the key is replaced
        next_state: LockStateValue,
    },
    /// Anything else; treated as a lock request
    Invalid,
}

impl LockCommand {
    /// Parse a lock-state write. Never fails: malformed input maps to
    /// [`LockCommand::Invalid`].
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        match bytes {
            [0x00] => Self::Lock,
            [0x02] => Self::DisableAutoRelock,
            [state, key @ ..] if bytes.len() == LOCK_KEY_WRITE_LEN => {
                let mut encrypted_key = [0u8; 16];
                encrypted_key.copy_from_slice(key);
                Self::ChangeKey {
                    encrypted_key,
                    next_state: LockStateValue::from_u8(*state).unwrap_or(LockStateValue::Locked),
                }
            },
            _ => Self::Invalid,
        }
    }

    /// Lock state the beacon ends up in after this command.
    #[must_use]
    pub fn resulting_state(&self) -> LockStateValue {
        match self {
            Self::Lock | Self::Invalid => LockStateValue::Locked,
            Self::DisableAutoRelock => LockStateValue::UnlockedNoAutoRelock,
            Self::ChangeKey { next_state, .. } => *next_state,
        }
    }
}

/// Broadcast-capabilities resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastCapabilities {
    /// Configuration protocol version
    pub version: u8,
    /// Number of slots
    pub max_slots: u8,
    /// Number of slots that can hold EID frames
    pub max_eid_slots: u8,
    /// [`CAPABILITY_VARIABLE_INTERVAL`] and [`CAPABILITY_VARIABLE_TX_POWER`]
    /// bits
    pub capabilities: u8,
    /// Bitmask of [`FrameType::capability_bit`] values
    pub supported_frame_types: u16,
    /// Supported transmit powers in dBm
    pub tx_powers: Vec<i8>,
}

impl BroadcastCapabilities {
    /// Capabilities of a beacon with `slots` slots, all frame types, the
    /// standard power table, and per-slot transmit power only.
    #[must_use]
    pub fn standard(slots: u8) -> Self {
        Self {
            version: 0x00,
            max_slots: slots,
            max_eid_slots: slots,
            capabilities: CAPABILITY_VARIABLE_TX_POWER,
            supported_frame_types: FrameType::ALL
                .iter()
                .fold(0, |mask, frame_type| mask | frame_type.capability_bit()),
            tx_powers: SUPPORTED_TX_POWER.to_vec(),
        }
    }

    /// Whether each slot may use its own advertising interval.
    #[must_use]
    pub fn variable_interval(&self) -> bool {
        self.capabilities & CAPABILITY_VARIABLE_INTERVAL != 0
    }

    /// Whether each slot may use its own transmit power.
    #[must_use]
    pub fn variable_tx_power(&self) -> bool {
        self.capabilities & CAPABILITY_VARIABLE_TX_POWER != 0
    }

    /// Wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.tx_powers.len());
        out.push(self.version);
        out.push(self.max_slots);
        out.push(self.max_eid_slots);
        out.push(self.capabilities);
        out.extend_from_slice(&self.supported_frame_types.to_be_bytes());
        out.extend(self.tx_powers.iter().map(|&p| p as u8));
        out
    }
}

/// EID slot-data read-back: `0x30 | k | clock (BE) | eid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EidReadback {
    /// Rotation exponent
    pub rotation_exponent: u8,
    /// Beacon time counter in seconds
    pub clock_seconds: u32,
    /// Current ephemeral identifier
    pub eid: [u8; 8],
}

impl EidReadback {
    /// Wire encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; EID_READBACK_LEN] {
        let mut out = [0u8; EID_READBACK_LEN];
        out[0] = FrameType::Eid.to_u8();
        out[1] = self.rotation_exponent;
        out[2..6].copy_from_slice(&self.clock_seconds.to_be_bytes());
        out[6..14].copy_from_slice(&self.eid);
        out
    }

    /// Parse the read-back.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` / `FrameTooLong` unless exactly 14
    ///   bytes
    /// - `ProtocolError::UnknownFrameType` if the first byte is not 0x30
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EID_READBACK_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: EID_READBACK_LEN,
                actual: bytes.len(),
            });
        }
        if bytes.len() > EID_READBACK_LEN {
            return Err(ProtocolError::FrameTooLong { max: EID_READBACK_LEN, actual: bytes.len() });
        }
        if bytes[0] != FrameType::Eid.to_u8() {
            return Err(ProtocolError::UnknownFrameType(bytes[0]));
        }
        let mut eid = [0u8; 8];
        eid.copy_from_slice(&bytes[6..14]);
        Ok(Self {
            rotation_exponent: bytes[1],
            clock_seconds: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            eid,
        })
    }
}

/// Parse an advertising-interval write (big-endian u16 milliseconds).
///
/// # Errors
///
/// - `ProtocolError::InvalidValueLength` unless exactly 2 bytes
pub fn parse_interval(bytes: &[u8]) -> Result<u16> {
    match bytes {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ProtocolError::InvalidValueLength { expected: 2, actual: bytes.len() }),
    }
}

/// Parse a single signed byte (transmit power writes).
///
/// # Errors
///
/// - `ProtocolError::InvalidValueLength` unless exactly 1 byte
pub fn parse_dbm(bytes: &[u8]) -> Result<i8> {
    match bytes {
        [value] => Ok(*value as i8),
        _ => Err(ProtocolError::InvalidValueLength { expected: 1, actual: bytes.len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_byte_uid_write_is_rejected() {
        let mut write = vec![0x00];
        write.extend_from_slice(&[0xAB; 15]);

        assert_eq!(
            SlotWrite::parse(&write),
            Err(ProtocolError::InvalidWriteLength { frame_type: 0x00, length: 16 })
        );
    }

    #[test]
    fn single_zero_clears() {
        assert_eq!(SlotWrite::parse(&[0x00]), Ok(SlotWrite::Clear));
        assert_eq!(SlotWrite::parse(&[]), Ok(SlotWrite::Clear));
    }

    #[test]
    fn eid_writes_by_length() {
        let mut ecdh = vec![0x30];
        ecdh.extend_from_slice(&[9; 32]);
        ecdh.push(10);
        assert_eq!(
            SlotWrite::parse(&ecdh),
            Ok(SlotWrite::EidKeyExchange { peer_public_key: [9; 32], rotation_exponent: 10 })
        );

        let mut shared = vec![0x30];
        shared.extend_from_slice(&[7; 16]);
        shared.push(4);
        assert_eq!(
            SlotWrite::parse(&shared),
            Ok(SlotWrite::EidSharedKey { encrypted_identity_key: [7; 16], rotation_exponent: 4 })
        );

        assert!(SlotWrite::parse(&[0x30; 20]).is_err());
    }

    #[test]
    fn url_bounds() {
        assert!(SlotWrite::parse(&[0x10]).is_err());
        assert!(SlotWrite::parse(&[0x10, 0x00]).is_ok());
        assert!(SlotWrite::parse(&[0x10; 19]).is_ok());
        assert!(SlotWrite::parse(&[0x10; 20]).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(SlotWrite::parse(&[0x40, 1]), Err(ProtocolError::UnknownFrameType(0x40)));
    }

    #[test]
    fn tlm_trigger_is_one_byte() {
        assert_eq!(SlotWrite::parse(&[0x20]), Ok(SlotWrite::Tlm));
        assert!(SlotWrite::parse(&[0x20, 0x00]).is_err());
    }

    #[test]
    fn lock_commands() {
        assert_eq!(LockCommand::parse(&[0x00]), LockCommand::Lock);
        assert_eq!(LockCommand::parse(&[0x02]), LockCommand::DisableAutoRelock);
        assert_eq!(LockCommand::parse(&[0x01]), LockCommand::Invalid);
        assert_eq!(LockCommand::parse(&[0x00; 5]), LockCommand::Invalid);

        let mut change = vec![0x00];
        change.extend_from_slice(&[0x55; 16]);
        let parsed = LockCommand::parse(&change);
        assert_eq!(
            parsed,
            LockCommand::ChangeKey { encrypted_key: [0x55; 16], next_state: LockStateValue::Locked }
        );
        assert_eq!(parsed.resulting_state(), LockStateValue::Locked);
        assert_eq!(LockCommand::Invalid.resulting_state(), LockStateValue::Locked);
    }

    #[test]
    fn capabilities_encoding() {
        let caps = BroadcastCapabilities::standard(5);

        assert!(!caps.variable_interval());
        assert!(caps.variable_tx_power());
        insta::assert_snapshot!(hex::encode(caps.to_bytes()), @"00050502000f040300fcf8f4f0ecd8");
    }

    #[test]
    fn eid_readback_layout() {
        let readback =
            EidReadback { rotation_exponent: 10, clock_seconds: 0x0000_FF00, eid: [1; 8] };
        let bytes = readback.to_bytes();

        assert_eq!(&bytes[..6], &[0x30, 10, 0x00, 0x00, 0xFF, 0x00]);
        assert_eq!(EidReadback::parse(&bytes), Ok(readback));
    }

    #[test]
    fn characteristic_uuids() {
        assert_eq!(
            Characteristic::LockState.uuid(),
            0xA3C8_7506_8ED3_4BDF_8A39_A01B_EBED_E295
        );
        assert_eq!(Characteristic::from_short_uuid(0x750A), Some(Characteristic::SlotData));
        assert_eq!(Characteristic::from_short_uuid(0x7500), None);
    }

    #[test]
    fn interval_is_big_endian() {
        assert_eq!(parse_interval(&[0x03, 0xE8]), Ok(1000));
        assert!(parse_interval(&[0x03]).is_err());
        assert_eq!(parse_dbm(&[0xF8]), Ok(-8));
        assert!(parse_dbm(&[]).is_err());
    }
}
