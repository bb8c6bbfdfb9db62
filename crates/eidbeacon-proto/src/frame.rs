//! Broadcast frame layouts.
//!
//! Fixed-size frames (UID, TLM, eTLM, EID) are `#[repr(C)]` byte structs read
//! and written with zerocopy. URL frames are variable length and own their
//! encoded URL bytes.
//!
//! # Invariants
//!
//! - The first byte of every encoded frame is its [`FrameType`].
//! - TLM and eTLM share frame type 0x20 and are told apart by the version
//!   byte.
//! - Decoding never accepts trailing bytes.

use bytes::BufMut;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::errors::{ProtocolError, Result};

/// TLM version byte for plain telemetry.
pub const TLM_VERSION_PLAIN: u8 = 0x00;

/// TLM version byte for encrypted telemetry.
pub const TLM_VERSION_ENCRYPTED: u8 = 0x01;

/// Eddystone frame type, the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Static namespace + instance identifier
    Uid = 0x00,
    /// Compressed URL
    Url = 0x10,
    /// Telemetry, plain or encrypted
    Tlm = 0x20,
    /// Ephemeral identifier
    Eid = 0x30,
}

impl FrameType {
    /// All frame types in capability-bit order.
    pub const ALL: [Self; 4] = [Self::Uid, Self::Url, Self::Tlm, Self::Eid];

    /// Parse a frame-type byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Uid),
            0x10 => Some(Self::Url),
            0x20 => Some(Self::Tlm),
            0x30 => Some(Self::Eid),
            _ => None,
        }
    }

    /// Wire value of this frame type.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Bit advertised in the broadcast-capabilities "supported frame types"
    /// field.
    #[must_use]
    pub const fn capability_bit(self) -> u16 {
        match self {
            Self::Uid => 0x0001,
            Self::Url => 0x0002,
            Self::Tlm => 0x0004,
            Self::Eid => 0x0008,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_u8(value).ok_or(ProtocolError::UnknownFrameType(value))
    }
}

/// UID frame: 10-byte namespace and 6-byte instance.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct UidFrame {
    frame_type: u8,
    ranging_data: u8,
    namespace: [u8; 10],
    instance: [u8; 6],
    rfu: [u8; 2],
}

impl UidFrame {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Create a UID frame with zeroed reserved bytes.
    #[must_use]
    pub fn new(ranging_data: i8, namespace: [u8; 10], instance: [u8; 6]) -> Self {
        Self {
            frame_type: FrameType::Uid.to_u8(),
            ranging_data: ranging_data as u8,
            namespace,
            instance,
            rfu: [0; 2],
        }
    }

    /// Calibrated transmit power at 0 m, in dBm.
    #[must_use]
    pub fn ranging_data(&self) -> i8 {
        self.ranging_data as i8
    }

    /// Namespace identifier.
    #[must_use]
    pub fn namespace(&self) -> &[u8; 10] {
        &self.namespace
    }

    /// Instance identifier.
    #[must_use]
    pub fn instance(&self) -> &[u8; 6] {
        &self.instance
    }
}

/// URL frame: URL scheme prefix byte and up to 17 bytes of compressed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFrame {
    ranging_data: i8,
    scheme: u8,
    encoded_url: Vec<u8>,
}

impl UrlFrame {
    /// Smallest encoded frame: type, ranging and scheme.
    pub const MIN_SIZE: usize = 3;

    /// Largest encoded frame.
    pub const MAX_SIZE: usize = 20;

    /// Maximum compressed URL length after the scheme byte.
    pub const MAX_ENCODED_URL: usize = 17;

    /// Create a URL frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLong` if `encoded_url` exceeds 17 bytes
    pub fn new(ranging_data: i8, scheme: u8, encoded_url: &[u8]) -> Result<Self> {
        if encoded_url.len() > Self::MAX_ENCODED_URL {
            return Err(ProtocolError::FrameTooLong {
                max: Self::MAX_ENCODED_URL,
                actual: encoded_url.len(),
            });
        }
        Ok(Self { ranging_data, scheme, encoded_url: encoded_url.to_vec() })
    }

    /// Calibrated transmit power at 0 m, in dBm.
    #[must_use]
    pub fn ranging_data(&self) -> i8 {
        self.ranging_data
    }

    /// URL scheme prefix code.
    #[must_use]
    pub fn scheme(&self) -> u8 {
        self.scheme
    }

    /// Compressed URL bytes following the scheme.
    #[must_use]
    pub fn encoded_url(&self) -> &[u8] {
        &self.encoded_url
    }

    /// Encoded frame length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE + self.encoded_url.len()
    }
}

/// The 12 telemetry bytes shared by TLM and, once encrypted, eTLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryBody {
    /// Battery voltage in millivolts, 0 when not measured
    pub battery_mv: u16,
    /// Temperature, signed 8.8 fixed point degrees Celsius
    pub temperature: [u8; 2],
    /// Advertisements sent since boot
    pub advertisement_count: u32,
    /// Time since boot in 0.1 s units
    pub uptime_deciseconds: u32,
}

impl TelemetryBody {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;

    /// Big-endian encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.battery_mv.to_be_bytes());
        out[2..4].copy_from_slice(&self.temperature);
        out[4..8].copy_from_slice(&self.advertisement_count.to_be_bytes());
        out[8..12].copy_from_slice(&self.uptime_deciseconds.to_be_bytes());
        out
    }

    /// Decode the big-endian encoding.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            battery_mv: u16::from_be_bytes([bytes[0], bytes[1]]),
            temperature: [bytes[2], bytes[3]],
            advertisement_count: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            uptime_deciseconds: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    /// Convert a reading in quarter degrees Celsius to 8.8 fixed point.
    #[must_use]
    pub fn encode_temperature(quarter_degrees: i16) -> [u8; 2] {
        [(quarter_degrees >> 2) as u8, (quarter_degrees.wrapping_shl(6) & 0xFF) as u8]
    }

    /// Temperature in degrees Celsius.
    #[must_use]
    pub fn temperature_celsius(&self) -> f32 {
        f32::from(i16::from_be_bytes(self.temperature)) / 256.0
    }
}

/// Plain TLM frame.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct TlmFrame {
    frame_type: u8,
    version: u8,
    battery_mv: [u8; 2],
    temperature: [u8; 2],
    advertisement_count: [u8; 4],
    uptime_deciseconds: [u8; 4],
}

impl TlmFrame {
    /// Encoded size in bytes.
    pub const SIZE: usize = 14;

    /// Wrap a telemetry body.
    #[must_use]
    pub fn new(body: &TelemetryBody) -> Self {
        Self {
            frame_type: FrameType::Tlm.to_u8(),
            version: TLM_VERSION_PLAIN,
            battery_mv: body.battery_mv.to_be_bytes(),
            temperature: body.temperature,
            advertisement_count: body.advertisement_count.to_be_bytes(),
            uptime_deciseconds: body.uptime_deciseconds.to_be_bytes(),
        }
    }

    /// Telemetry carried by this frame.
    #[must_use]
    pub fn body(&self) -> TelemetryBody {
        TelemetryBody {
            battery_mv: u16::from_be_bytes(self.battery_mv),
            temperature: self.temperature,
            advertisement_count: u32::from_be_bytes(self.advertisement_count),
            uptime_deciseconds: u32::from_be_bytes(self.uptime_deciseconds),
        }
    }
}

/// Encrypted TLM frame.
///
/// The ciphertext is the 12-byte [`TelemetryBody`] sealed under a slot's
/// identity key; `salt` completes the nonce and `tag` is the truncated
/// authentication tag.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct EtlmFrame {
    frame_type: u8,
    version: u8,
    encrypted: [u8; 12],
    salt: [u8; 2],
    tag: [u8; 2],
    rfu: u8,
}

impl EtlmFrame {
    /// Encoded size in bytes.
    pub const SIZE: usize = 19;

    /// Build an eTLM frame from sealed telemetry.
    #[must_use]
    pub fn new(encrypted: [u8; 12], salt: [u8; 2], tag: [u8; 2]) -> Self {
        Self {
            frame_type: FrameType::Tlm.to_u8(),
            version: TLM_VERSION_ENCRYPTED,
            encrypted,
            salt,
            tag,
            rfu: 0,
        }
    }

    /// Sealed telemetry body.
    #[must_use]
    pub fn encrypted(&self) -> &[u8; 12] {
        &self.encrypted
    }

    /// Random nonce suffix.
    #[must_use]
    pub fn salt(&self) -> [u8; 2] {
        self.salt
    }

    /// Truncated authentication tag.
    #[must_use]
    pub fn tag(&self) -> [u8; 2] {
        self.tag
    }
}

/// EID frame: the current 8-byte ephemeral identifier.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct EidFrame {
    frame_type: u8,
    ranging_data: u8,
    eid: [u8; 8],
}

impl EidFrame {
    /// Encoded size in bytes.
    pub const SIZE: usize = 10;

    /// Create an EID frame.
    #[must_use]
    pub fn new(ranging_data: i8, eid: [u8; 8]) -> Self {
        Self { frame_type: FrameType::Eid.to_u8(), ranging_data: ranging_data as u8, eid }
    }

    /// Calibrated transmit power at 0 m, in dBm.
    #[must_use]
    pub fn ranging_data(&self) -> i8 {
        self.ranging_data as i8
    }

    /// Ephemeral identifier.
    #[must_use]
    pub fn eid(&self) -> &[u8; 8] {
        &self.eid
    }

    /// Replace the identifier after a rotation.
    pub fn set_eid(&mut self, eid: [u8; 8]) {
        self.eid = eid;
    }
}

/// Any frame the beacon can broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastFrame {
    /// UID frame
    Uid(UidFrame),
    /// URL frame
    Url(UrlFrame),
    /// Plain telemetry
    Tlm(TlmFrame),
    /// Encrypted telemetry
    Etlm(EtlmFrame),
    /// Ephemeral identifier
    Eid(EidFrame),
}

impl BroadcastFrame {
    /// Frame type byte. eTLM reports [`FrameType::Tlm`].
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Uid(_) => FrameType::Uid,
            Self::Url(_) => FrameType::Url,
            Self::Tlm(_) | Self::Etlm(_) => FrameType::Tlm,
            Self::Eid(_) => FrameType::Eid,
        }
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Uid(_) => UidFrame::SIZE,
            Self::Url(url) => url.encoded_len(),
            Self::Tlm(_) => TlmFrame::SIZE,
            Self::Etlm(_) => EtlmFrame::SIZE,
            Self::Eid(_) => EidFrame::SIZE,
        }
    }

    /// Calibrated 0 m power, for frames that carry it.
    #[must_use]
    pub fn ranging_data(&self) -> Option<i8> {
        match self {
            Self::Uid(uid) => Some(uid.ranging_data()),
            Self::Url(url) => Some(url.ranging_data()),
            Self::Eid(eid) => Some(eid.ranging_data()),
            Self::Tlm(_) | Self::Etlm(_) => None,
        }
    }

    /// Update the calibrated 0 m power. TLM frames are left untouched.
    pub fn set_ranging_data(&mut self, dbm: i8) {
        match self {
            Self::Uid(uid) => uid.ranging_data = dbm as u8,
            Self::Url(url) => url.ranging_data = dbm,
            Self::Eid(eid) => eid.ranging_data = dbm as u8,
            Self::Tlm(_) | Self::Etlm(_) => {},
        }
    }

    /// Write the frame bytes into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        match self {
            Self::Uid(uid) => dst.put_slice(uid.as_bytes()),
            Self::Url(url) => {
                dst.put_u8(FrameType::Url.to_u8());
                dst.put_i8(url.ranging_data);
                dst.put_u8(url.scheme);
                dst.put_slice(&url.encoded_url);
            },
            Self::Tlm(tlm) => dst.put_slice(tlm.as_bytes()),
            Self::Etlm(etlm) => dst.put_slice(etlm.as_bytes()),
            Self::Eid(eid) => dst.put_slice(eid.as_bytes()),
        }
    }

    /// Encode into a freshly allocated buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        debug_assert_eq!(out.len(), self.encoded_len());
        out
    }

    /// Decode a complete frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` / `FrameTooLong` on length mismatch
    /// - `ProtocolError::UnknownFrameType` for an unrecognised type byte
    /// - `ProtocolError::UnsupportedTlmVersion` for a TLM version other than
    ///   plain or encrypted
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(&type_byte) = bytes.first() else {
            return Err(ProtocolError::FrameTooShort { expected: 1, actual: 0 });
        };

        match FrameType::try_from(type_byte)? {
            FrameType::Uid => {
                check_exact(bytes, UidFrame::SIZE)?;
                let Ok(uid) = UidFrame::read_from_bytes(bytes) else {
                    unreachable!("UID length checked above");
                };
                Ok(Self::Uid(uid))
            },
            FrameType::Url => {
                if bytes.len() < UrlFrame::MIN_SIZE {
                    return Err(ProtocolError::FrameTooShort {
                        expected: UrlFrame::MIN_SIZE,
                        actual: bytes.len(),
                    });
                }
                if bytes.len() > UrlFrame::MAX_SIZE {
                    return Err(ProtocolError::FrameTooLong {
                        max: UrlFrame::MAX_SIZE,
                        actual: bytes.len(),
                    });
                }
                Ok(Self::Url(UrlFrame {
                    ranging_data: bytes[1] as i8,
                    scheme: bytes[2],
                    encoded_url: bytes[3..].to_vec(),
                }))
            },
            FrameType::Tlm => {
                let version = *bytes
                    .get(1)
                    .ok_or(ProtocolError::FrameTooShort { expected: 2, actual: bytes.len() })?;
                match version {
                    TLM_VERSION_PLAIN => {
                        check_exact(bytes, TlmFrame::SIZE)?;
                        let Ok(tlm) = TlmFrame::read_from_bytes(bytes) else {
                            unreachable!("TLM length checked above");
                        };
                        Ok(Self::Tlm(tlm))
                    },
                    TLM_VERSION_ENCRYPTED => {
                        check_exact(bytes, EtlmFrame::SIZE)?;
                        let Ok(etlm) = EtlmFrame::read_from_bytes(bytes) else {
                            unreachable!("eTLM length checked above");
                        };
                        Ok(Self::Etlm(etlm))
                    },
                    other => Err(ProtocolError::UnsupportedTlmVersion(other)),
                }
            },
            FrameType::Eid => {
                check_exact(bytes, EidFrame::SIZE)?;
                let Ok(eid) = EidFrame::read_from_bytes(bytes) else {
                    unreachable!("EID length checked above");
                };
                Ok(Self::Eid(eid))
            },
        }
    }
}

fn check_exact(bytes: &[u8], size: usize) -> Result<()> {
    if bytes.len() < size {
        return Err(ProtocolError::FrameTooShort { expected: size, actual: bytes.len() });
    }
    if bytes.len() > size {
        return Err(ProtocolError::FrameTooLong { max: size, actual: bytes.len() });
    }
    Ok(())
}
