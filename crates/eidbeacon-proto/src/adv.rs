//! BLE advertising payload around an Eddystone frame.
//!
//! ```text
//! 02 01 06                 flags: LE general discoverable, BR/EDR off
//! 03 03 AA FE              complete list of 16-bit service UUIDs
//! len 16 AA FE frame...    service data
//! ```
//!
//! A 20-byte frame fills the 31-byte legacy advertising payload exactly.

/// 16-bit service UUID assigned to Eddystone.
pub const EDDYSTONE_UUID: u16 = 0xFEAA;

/// Largest legacy advertising payload.
pub const MAX_ADVERTISING_DATA: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_COMPLETE_16BIT_UUIDS: u8 = 0x03;
const AD_TYPE_SERVICE_DATA: u8 = 0x16;
const FLAGS_GENERAL_DISCOVERABLE_NO_BREDR: u8 = 0x06;

/// Wrap encoded frame bytes in flags, UUID list and service data.
///
/// Frames longer than 20 bytes are truncated to keep the payload within
/// [`MAX_ADVERTISING_DATA`].
#[must_use]
pub fn advertising_data(frame: &[u8]) -> Vec<u8> {
    let [uuid_lo, uuid_hi] = EDDYSTONE_UUID.to_le_bytes();
    let frame = &frame[..frame.len().min(20)];

    let mut out = Vec::with_capacity(MAX_ADVERTISING_DATA);
    out.extend_from_slice(&[2, AD_TYPE_FLAGS, FLAGS_GENERAL_DISCOVERABLE_NO_BREDR]);
    out.extend_from_slice(&[3, AD_TYPE_COMPLETE_16BIT_UUIDS, uuid_lo, uuid_hi]);
    out.push((frame.len() + 3) as u8);
    out.push(AD_TYPE_SERVICE_DATA);
    out.extend_from_slice(&[uuid_lo, uuid_hi]);
    out.extend_from_slice(frame);

    debug_assert!(out.len() <= MAX_ADVERTISING_DATA);
    out
}

/// Extract the Eddystone frame from an advertising payload.
///
/// Returns `None` when no Eddystone service-data structure is present or the
/// payload is malformed.
#[must_use]
pub fn service_data(advertising: &[u8]) -> Option<&[u8]> {
    let [uuid_lo, uuid_hi] = EDDYSTONE_UUID.to_le_bytes();
    let mut rest = advertising;
    while let [len, tail @ ..] = rest {
        let len = usize::from(*len);
        if len == 0 || tail.len() < len {
            return None;
        }
        let (structure, next) = tail.split_at(len);
        if let [AD_TYPE_SERVICE_DATA, lo, hi, frame @ ..] = structure {
            if *lo == uuid_lo && *hi == uuid_hi {
                return Some(frame);
            }
        }
        rest = next;
    }
    None
}
