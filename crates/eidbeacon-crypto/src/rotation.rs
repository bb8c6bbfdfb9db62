//! Temporary key and EID derivation.
//!
//! Both are a single AES-128 block over a mostly-zero plaintext:
//!
//! ```text
//! TK  = AES(IK, 00×11 | FF | 00 00 | clock[31:24] | clock[23:16])
//! EID = AES(TK, 00×11 | k  | t'[31:0])[..8]       t' = clock & !(2^k - 1)
//! ```

use crate::{block::encrypt_block, keys::AesKey};

/// The temporary key covers a window of `2^16` seconds.
pub const TEMPORARY_KEY_PERIOD_BITS: u32 = 16;

const TK_SALT: u8 = 0xFF;

/// Time counter with its low `k` bits cleared.
#[must_use]
pub fn window_start(clock_seconds: u32, rotation_exponent: u8) -> u32 {
    let mask = 1u32.checked_shl(u32::from(rotation_exponent)).map_or(0, |bit| !(bit - 1));
    clock_seconds & mask
}

/// Derive the temporary key for the 65 536-second window containing
/// `clock_seconds`.
#[must_use]
pub fn derive_temporary_key(identity_key: &AesKey, clock_seconds: u32) -> AesKey {
    let mut block = [0u8; 16];
    block[11] = TK_SALT;
    block[14] = (clock_seconds >> 24) as u8;
    block[15] = (clock_seconds >> 16) as u8;

    AesKey::from_bytes(encrypt_block(identity_key.as_bytes(), &block))
}

/// Derive the 8-byte EID for the `2^k`-second window containing
/// `clock_seconds`.
#[must_use]
pub fn derive_eid(temporary_key: &AesKey, rotation_exponent: u8, clock_seconds: u32) -> [u8; 8] {
    let mut block = [0u8; 16];
    block[11] = rotation_exponent;
    block[12..16].copy_from_slice(&window_start(clock_seconds, rotation_exponent).to_be_bytes());

    let encrypted = encrypt_block(temporary_key.as_bytes(), &block);
    let mut eid = [0u8; 8];
    eid.copy_from_slice(&encrypted[..8]);
    eid
}
