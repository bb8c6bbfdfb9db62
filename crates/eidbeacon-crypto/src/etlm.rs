//! Encrypted telemetry (eTLM) using AES-128-EAX.
//!
//! EAX is composed here from CMAC and CTR because the eTLM nonce is 6 bytes
//! (`t'` big-endian ‖ 2-byte salt) and the tag is truncated to 2 bytes.
//!
//! ```text
//! N' = CMAC(K, [0]^15 ‖ 0 ‖ nonce)
//! H' = CMAC(K, [0]^15 ‖ 1 ‖ header)
//! C  = AES-CTR(K, iv = N', plaintext)
//! C' = CMAC(K, [0]^15 ‖ 2 ‖ C)
//! T  = N' ⊕ H' ⊕ C'
//! ```

use aes::{Aes128, cipher::generic_array::GenericArray};
use cmac::{Cmac, Mac};
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::{error::CryptoError, keys::AesKey, rotation::window_start as clear_low_bits};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Random bytes appended to the time counter to form the nonce.
pub const SALT_SIZE: usize = 2;

/// Truncated authentication tag length.
pub const ETLM_TAG_SIZE: usize = 2;

const BODY_SIZE: usize = 12;

/// Telemetry sealed under a slot's identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedTelemetry {
    /// Encrypted telemetry body
    pub ciphertext: [u8; BODY_SIZE],
    /// Nonce suffix
    pub salt: [u8; SALT_SIZE],
    /// Truncated authentication tag
    pub tag: [u8; ETLM_TAG_SIZE],
}

/// Seal a 12-byte telemetry body.
///
/// `clock_seconds` and `rotation_exponent` are those of the EID slot whose
/// identity key is used; the nonce carries the start of its current window.
/// `salt` must be fresh random bytes.
#[must_use]
pub fn seal_telemetry(
    identity_key: &AesKey,
    clock_seconds: u32,
    rotation_exponent: u8,
    salt: [u8; SALT_SIZE],
    body: &[u8; BODY_SIZE],
) -> SealedTelemetry {
    let nonce = build_nonce(clear_low_bits(clock_seconds, rotation_exponent), salt);
    let mut ciphertext = *body;
    let full_tag = eax_seal(identity_key.as_bytes(), &nonce, &[], &mut ciphertext);

    let mut tag = [0u8; ETLM_TAG_SIZE];
    tag.copy_from_slice(&full_tag[..ETLM_TAG_SIZE]);
    SealedTelemetry { ciphertext, salt, tag }
}

/// Verify and decrypt sealed telemetry.
///
/// # Errors
///
/// - `CryptoError::AuthenticationFailed` if the tag does not verify
pub fn open_telemetry(
    identity_key: &AesKey,
    clock_seconds: u32,
    rotation_exponent: u8,
    sealed: &SealedTelemetry,
) -> Result<[u8; BODY_SIZE], CryptoError> {
    let nonce = build_nonce(clear_low_bits(clock_seconds, rotation_exponent), sealed.salt);
    let mut plaintext = sealed.ciphertext;
    eax_open(identity_key.as_bytes(), &nonce, &[], &mut plaintext, &sealed.tag)?;
    Ok(plaintext)
}

fn build_nonce(window_start: u32, salt: [u8; SALT_SIZE]) -> [u8; 6] {
    let mut nonce = [0u8; 6];
    nonce[..4].copy_from_slice(&window_start.to_be_bytes());
    nonce[4..].copy_from_slice(&salt);
    nonce
}

/// Encrypt `buffer` in place and return the full 16-byte tag.
fn eax_seal(key: &[u8; 16], nonce: &[u8], header: &[u8], buffer: &mut [u8]) -> [u8; 16] {
    let n = omac(key, 0, nonce);
    let h = omac(key, 1, header);

    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&n));
    cipher.apply_keystream(buffer);

    let c = omac(key, 2, buffer);
    xor3(&n, &h, &c)
}

/// Verify a (possibly truncated) tag and decrypt `buffer` in place.
fn eax_open(
    key: &[u8; 16],
    nonce: &[u8],
    header: &[u8],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    let n = omac(key, 0, nonce);
    let h = omac(key, 1, header);
    let c = omac(key, 2, buffer);
    let expected = xor3(&n, &h, &c);

    if tag.is_empty() || tag.len() > expected.len() {
        return Err(CryptoError::AuthenticationFailed);
    }
    let diff = tag.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return Err(CryptoError::AuthenticationFailed);
    }

    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&n));
    cipher.apply_keystream(buffer);
    Ok(())
}

/// CMAC over a domain-separation block followed by `data`.
fn omac(key: &[u8; 16], domain: u8, data: &[u8]) -> [u8; 16] {
    let Ok(mut mac) = Cmac::<Aes128>::new_from_slice(key) else {
        unreachable!("AES-128 CMAC accepts a 16-byte key");
    };
    let mut prefix = [0u8; 16];
    prefix[15] = domain;
    mac.update(&prefix);
    mac.update(data);

    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn xor3(a: &[u8; 16], b: &[u8; 16], c: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i] ^ c[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key16(s: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex::decode(s).expect("valid hex"));
        out
    }

    // Test vectors from the EAX paper (Bellare, Rogaway, Wagner), appendix.
    #[test]
    fn eax_vector_empty_message() {
        let key = key16("233952DEE4D5ED5F9B9C6D6FF80FF478");
        let nonce = hex::decode("62EC67F9C3A4A407FCB2A8C49031A8B3").expect("hex");
        let header = hex::decode("6BFB914FD07EAE6B").expect("hex");

        let tag = eax_seal(&key, &nonce, &header, &mut []);

        assert_eq!(hex::encode_upper(tag), "E037830E8389F27B025A2D6527E79D01");
    }

    #[test]
    fn eax_vector_two_byte_message() {
        let key = key16("91945D3F4DCBEE0BF45EF52255F095A4");
        let nonce = hex::decode("BECAF043B0A23D843194BA972C66DEBD").expect("hex");
        let header = hex::decode("FA3BFD4806EB53FA").expect("hex");
        let mut buffer = hex::decode("F7FB").expect("hex");

        let tag = eax_seal(&key, &nonce, &header, &mut buffer);

        assert_eq!(hex::encode_upper(&buffer), "19DD");
        assert_eq!(hex::encode_upper(tag), "5C4C9331049D0BDAB0277408F67967E5");

        eax_open(&key, &nonce, &header, &mut buffer, &tag).expect("tag verifies");
        assert_eq!(hex::encode_upper(&buffer), "F7FB");
    }

    #[test]
    fn telemetry_roundtrip() {
        let ik = AesKey::from_bytes([0x5A; 16]);
        let body = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

        let sealed = seal_telemetry(&ik, 70_000, 10, [0xC0, 0xDE], &body);

        assert_ne!(sealed.ciphertext, body);
        assert_eq!(open_telemetry(&ik, 70_000, 10, &sealed), Ok(body));
    }

    #[test]
    fn nonce_uses_window_start() {
        let ik = AesKey::from_bytes([0x5A; 16]);
        let body = [0u8; 12];

        let early = seal_telemetry(&ik, 1024, 10, [0, 0], &body);
        let late = seal_telemetry(&ik, 2047, 10, [0, 0], &body);
        let next = seal_telemetry(&ik, 2048, 10, [0, 0], &body);

        assert_eq!(early, late);
        assert_ne!(early.ciphertext, next.ciphertext);
    }

    #[test]
    fn tampering_is_detected() {
        let ik = AesKey::from_bytes([0x5A; 16]);
        let mut sealed = seal_telemetry(&ik, 0, 0, [1, 2], &[0; 12]);
        sealed.ciphertext[0] ^= 0x01;

        assert_eq!(open_telemetry(&ik, 0, 0, &sealed), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal_telemetry(&AesKey::from_bytes([1; 16]), 0, 0, [1, 2], &[0; 12]);

        assert_eq!(
            open_telemetry(&AesKey::from_bytes([2; 16]), 0, 0, &sealed),
            Err(CryptoError::AuthenticationFailed)
        );
    }
}
