//! Single-block AES-128.
//!
//! The beacon only ever needs ECB on one block: key wrapping under the lock
//! key, the challenge-response, and TK/EID derivation.

use aes::{
    Aes128,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray},
};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Encrypt one block with AES-128.
#[must_use]
pub fn encrypt_block(key: &[u8; 16], plaintext: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(plaintext);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// Decrypt one block with AES-128.
#[must_use]
pub fn decrypt_block(key: &[u8; 16], ciphertext: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(ciphertext);
    cipher.decrypt_block(&mut block);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes16(s: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex::decode(s).expect("valid hex"));
        out
    }

    #[test]
    fn fips_197_vector() {
        let key = bytes16("000102030405060708090a0b0c0d0e0f");
        let plaintext = bytes16("00112233445566778899aabbccddeeff");

        let ciphertext = encrypt_block(&key, &plaintext);

        assert_eq!(hex::encode(ciphertext), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(decrypt_block(&key, &ciphertext), plaintext);
    }
}
