//! 128-bit key wrapper.

use zeroize::Zeroize;

/// A 16-byte AES key (identity, temporary or lock key).
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AesKey([u8; 16]);

impl AesKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether every byte is zero (an unset slot key).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Overwrite the key with zeros.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

impl Drop for AesKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
