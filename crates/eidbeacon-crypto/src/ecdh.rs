//! X25519 key agreement and identity key derivation.
//!
//! The peer sends its public key; the beacon answers with its own and both
//! sides derive the same identity key:
//!
//! ```text
//! shared = X25519(beacon_secret, peer_public)
//! digest = HMAC-SHA256(key = shared, peer_public ‖ beacon_public)
//! IK     = HMAC-SHA256(key = 0x01, digest)[..16]
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{error::CryptoError, keys::AesKey};

type HmacSha256 = Hmac<Sha256>;

/// Key for the second HMAC step.
const IK_DERIVATION_KEY: &[u8] = &[0x01];

/// A slot's X25519 key pair.
///
/// The secret is zeroized on drop.
pub struct BeaconKeyPair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl BeaconKeyPair {
    /// Build a key pair from 32 secret bytes (random in production, restored
    /// from storage after a reboot). Clamping is applied by X25519 itself.
    #[must_use]
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = PublicKey::from(&StaticSecret::from(secret));
        Self { secret, public: public.to_bytes() }
    }

    /// Public key to hand to the peer.
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Secret bytes, for persistence only.
    #[must_use]
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// X25519 shared secret with `peer_public`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::ZeroSharedSecret` if the peer key is a low-order point
    pub fn shared_secret(&self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        let shared =
            StaticSecret::from(self.secret).diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::ZeroSharedSecret);
        }
        Ok(*shared.as_bytes())
    }
}

impl std::fmt::Debug for BeaconKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

impl Drop for BeaconKeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Derive the identity key from an X25519 shared secret.
#[must_use]
pub fn derive_identity_key(
    shared_secret: &[u8; 32],
    peer_public: &[u8; 32],
    beacon_public: &[u8; 32],
) -> AesKey {
    let Ok(mut mac) = HmacSha256::new_from_slice(shared_secret) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(peer_public);
    mac.update(beacon_public);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&mac.finalize().into_bytes());

    let Ok(mut mac) = HmacSha256::new_from_slice(IK_DERIVATION_KEY) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(&digest);
    digest.zeroize();

    let mut ik = [0u8; 16];
    ik.copy_from_slice(&mac.finalize().into_bytes()[..16]);
    AesKey::from_bytes(ik)
}

/// Run key agreement with `peer_public` and derive the identity key.
///
/// # Errors
///
/// - `CryptoError::ZeroSharedSecret` if the peer key is a low-order point
pub fn identity_key_from_agreement(
    key_pair: &BeaconKeyPair,
    peer_public: &[u8; 32],
) -> Result<AesKey, CryptoError> {
    let mut shared = key_pair.shared_secret(peer_public)?;
    let ik = derive_identity_key(&shared, peer_public, key_pair.public_key());
    shared.zeroize();
    Ok(ik)
}
