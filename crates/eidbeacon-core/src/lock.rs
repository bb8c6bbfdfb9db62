//! Lock state and challenge-response unlock.
//!
//! ```text
//!            write Unlock (token = AES(lock_key, challenge))
//!   ┌────────┐ ─────────────────────────────> ┌──────────┐
//!   │ Locked │                                │ Unlocked │
//!   └────────┘ <───────────────────────────── └──────────┘
//!        ▲       write LockState [0x00] / disconnect   │
//!        │                                             │ write LockState [0x02]
//!        │       write LockState [0x00]                ▼
//!        └───────────────────────────────── ┌──────────────────────┐
//!                                           │ UnlockedNoAutoRelock │
//!                                           └──────────────────────┘
//! ```

use eidbeacon_crypto::{AesKey, decrypt_block, encrypt_block};
use eidbeacon_proto::LockStateValue;

use crate::env::Environment;

/// Lock key of a device that has never been given one.
pub const DEFAULT_LOCK_KEY: [u8; 16] = [0xFF; 16];

/// Lock key, lock state and the outstanding unlock challenge.
#[derive(Debug)]
pub struct LockState {
    key: AesKey,
    state: LockStateValue,
    pending_challenge: Option<[u8; 16]>,
}

impl LockState {
    /// Locked, with `key` as the lock key.
    pub fn new(key: AesKey) -> Self {
        Self { key, state: LockStateValue::Locked, pending_challenge: None }
    }

    /// Current lock state.
    pub fn state(&self) -> LockStateValue {
        self.state
    }

    /// Whether configuration resources are accessible.
    pub fn is_unlocked(&self) -> bool {
        self.state.is_unlocked()
    }

    /// Current lock key.
    pub fn key(&self) -> &AesKey {
        &self.key
    }

    /// Set the lock state directly (lock-state writes).
    pub fn set_state(&mut self, state: LockStateValue) {
        self.state = state;
    }

    /// Draw a fresh challenge, replacing any outstanding one.
    pub fn generate_challenge<E: Environment>(&mut self, env: &E) -> [u8; 16] {
        let challenge = env.random_array();
        self.pending_challenge = Some(challenge);
        challenge
    }

    /// Check `token` against the outstanding challenge.
    ///
    /// The challenge is consumed whatever the outcome. Succeeds only with a
    /// 16-byte token equal to `AES(lock_key, challenge)`, and moves to
    /// `Unlocked`.
    pub fn verify(&mut self, token: &[u8]) -> bool {
        let Some(challenge) = self.pending_challenge.take() else {
            return false;
        };
        if token.len() != 16 {
            return false;
        }
        let expected = encrypt_block(self.key.as_bytes(), &challenge);
        let diff = expected.iter().zip(token).fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            return false;
        }
        self.state = LockStateValue::Unlocked;
        true
    }

    /// Replace the lock key with `encrypted_new_key` decrypted under the
    /// current key.
    pub fn change_key(&mut self, encrypted_new_key: &[u8; 16]) -> &AesKey {
        self.key = AesKey::from_bytes(decrypt_block(self.key.as_bytes(), encrypted_new_key));
        &self.key
    }

    /// Wrap a 16-byte key under the lock key.
    pub fn wrap(&self, block: &[u8; 16]) -> [u8; 16] {
        encrypt_block(self.key.as_bytes(), block)
    }

    /// Unwrap a 16-byte key sent under the lock key.
    pub fn unwrap_key(&self, block: &[u8; 16]) -> AesKey {
        AesKey::from_bytes(decrypt_block(self.key.as_bytes(), block))
    }

    /// Relock after the peer disconnects. `UnlockedNoAutoRelock` stays.
    ///
    /// Returns true if the state changed.
    pub fn relock_on_disconnect(&mut self) -> bool {
        self.pending_challenge = None;
        if self.state == LockStateValue::Unlocked {
            self.state = LockStateValue::Locked;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::TestEnv;

    #[test]
    fn correct_token_unlocks() {
        let env = TestEnv::with_seed(1);
        let mut lock = LockState::new(AesKey::from_bytes([0x11; 16]));

        let challenge = lock.generate_challenge(&env);
        let token = encrypt_block(&[0x11; 16], &challenge);

        assert!(lock.verify(&token));
        assert_eq!(lock.state(), LockStateValue::Unlocked);
    }

    #[test]
    fn challenge_is_single_use() {
        let env = TestEnv::with_seed(2);
        let mut lock = LockState::new(AesKey::from_bytes([0x11; 16]));

        let challenge = lock.generate_challenge(&env);
        let token = encrypt_block(&[0x11; 16], &challenge);

        assert!(!lock.verify(&[0u8; 16]));
        assert!(!lock.verify(&token));
        assert_eq!(lock.state(), LockStateValue::Locked);
    }

    #[test]
    fn short_token_fails() {
        let env = TestEnv::with_seed(3);
        let mut lock = LockState::new(AesKey::from_bytes(DEFAULT_LOCK_KEY));
        let challenge = lock.generate_challenge(&env);
        let token = encrypt_block(&DEFAULT_LOCK_KEY, &challenge);

        assert!(!lock.verify(&token[..15]));
    }

    #[test]
    fn key_change_decrypts_under_old_key() {
        let mut lock = LockState::new(AesKey::from_bytes([0x11; 16]));
        let encrypted = encrypt_block(&[0x11; 16], &[0x22; 16]);

        lock.change_key(&encrypted);

        assert_eq!(lock.key(), &AesKey::from_bytes([0x22; 16]));
    }

    #[test]
    fn disconnect_keeps_no_auto_relock() {
        let mut lock = LockState::new(AesKey::default());

        lock.set_state(LockStateValue::UnlockedNoAutoRelock);
        assert!(!lock.relock_on_disconnect());
        assert!(lock.is_unlocked());

        lock.set_state(LockStateValue::Unlocked);
        assert!(lock.relock_on_disconnect());
        assert_eq!(lock.state(), LockStateValue::Locked);
    }
}
