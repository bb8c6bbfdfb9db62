//! Eddystone EID Cryptographic Primitives
//!
//! Building blocks for ephemeral identifiers and encrypted telemetry. Pure
//! functions with deterministic outputs; callers provide random bytes so the
//! beacon logic can be tested with seeded randomness.
//!
//! # Key Lifecycle
//!
//! A registered slot holds one long-lived identity key (IK). Everything that
//! goes on the air is derived from it and from the beacon's time counter.
//!
//! ```text
//! Peer public key ──┐
//!                   ▼
//! X25519(beacon secret, peer public) → shared secret
//!                   │
//!                   ▼
//! HMAC-SHA256(shared, peer ‖ beacon) → HMAC-SHA256(0x01, ·)[..16]
//!                   │                        (or: AES-ECB-decrypt(lock key, IK'))
//!                   ▼
//!           Identity Key (IK)
//!          ┌────────┴─────────┐
//!          ▼                  ▼
//! AES(IK, clock[31:16])   EAX(IK, t' ‖ salt)
//!  → Temporary Key (TK)    → eTLM ciphertext + 2-byte tag
//!          │
//!          ▼
//! AES(TK, k ‖ t')[..8] → EID
//! ```
//!
//! TK changes every 65 536 seconds; the EID changes every `2^k` seconds,
//! where `t'` is the time counter with its low `k` bits cleared.
//!
//! # Security
//!
//! - Key material ([`AesKey`], [`BeaconKeyPair`]) is zeroized on drop
//! - An all-zero X25519 shared secret (low-order peer point) is rejected
//! - eTLM authentication uses a 2-byte tag, which bounds forgery resistance
//!   to 1 in 65 536 per attempt; the format fixes this length

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod block;
mod ecdh;
mod error;
mod etlm;
mod keys;
mod rotation;

pub use block::{BLOCK_SIZE, decrypt_block, encrypt_block};
pub use ecdh::{BeaconKeyPair, derive_identity_key, identity_key_from_agreement};
pub use error::CryptoError;
pub use etlm::{ETLM_TAG_SIZE, SALT_SIZE, SealedTelemetry, open_telemetry, seal_telemetry};
pub use keys::AesKey;
pub use rotation::{TEMPORARY_KEY_PERIOD_BITS, derive_eid, derive_temporary_key, window_start};
