//! Error types for cryptographic operations.

use thiserror::Error;

/// Failures of the fallible cryptographic operations.
///
/// Block encryption and key derivation cannot fail; only key agreement with
/// a malicious peer key and telemetry authentication can.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// X25519 produced an all-zero shared secret
    #[error("key agreement produced an all-zero shared secret")]
    ZeroSharedSecret,

    /// eTLM tag did not verify
    #[error("telemetry authentication failed")]
    AuthenticationFailed,
}
