//! Cryptographic errors

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Secret key is zero, out of range or of the wrong length
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// r/s scalars do not form a valid signature
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Recovery id is not 0 or 1
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u64),

    /// Public key recovery failed
    #[error("public key recovery failed: {0}")]
    RecoveryFailed(String),

    /// Signing failed
    #[error("signing failed: {0}")]
    SigningFailed(String),
}
