//! Error types for cryptographic operations.

use kura_core::defaults::{KDF_CANCELLED_CODE, KDF_FAILED_CODE};
use thiserror::Error;

/// Outcome of a key derivation that produced no key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KdfError {
    /// The derivation was cancelled before it delivered a key.
    #[error("Key derivation cancelled")]
    Cancelled,

    /// Argon2 rejected the cost parameters.
    #[error("Invalid key derivation parameters: {0}")]
    InvalidParameters(String),

    /// The worker reported a failure.
    #[error("Key derivation failed ({code}): {message}")]
    Failed { code: i32, message: String },
}

impl KdfError {
    /// Numeric code in the worker's reporting convention.
    pub fn code(&self) -> i32 {
        match self {
            Self::Cancelled => KDF_CANCELLED_CODE,
            Self::InvalidParameters(_) => KDF_FAILED_CODE,
            Self::Failed { code, .. } => *code,
        }
    }
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Envelope or payload text is malformed. Not a password problem.
    #[error("Parse failed: {0}")]
    Parse(String),

    /// Authentication tag mismatch: wrong password or damaged data.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Key derivation produced no key.
    #[error(transparent)]
    Kdf(#[from] KdfError),

    /// Raw key material has the wrong length.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The key was imported without the usage the operation needs.
    #[error("Key usage not permitted: {0}")]
    KeyUsage(String),

    /// Invalid format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The catalog has no image support or the loader has no such image.
    #[error("Image unavailable: {0}")]
    ImageUnavailable(String),

    /// Catalog model error.
    #[error(transparent)]
    Catalog(#[from] kura_core::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
