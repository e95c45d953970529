//! Encrypted envelope: the at-rest form of a catalog.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "protection": {
//!     "encrypted_key": "base64://...",
//!     "key_nonce": "base64://<12 bytes>",
//!     "data_nonce": "base64://<12 bytes>",
//!     "kdf_params": { "memory": 67108864, "iterations": 3, "threads": 4, "salt": "base64://..." }
//!   },
//!   "internals": "base64://..."
//! }
//! ```
//!
//! `kdf_params` is also accepted under its older name `argon2`.

use kura_core::defaults::NONCE_LENGTH;
use kura_core::wire;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfParams;

/// Wrapped database key and the parameters needed to unwrap it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeProtection {
    /// Database key encrypted under the user key.
    #[serde(with = "wire::bytes")]
    pub encrypted_key: Vec<u8>,

    #[serde(with = "wire::nonce")]
    pub key_nonce: [u8; NONCE_LENGTH],

    #[serde(with = "wire::nonce")]
    pub data_nonce: [u8; NONCE_LENGTH],

    #[serde(alias = "argon2")]
    pub kdf_params: KdfParams,
}

/// A sealed catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub protection: EnvelopeProtection,

    /// Catalog payload encrypted under the database key.
    #[serde(with = "wire::bytes")]
    pub internals: Vec<u8>,
}

/// Phase 1: parse untrusted envelope text.
///
/// Every failure is [`CryptoError::Parse`]; nothing here involves a key.
pub fn parse_envelope(text: &str) -> CryptoResult<EncryptedEnvelope> {
    let envelope: EncryptedEnvelope =
        wire::decode(text).map_err(|e| CryptoError::Parse(e.to_string()))?;
    debug!(
        internals_len = envelope.internals.len(),
        kdf_iterations = envelope.protection.kdf_params.iterations,
        "Parsed envelope"
    );
    Ok(envelope)
}

/// Parse an envelope held in raw file bytes.
pub fn parse_envelope_bytes(data: &[u8]) -> CryptoResult<EncryptedEnvelope> {
    let text = std::str::from_utf8(data)
        .map_err(|e| CryptoError::Parse(format!("envelope is not UTF-8: {}", e)))?;
    parse_envelope(text)
}

/// Serialize an envelope; the inverse of [`parse_envelope`].
pub fn encode_envelope(envelope: &EncryptedEnvelope) -> CryptoResult<String> {
    wire::encode(envelope).map_err(|e| CryptoError::InvalidFormat(e.to_string()))
}
