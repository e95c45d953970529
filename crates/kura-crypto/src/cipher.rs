//! AES-256-GCM cipher operations.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use kura_core::defaults::{KEY_LENGTH, NONCE_LENGTH, SALT_LENGTH};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Message shared by every authentication failure.
pub(crate) const DECRYPTION_FAILED: &str = "wrong password or corrupted data";

/// Generate cryptographically secure random bytes.
pub fn generate_random<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a random salt (32 bytes).
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    generate_random()
}

/// Generate a random nonce (12 bytes).
pub fn generate_nonce() -> [u8; NONCE_LENGTH] {
    generate_random()
}

/// Encrypt plaintext with AES-256-GCM.
///
/// Returns ciphertext with appended authentication tag (16 bytes).
pub fn aes_gcm_encrypt(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let nonce = Nonce::from_slice(nonce);

    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption("AES-GCM encryption failed".into()))
}

/// Decrypt ciphertext with AES-256-GCM.
///
/// The ciphertext must include the authentication tag (16 bytes) at the end.
/// A wrong key and tampered data fail the same way.
pub fn aes_gcm_decrypt(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("AES-256 needs a 32-byte key".to_string()))?;

    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption(DECRYPTION_FAILED.to_string()))
}

/// Directions a [`CipherKey`] may be used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage {
    pub encrypt: bool,
    pub decrypt: bool,
}

impl KeyUsage {
    pub const ENCRYPT: KeyUsage = KeyUsage {
        encrypt: true,
        decrypt: false,
    };
    pub const DECRYPT: KeyUsage = KeyUsage {
        encrypt: false,
        decrypt: true,
    };
    pub const BOTH: KeyUsage = KeyUsage {
        encrypt: true,
        decrypt: true,
    };
}

/// An imported AES-256-GCM key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    key: [u8; KEY_LENGTH],
    #[zeroize(skip)]
    usage: KeyUsage,
}

impl CipherKey {
    /// Bind raw bytes to a key for the given usage.
    pub fn import(raw: &[u8], usage: KeyUsage) -> CryptoResult<Self> {
        let key: [u8; KEY_LENGTH] = raw.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                raw.len()
            ))
        })?;
        Ok(Self { key, usage })
    }

    /// A fresh random key usable in both directions.
    pub fn generate() -> Self {
        Self {
            key: generate_random(),
            usage: KeyUsage::BOTH,
        }
    }

    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Raw key bytes, for wrapping under another key.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    pub fn encrypt(&self, nonce: &[u8; NONCE_LENGTH], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        if !self.usage.encrypt {
            return Err(CryptoError::KeyUsage("key was not imported for encryption".to_string()));
        }
        aes_gcm_encrypt(&self.key, nonce, plaintext)
    }

    pub fn decrypt(&self, nonce: &[u8; NONCE_LENGTH], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if !self.usage.decrypt {
            return Err(CryptoError::KeyUsage("key was not imported for decryption".to_string()));
        }
        aes_gcm_decrypt(&self.key, nonce, ciphertext)
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("key", &"[REDACTED]")
            .field("usage", &self.usage)
            .finish()
    }
}
