//! # kura-crypto
//!
//! Sealing and unlocking of kura catalogs.
//!
//! A catalog is stored as one [`EncryptedEnvelope`]. Opening it is a two-phase
//! process: [`parse_envelope`] turns untrusted text into the envelope shape,
//! then [`Catalog::unwrap`] walks the key chain (password → user key →
//! database key → payload) and returns the live catalog.
//!
//! ## Cryptographic Primitives
//!
//! - **Key derivation**: Argon2id, run off the caller's task behind a
//!   cancellable [`KdfHandle`]
//! - **Symmetric cipher**: AES-256-GCM (AEAD), 12-byte nonces
//! - **Random generation**: OS-seeded `thread_rng`
//!
//! ## Examples
//!
//! ### Seal and unlock
//!
//! ```rust
//! use kura_core::{CatalogData, EntryConfiguration, EntryDefinition, SortingMethod};
//! use kura_crypto::{encode_envelope, parse_envelope, seal_catalog, Catalog, Credential, KdfCost};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = EntryConfiguration::new(vec![EntryDefinition::string("title", SortingMethod::AsString)]);
//! let (envelope, _) = seal_catalog(CatalogData::new(config), "my-password", &KdfCost::insecure_fast())
//!     .await
//!     .unwrap();
//!
//! let text = encode_envelope(&envelope).unwrap();
//! let envelope = parse_envelope(&text).unwrap();
//! let catalog = Catalog::unwrap(&envelope, &Credential::password("my-password"), None)
//!     .await
//!     .unwrap();
//! assert!(catalog.records().is_empty());
//! # });
//! ```
//!
//! ### Cancel a key derivation
//!
//! ```rust
//! use kura_crypto::kdf::{derive, KdfCost, KdfParams};
//! use kura_crypto::KdfError;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let params = KdfParams::generate(&KdfCost::default());
//! let handle = derive(params.request(b"password"));
//! handle.cancel();
//! assert_eq!(handle.await_result().await, Err(KdfError::Cancelled));
//! # });
//! ```

pub mod catalog;
pub mod cipher;
pub mod envelope;
pub mod error;
pub mod kdf;

// Re-export commonly used types
pub use catalog::{open_image, seal_catalog, seal_image, Catalog, Credential, ImageLoader};
pub use cipher::{aes_gcm_decrypt, aes_gcm_encrypt, CipherKey, KeyUsage};
pub use envelope::{
    encode_envelope, parse_envelope, parse_envelope_bytes, EncryptedEnvelope, EnvelopeProtection,
};
pub use error::{CryptoError, CryptoResult, KdfError};
pub use kdf::{
    default_worker, derive, derive_key_blocking, install_default_worker, serve_kdf_request,
    BlockingKdfWorker, KdfCanceler, KdfCost, KdfHandle, KdfParams, KdfRequest, KdfWorker,
    ProcessKdfWorker,
};
