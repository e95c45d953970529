//! Phase 2 of loading: unwrapping the key chain into a live [`Catalog`],
//! plus the write path that produces envelopes.
//!
//! # Key chain
//!
//! ```text
//! password ──Argon2id(kdf_params)──▶ user key        (or raw user key bytes)
//! user key ──AES-GCM(key_nonce)────▶ database key
//! database key ──AES-GCM(data_nonce)▶ internals JSON ──revive──▶ CatalogData
//! ```
//!
//! Any failing link aborts the unwrap; no partial catalog is returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kura_core::defaults::NONCE_LENGTH;
use kura_core::validation::{check_record, check_stored_record, find_duplicated_values};
use kura_core::{
    import_dumped_record, sort_records, wire, CatalogData, DraftRecord, EntryConfiguration,
    ImageFormat, ItemInvalidReason, Record, TagPool,
};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::cipher::{generate_nonce, CipherKey, KeyUsage};
use crate::envelope::{EncryptedEnvelope, EnvelopeProtection};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{default_worker, KdfCost, KdfParams, KdfWorker};

// =============================================================================
// COLLABORATORS
// =============================================================================

/// What unlocks an envelope.
#[derive(Clone)]
pub enum Credential {
    /// Run the KDF over the password.
    Password(Zeroizing<String>),
    /// A previously derived user key; skips the KDF.
    RawKey(Zeroizing<Vec<u8>>),
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(password.into()))
    }

    pub fn raw_key(key: &[u8]) -> Self {
        Self::RawKey(Zeroizing::new(key.to_vec()))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Credential::Password([REDACTED])"),
            Self::RawKey(_) => f.write_str("Credential::RawKey([REDACTED])"),
        }
    }
}

/// Fetches encrypted image blobs by file name.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// `Ok(None)` when no blob has that name.
    async fn load(&self, name: &str) -> CryptoResult<Option<Vec<u8>>>;
}

// =============================================================================
// IMAGES
// =============================================================================

/// Decrypt an image blob: `[header][nonce][ciphertext]` → `[header][body]`.
pub fn open_image(blob: &[u8], format: ImageFormat, key: &CipherKey) -> CryptoResult<Vec<u8>> {
    let body_start = format.header_length + NONCE_LENGTH;
    if blob.len() < body_start {
        return Err(CryptoError::InvalidFormat(format!(
            "{} image blob too short: {} bytes",
            format.mime,
            blob.len()
        )));
    }

    let (header, rest) = blob.split_at(format.header_length);
    let (nonce, ciphertext) = rest.split_at(NONCE_LENGTH);
    let nonce: [u8; NONCE_LENGTH] = nonce
        .try_into()
        .map_err(|_| CryptoError::InvalidFormat("image nonce truncated".to_string()))?;

    let body = key.decrypt(&nonce, ciphertext)?;

    let mut image = Vec::with_capacity(header.len() + body.len());
    image.extend_from_slice(header);
    image.extend_from_slice(&body);
    Ok(image)
}

/// Encrypt an image, leaving its format header in clear.
pub fn seal_image(image: &[u8], format: ImageFormat, key: &CipherKey) -> CryptoResult<Vec<u8>> {
    if image.len() < format.header_length {
        return Err(CryptoError::InvalidFormat(format!(
            "{} image shorter than its {}-byte header",
            format.mime, format.header_length
        )));
    }

    let (header, body) = image.split_at(format.header_length);
    let nonce = generate_nonce();
    let ciphertext = key.encrypt(&nonce, body)?;

    let mut blob = Vec::with_capacity(header.len() + NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(header);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

// =============================================================================
// CATALOG
// =============================================================================

/// An unlocked catalog.
///
/// Keys live only here, in memory; they never appear in the payload.
pub struct Catalog {
    data: CatalogData,
    database_key: CipherKey,
    user_key: CipherKey,
    protection: EnvelopeProtection,
    images: Option<Arc<dyn ImageLoader>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("records", &self.data.data.len())
            .field("entries", &self.data.configurations.entry.entries.len())
            .field("images", &self.images.is_some())
            .finish()
    }
}

impl Catalog {
    /// Unlock `envelope` using the default KDF worker.
    pub async fn unwrap(
        envelope: &EncryptedEnvelope,
        credential: &Credential,
        images: Option<Arc<dyn ImageLoader>>,
    ) -> CryptoResult<Self> {
        let worker = default_worker();
        Self::unwrap_with_worker(envelope, credential, images, &*worker).await
    }

    /// Unlock `envelope`, deriving password keys on `worker`.
    #[instrument(
        skip(envelope, credential, images, worker),
        fields(subsystem = "crypto", component = "catalog", op = "unwrap")
    )]
    pub async fn unwrap_with_worker(
        envelope: &EncryptedEnvelope,
        credential: &Credential,
        images: Option<Arc<dyn ImageLoader>>,
        worker: &dyn KdfWorker,
    ) -> CryptoResult<Self> {
        let protection = &envelope.protection;

        let user_key = match credential {
            Credential::Password(password) => {
                debug!(
                    memory_kib = protection.kdf_params.memory_kib(),
                    iterations = protection.kdf_params.iterations,
                    "Deriving user key from password"
                );
                let request = protection.kdf_params.request(password.as_bytes());
                let derived = worker.spawn(request).await_result().await?;
                CipherKey::import(&derived, KeyUsage::BOTH)?
            }
            Credential::RawKey(raw) => {
                debug!("Using supplied user key");
                CipherKey::import(raw, KeyUsage::BOTH)?
            }
        };

        debug!("Unwrapping database key");
        let database_key = Zeroizing::new(
            user_key.decrypt(&protection.key_nonce, &protection.encrypted_key)?,
        );
        let database_key = CipherKey::import(&database_key, KeyUsage::BOTH)?;

        debug!(internals_len = envelope.internals.len(), "Decrypting internals");
        let plaintext = Zeroizing::new(
            database_key.decrypt(&protection.data_nonce, &envelope.internals)?,
        );
        let data: CatalogData =
            wire::decode_slice(&plaintext).map_err(|e| CryptoError::Parse(e.to_string()))?;

        let images = if data.entry_configuration().has_images() {
            images
        } else {
            None
        };

        info!(
            records = data.data.len(),
            entries = data.entry_configuration().entries.len(),
            images = images.is_some(),
            "Catalog unlocked"
        );

        Ok(Self {
            data,
            database_key,
            user_key,
            protection: protection.clone(),
            images,
        })
    }

    /// Create a catalog from plain data, deriving a user key for `password`
    /// on the default KDF worker.
    pub async fn create(
        data: CatalogData,
        password: &str,
        cost: &KdfCost,
        images: Option<Arc<dyn ImageLoader>>,
    ) -> CryptoResult<Self> {
        let worker = default_worker();
        Self::create_with_worker(data, password, cost, images, &*worker).await
    }

    #[instrument(
        skip(data, password, images, worker),
        fields(subsystem = "crypto", component = "catalog", op = "create")
    )]
    pub async fn create_with_worker(
        data: CatalogData,
        password: &str,
        cost: &KdfCost,
        images: Option<Arc<dyn ImageLoader>>,
        worker: &dyn KdfWorker,
    ) -> CryptoResult<Self> {
        let database_key = CipherKey::generate();
        let (user_key, protection) = wrap_database_key(&database_key, password, cost, worker).await?;
        let images = if data.entry_configuration().has_images() {
            images
        } else {
            None
        };
        Ok(Self {
            data,
            database_key,
            user_key,
            protection,
            images,
        })
    }

    pub fn data(&self) -> &CatalogData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut CatalogData {
        &mut self.data
    }

    pub fn into_data(self) -> CatalogData {
        self.data
    }

    pub fn entry_configuration(&self) -> &EntryConfiguration {
        self.data.entry_configuration()
    }

    pub fn records(&self) -> &BTreeMap<String, Record> {
        &self.data.data
    }

    pub fn record(&self, id: &str) -> Option<&Record> {
        self.data.data.get(id)
    }

    pub fn tag_pool(&self) -> std::borrow::Cow<'_, TagPool> {
        self.data.tag_pool()
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.protection.kdf_params
    }

    pub fn database_key(&self) -> &CipherKey {
        &self.database_key
    }

    /// The key derived from the password, for unlocking again without the KDF.
    pub fn user_key(&self) -> &CipherKey {
        &self.user_key
    }

    pub fn has_image_support(&self) -> bool {
        self.images.is_some()
    }

    /// Fetch and decrypt the image stored as `stem` in `format`.
    #[instrument(skip(self), fields(subsystem = "crypto", component = "catalog", op = "load_image"))]
    pub async fn load_image(&self, stem: &str, format: ImageFormat) -> CryptoResult<Vec<u8>> {
        let loader = self.images.as_ref().ok_or_else(|| {
            CryptoError::ImageUnavailable("catalog has no image support".to_string())
        })?;
        let name = format.file_name(stem);
        let blob = loader
            .load(&name)
            .await?
            .ok_or_else(|| CryptoError::ImageUnavailable(name.clone()))?;
        debug!(name = %name, blob_len = blob.len(), "Opening image");
        open_image(&blob, format, &self.database_key)
    }

    /// Encrypt an image for storage under this catalog's database key.
    pub fn seal_image(&self, image: &[u8], format: ImageFormat) -> CryptoResult<Vec<u8>> {
        seal_image(image, format, &self.database_key)
    }

    /// Validate and store a draft under `id`, registering any new tags.
    pub fn insert_draft(
        &mut self,
        id: impl Into<String>,
        draft: &DraftRecord,
        override_image: bool,
    ) -> Result<(), Vec<ItemInvalidReason>> {
        let reasons = check_record(draft, override_image, self.data.entry_configuration());
        if !reasons.is_empty() {
            return Err(reasons);
        }
        let CatalogData {
            configurations,
            tags,
            data,
            ..
        } = &mut self.data;
        let record = draft.finalize(&configurations.entry, tags.get_or_insert_with(TagPool::new));
        data.insert(id.into(), record);
        Ok(())
    }

    /// Parse a dumped record and store it under `id`.
    pub fn import_record(
        &mut self,
        id: impl Into<String>,
        text: &str,
        has_image: bool,
    ) -> CryptoResult<()> {
        let CatalogData {
            configurations,
            tags,
            data,
            ..
        } = &mut self.data;
        let record = import_dumped_record(
            &configurations.entry,
            text,
            tags.get_or_insert_with(TagPool::new),
            has_image,
        )?;
        data.insert(id.into(), record);
        Ok(())
    }

    /// Every invalid record with its reasons, in id order.
    pub fn diagnose(&self) -> Vec<(String, Vec<ItemInvalidReason>)> {
        let config = self.entry_configuration();
        let mut duplicates = find_duplicated_values(config, self.records());

        self.records()
            .iter()
            .filter_map(|(id, record)| {
                let mut reasons = check_stored_record(record, config);
                if let Some(clashes) = duplicates.remove(id) {
                    reasons.extend(clashes);
                }
                (!reasons.is_empty()).then(|| (id.clone(), reasons))
            })
            .collect()
    }

    /// Record ids ordered by `entry`; `None` for an unknown entry.
    pub fn sorted_ids(&self, entry: &str, descending: bool) -> Option<Vec<String>> {
        let definition = self.entry_configuration().find(entry)?;
        Some(sort_records(
            definition,
            self.records(),
            &self.tag_pool(),
            descending,
        ))
    }

    /// Re-encrypt the current data under the same keys.
    ///
    /// Bumps the write counter and uses a fresh data nonce.
    #[instrument(skip(self), fields(subsystem = "crypto", component = "catalog", op = "reseal"))]
    pub fn reseal(&mut self) -> CryptoResult<EncryptedEnvelope> {
        self.data.protection.encrypted_counter += 1;
        let (data_nonce, internals) = encrypt_internals(&self.database_key, &self.data)?;
        self.protection.data_nonce = data_nonce;
        info!(
            encrypted_counter = self.data.protection.encrypted_counter,
            internals_len = internals.len(),
            "Catalog resealed"
        );
        Ok(EncryptedEnvelope {
            protection: self.protection.clone(),
            internals,
        })
    }

    /// Rewrap the database key for a new password and reseal, on the default
    /// KDF worker.
    pub async fn change_password(
        &mut self,
        new_password: &str,
        cost: &KdfCost,
    ) -> CryptoResult<EncryptedEnvelope> {
        let worker = default_worker();
        self.change_password_with_worker(new_password, cost, &*worker)
            .await
    }

    #[instrument(
        skip(self, new_password, worker),
        fields(subsystem = "crypto", component = "catalog", op = "change_password")
    )]
    pub async fn change_password_with_worker(
        &mut self,
        new_password: &str,
        cost: &KdfCost,
        worker: &dyn KdfWorker,
    ) -> CryptoResult<EncryptedEnvelope> {
        let (user_key, protection) =
            wrap_database_key(&self.database_key, new_password, cost, worker).await?;
        self.user_key = user_key;
        self.protection = protection;
        info!("Catalog password changed");
        self.reseal()
    }
}

// =============================================================================
// WRITE PATH
// =============================================================================

async fn wrap_database_key(
    database_key: &CipherKey,
    password: &str,
    cost: &KdfCost,
    worker: &dyn KdfWorker,
) -> CryptoResult<(CipherKey, EnvelopeProtection)> {
    let kdf_params = KdfParams::generate(cost);
    let derived = worker
        .spawn(kdf_params.request(password.as_bytes()))
        .await_result()
        .await?;
    let user_key = CipherKey::import(&derived, KeyUsage::BOTH)?;

    let key_nonce = generate_nonce();
    let encrypted_key = user_key.encrypt(&key_nonce, database_key.as_bytes())?;

    let protection = EnvelopeProtection {
        encrypted_key,
        key_nonce,
        // Replaced on every seal
        data_nonce: [0u8; NONCE_LENGTH],
        kdf_params,
    };
    Ok((user_key, protection))
}

fn encrypt_internals(
    database_key: &CipherKey,
    data: &CatalogData,
) -> CryptoResult<([u8; NONCE_LENGTH], Vec<u8>)> {
    let text = Zeroizing::new(wire::encode(data)?);
    let data_nonce = generate_nonce();
    let internals = database_key.encrypt(&data_nonce, text.as_bytes())?;
    Ok((data_nonce, internals))
}

/// Seal plain catalog data under a new database key.
///
/// Returns the envelope and the database key.
pub async fn seal_catalog(
    data: CatalogData,
    password: &str,
    cost: &KdfCost,
) -> CryptoResult<(EncryptedEnvelope, CipherKey)> {
    let mut catalog = Catalog::create(data, password, cost, None).await?;
    let envelope = catalog.reseal()?;
    Ok((envelope, catalog.database_key.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::{EntryDefinition, EntryValue, SortingMethod};

    fn fast() -> KdfCost {
        KdfCost::insecure_fast()
    }

    fn sample_data() -> CatalogData {
        let config = EntryConfiguration::new(vec![
            EntryDefinition::string("title", SortingMethod::AsString),
            EntryDefinition::rating("score", 10),
        ]);
        CatalogData::new(config)
            .with_record(
                "a",
                Record::new()
                    .with_entry("title", EntryValue::string("Blue"))
                    .with_entry("score", EntryValue::rating(7, None)),
            )
            .with_record(
                "b",
                Record::new()
                    .with_entry("title", EntryValue::string("Alpha"))
                    .with_entry("score", EntryValue::rating(3, None)),
            )
    }

    #[test]
    fn test_open_sealed_image() {
        let key = CipherKey::generate();
        let image: Vec<u8> = (0..100u8).collect();
        let blob = seal_image(&image, ImageFormat::WEBP, &key).unwrap();

        assert_eq!(&blob[..12], &image[..12]);
        assert_eq!(blob.len(), 100 + 12 + 16);
        assert_eq!(open_image(&blob, ImageFormat::WEBP, &key).unwrap(), image);
    }

    #[test]
    fn test_open_image_header_only() {
        let key = CipherKey::generate();
        let header = vec![9u8; 33];
        let blob = seal_image(&header, ImageFormat::PNG, &key).unwrap();
        assert_eq!(open_image(&blob, ImageFormat::PNG, &key).unwrap(), header);
    }

    #[test]
    fn test_open_image_too_short() {
        let key = CipherKey::generate();
        let result = open_image(&[0u8; 20], ImageFormat::WEBP, &key);
        assert!(matches!(result, Err(CryptoError::InvalidFormat(_))));
        let result = seal_image(&[0u8; 5], ImageFormat::WEBP, &key);
        assert!(matches!(result, Err(CryptoError::InvalidFormat(_))));
    }

    #[test]
    fn test_open_image_wrong_key() {
        let blob = seal_image(&[1u8; 40], ImageFormat::WEBP, &CipherKey::generate()).unwrap();
        let result = open_image(&blob, ImageFormat::WEBP, &CipherKey::generate());
        assert!(matches!(result, Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_credential_debug_redacted() {
        let debug_str = format!("{:?}", Credential::password("hunter2"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_seal_then_unwrap() {
        let (envelope, database_key) = seal_catalog(sample_data(), "pw", &fast()).await.unwrap();
        let catalog = Catalog::unwrap(&envelope, &Credential::password("pw"), None)
            .await
            .unwrap();

        assert_eq!(catalog.database_key().as_bytes(), database_key.as_bytes());
        assert_eq!(catalog.records(), &sample_data().data);
        assert_eq!(catalog.data().protection.encrypted_counter, 1);
    }

    #[tokio::test]
    async fn test_unwrap_wrong_password() {
        let (envelope, _) = seal_catalog(sample_data(), "pw", &fast()).await.unwrap();
        let result = Catalog::unwrap(&envelope, &Credential::password("nope"), None).await;
        assert!(matches!(result, Err(CryptoError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_unwrap_with_user_key() {
        let (envelope, _) = seal_catalog(sample_data(), "pw", &fast()).await.unwrap();
        let first = Catalog::unwrap(&envelope, &Credential::password("pw"), None)
            .await
            .unwrap();
        let cached = Credential::raw_key(first.user_key().as_bytes());
        let second = Catalog::unwrap(&envelope, &cached, None).await.unwrap();
        assert_eq!(second.records(), first.records());
    }

    #[tokio::test]
    async fn test_unwrap_raw_key_wrong_length() {
        let (envelope, _) = seal_catalog(sample_data(), "pw", &fast()).await.unwrap();
        let result = Catalog::unwrap(&envelope, &Credential::raw_key(&[0u8; 16]), None).await;
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_reseal_keeps_wrapping() {
        let mut catalog = Catalog::create(sample_data(), "pw", &fast(), None)
            .await
            .unwrap();
        let first = catalog.reseal().unwrap();
        let second = catalog.reseal().unwrap();

        assert_eq!(first.protection.encrypted_key, second.protection.encrypted_key);
        assert_eq!(first.protection.kdf_params, second.protection.kdf_params);
        assert_ne!(first.protection.data_nonce, second.protection.data_nonce);

        let reopened = Catalog::unwrap(&second, &Credential::password("pw"), None)
            .await
            .unwrap();
        assert_eq!(reopened.data().protection.encrypted_counter, 2);
    }

    #[tokio::test]
    async fn test_change_password() {
        let mut catalog = Catalog::create(sample_data(), "old", &fast(), None)
            .await
            .unwrap();
        let old_salt = catalog.kdf_params().salt.clone();
        let envelope = catalog.change_password("new", &fast()).await.unwrap();

        assert_ne!(envelope.protection.kdf_params.salt, old_salt);
        assert!(Catalog::unwrap(&envelope, &Credential::password("old"), None)
            .await
            .is_err());
        let reopened = Catalog::unwrap(&envelope, &Credential::password("new"), None)
            .await
            .unwrap();
        assert_eq!(
            reopened.database_key().as_bytes(),
            catalog.database_key().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_diagnose_and_sort() {
        let mut data = sample_data();
        data.data.insert("c".to_string(), Record::new());
        let catalog = Catalog::create(data, "pw", &fast(), None).await.unwrap();

        let report = catalog.diagnose();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].0, "c");
        assert_eq!(report[0].1.len(), 2);

        assert_eq!(
            catalog.sorted_ids("score", true).unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(
            catalog.sorted_ids("title", false).unwrap(),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
        assert!(catalog.sorted_ids("nope", false).is_none());
    }

    #[tokio::test]
    async fn test_insert_draft_rejects_missing() {
        use kura_core::DraftValue;

        let mut catalog = Catalog::create(sample_data(), "pw", &fast(), None)
            .await
            .unwrap();
        let draft = DraftRecord::new().with_value("title", DraftValue::String("New".to_string()));
        let reasons = catalog.insert_draft("d", &draft, false).unwrap_err();
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].key(), Some("score"));

        let draft = draft.with_value(
            "score",
            DraftValue::Rating {
                score: 5,
                comment: String::new(),
                use_comment: false,
            },
        );
        catalog.insert_draft("d", &draft, false).unwrap();
        assert!(catalog.record("d").is_some());
    }

    #[tokio::test]
    async fn test_import_record() {
        let mut catalog = Catalog::create(sample_data(), "pw", &fast(), None)
            .await
            .unwrap();
        catalog
            .import_record("e", r#"{"title": "Imported", "score": {"score": 4}}"#, false)
            .unwrap();
        assert_eq!(
            catalog.record("e").unwrap().get("score"),
            Some(&EntryValue::rating(4, None))
        );
        assert!(catalog.import_record("f", r#"{"title": "x"}"#, false).is_err());
    }
}
