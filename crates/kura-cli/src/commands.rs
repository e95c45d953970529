//! Subcommand implementations.
//!
//! Each command returns the JSON document the binary prints, so the
//! commands can be exercised without capturing stdout.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kura_core::validation::{check_configuration, check_configuration_value};
use kura_core::{wire, CatalogData, ImageFormat};
use kura_crypto::{
    encode_envelope, parse_envelope, seal_catalog, serve_kdf_request, Catalog, Credential,
    CryptoError, CryptoResult, EncryptedEnvelope, ImageLoader, KdfCost,
};
use kura_search::{available_operators, compile, compile_all};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

// =============================================================================
// FILES
// =============================================================================

/// Serves encrypted image blobs from one directory.
pub struct DirectoryImageLoader {
    root: PathBuf,
}

impl DirectoryImageLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ImageLoader for DirectoryImageLoader {
    async fn load(&self, name: &str) -> CryptoResult<Option<Vec<u8>>> {
        // Only bare file names inside the root
        if Path::new(name).file_name() != Some(OsStr::new(name)) {
            return Err(CryptoError::ImageUnavailable(format!(
                "refusing image name {:?}",
                name
            )));
        }
        match tokio::fs::read(self.root.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn read_envelope(path: &Path) -> Result<EncryptedEnvelope> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    Ok(parse_envelope(&text)?)
}

/// Replace `path` with `envelope`.
///
/// The text is written and synced to a temporary file next to `path`, then
/// renamed over it, so `path` holds either the old or the new catalog.
async fn write_envelope(path: &Path, envelope: &EncryptedEnvelope) -> Result<()> {
    let text = encode_envelope(envelope)?;
    let target = path.to_path_buf();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = NamedTempFile::new_in(&dir)?;
        file.write_all(text.as_bytes())?;
        file.as_file().sync_all()?;
        // On failure the temporary file is removed when the error drops
        file.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .context("Catalog writer stopped unexpectedly")?
    .with_context(|| format!("Failed to write catalog {}", path.display()))?;

    debug!(catalog = %path.display(), "Catalog written");
    Ok(())
}

async fn unlock(
    path: &Path,
    password: &str,
    images: Option<Arc<dyn ImageLoader>>,
) -> Result<Catalog> {
    let envelope = read_envelope(path).await?;
    let catalog = Catalog::unwrap(&envelope, &Credential::password(password), images)
        .await
        .map_err(|e| match e {
            CryptoError::Decryption(_) => {
                anyhow::anyhow!("Could not unlock {}: wrong password or damaged file", path.display())
            }
            other => other.into(),
        })?;
    Ok(catalog)
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Answer one key derivation request from a parent `kura` process.
pub async fn cmd_kdf_worker() -> Result<()> {
    tokio::task::spawn_blocking(|| {
        serve_kdf_request(std::io::stdin().lock(), std::io::stdout().lock())
    })
    .await
    .context("Key derivation worker stopped unexpectedly")?
    .context("Failed to answer key derivation request")
}

/// Describe an envelope without unlocking it.
pub async fn cmd_info(path: &Path) -> Result<Value> {
    let envelope = read_envelope(path).await?;
    let kdf = &envelope.protection.kdf_params;
    Ok(json!({
        "catalog": path.to_string_lossy(),
        "kdf": {
            "algorithm": "argon2id",
            "memory_kib": kdf.memory_kib(),
            "iterations": kdf.iterations,
            "threads": kdf.threads,
        },
        "internals_size": envelope.internals.len(),
    }))
}

/// List records, optionally ordered by one entry.
pub async fn cmd_list(
    path: &Path,
    password: &str,
    sort: Option<&str>,
    descending: bool,
) -> Result<Value> {
    let catalog = unlock(path, password, None).await?;
    let ids = match sort {
        Some(entry) => catalog
            .sorted_ids(entry, descending)
            .with_context(|| format!("Unknown entry \"{}\"", entry))?,
        None => {
            let mut ids: Vec<String> = catalog.records().keys().cloned().collect();
            if descending {
                ids.reverse();
            }
            ids
        }
    };

    let records = ids
        .iter()
        .filter_map(|id| catalog.record(id).map(|record| (id, record)))
        .map(|(id, record)| -> Result<Value> {
            Ok(json!({ "id": id, "record": serde_json::to_value(record)? }))
        })
        .collect::<Result<Vec<Value>>>()?;

    Ok(json!({
        "count": records.len(),
        "records": records,
    }))
}

/// Run search commands; all must hold unless `any` is set.
pub async fn cmd_search(
    path: &Path,
    password: &str,
    queries: &[String],
    any: bool,
) -> Result<Value> {
    let catalog = unlock(path, password, None).await?;
    let config = catalog.entry_configuration();

    if let Some(invalid) = queries.iter().find(|query| compile(query, config).is_none()) {
        bail!("Invalid search command: {}", invalid);
    }
    let node = compile_all(queries, config, any).context("No search command given")?;

    let ids = kura_search::search(catalog.data(), &node);
    info!(matched = ids.len(), query = %node, "Search complete");

    Ok(json!({
        "query": node.explain(),
        "count": ids.len(),
        "ids": ids,
    }))
}

/// Operators usable on each entry of a catalog.
pub async fn cmd_operators(path: &Path, password: &str) -> Result<Value> {
    let catalog = unlock(path, password, None).await?;
    let entries: Vec<Value> = catalog
        .entry_configuration()
        .entries
        .iter()
        .map(|entry| {
            json!({
                "entry": entry.name,
                "operators": available_operators(entry),
            })
        })
        .collect();
    Ok(json!({ "entries": entries }))
}

/// Validate an entry configuration file.
pub async fn cmd_check_config(path: &Path) -> Result<Value> {
    let text = read_text(path).await?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let violations: Vec<String> = check_configuration_value(&value)
        .iter()
        .map(ToString::to_string)
        .collect();
    debug!(violations = violations.len(), "Configuration checked");

    Ok(json!({
        "file": path.to_string_lossy(),
        "valid": violations.is_empty(),
        "violations": violations,
    }))
}

/// Every invalid record with its reasons.
pub async fn cmd_diagnose(path: &Path, password: &str) -> Result<Value> {
    let catalog = unlock(path, password, None).await?;
    let invalid: Vec<Value> = catalog
        .diagnose()
        .into_iter()
        .map(|(id, reasons)| {
            let reasons: Vec<Value> = reasons
                .iter()
                .map(|reason| json!({ "reason": reason, "message": reason.to_string() }))
                .collect();
            json!({ "id": id, "reasons": reasons })
        })
        .collect();

    Ok(json!({
        "records": catalog.records().len(),
        "invalid_count": invalid.len(),
        "invalid": invalid,
    }))
}

/// Encrypt plain catalog data into a new envelope.
pub async fn cmd_seal(
    input: &Path,
    output: &Path,
    password: &str,
    cost: &KdfCost,
    force: bool,
) -> Result<Value> {
    let exists = tokio::fs::try_exists(output)
        .await
        .with_context(|| format!("Failed to inspect {}", output.display()))?;
    if exists && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let text = read_text(input).await?;
    let data: CatalogData = wire::decode(&text)
        .with_context(|| format!("{} is not catalog data", input.display()))?;

    let violations = check_configuration(data.entry_configuration());
    if !violations.is_empty() {
        let messages: Vec<String> = violations.iter().map(ToString::to_string).collect();
        bail!("Invalid entry configuration: {}", messages.join("; "));
    }

    let records = data.data.len();
    let (envelope, _database_key) = seal_catalog(data, password, cost).await?;
    write_envelope(output, &envelope).await?;
    info!(records, output = %output.display(), "Catalog sealed");

    Ok(json!({
        "input": input.to_string_lossy(),
        "output": output.to_string_lossy(),
        "records": records,
        "internals_size": envelope.internals.len(),
    }))
}

/// Import one dumped record and write the catalog back.
pub async fn cmd_import(
    path: &Path,
    password: &str,
    id: &str,
    record: &Path,
    has_image: bool,
) -> Result<Value> {
    let mut catalog = unlock(path, password, None).await?;
    if catalog.record(id).is_some() {
        bail!("Record \"{}\" already exists", id);
    }

    let text = read_text(record).await?;
    catalog.import_record(id, &text, has_image)?;

    let envelope = catalog.reseal()?;
    write_envelope(path, &envelope).await?;
    info!(id, "Record imported");

    Ok(json!({
        "catalog": path.to_string_lossy(),
        "id": id,
        "records": catalog.records().len(),
        "encrypted_counter": catalog.data().protection.encrypted_counter,
    }))
}

/// Rewrap the catalog for a new password.
pub async fn cmd_passwd(
    path: &Path,
    password: &str,
    new_password: &str,
    cost: &KdfCost,
) -> Result<Value> {
    let mut catalog = unlock(path, password, None).await?;
    let envelope = catalog.change_password(new_password, cost).await?;
    write_envelope(path, &envelope).await?;
    info!(catalog = %path.display(), "Password changed");

    Ok(json!({
        "catalog": path.to_string_lossy(),
        "encrypted_counter": catalog.data().protection.encrypted_counter,
    }))
}

/// Decrypt a stored image to `output`.
pub async fn cmd_image(
    path: &Path,
    password: &str,
    images_dir: &Path,
    stem: &str,
    thumbnail: bool,
    output: &Path,
) -> Result<Value> {
    let loader: Arc<dyn ImageLoader> = Arc::new(DirectoryImageLoader::new(images_dir));
    let catalog = unlock(path, password, Some(loader)).await?;
    if !catalog.has_image_support() {
        bail!("Catalog {} does not store images", path.display());
    }

    let format = if thumbnail {
        ImageFormat::THUMBNAIL
    } else {
        ImageFormat::IMAGE
    };
    let image = catalog.load_image(stem, format).await?;
    tokio::fs::write(output, &image)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(json!({
        "image": format.file_name(stem),
        "mime": format.mime,
        "output": output.to_string_lossy(),
        "size": image.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::{
        EntryConfiguration, EntryDefinition, EntryKind, EntryValue, Record, SortingMethod,
    };
    use tempfile::TempDir;

    const PASSWORD: &str = "correct horse";

    fn fast() -> KdfCost {
        KdfCost::insecure_fast()
    }

    fn sample_data() -> CatalogData {
        let config = EntryConfiguration::new(vec![
            EntryDefinition::string("title", SortingMethod::AsString),
            EntryDefinition::string("year", SortingMethod::AsNumber).with_optional(true),
            EntryDefinition::rating("score", 10).with_optional(true),
        ]);
        CatalogData::new(config)
            .with_record(
                "a",
                Record::new()
                    .with_entry("title", EntryValue::string("Blue Train"))
                    .with_entry("year", EntryValue::string("1957"))
                    .with_entry("score", EntryValue::rating(9, None)),
            )
            .with_record(
                "b",
                Record::new()
                    .with_entry("title", EntryValue::string("Giant Steps"))
                    .with_entry("year", EntryValue::string("1960"))
                    .with_entry("score", EntryValue::rating(4, None)),
            )
    }

    /// Seal `data` through the command and return the catalog path.
    async fn sealed(dir: &TempDir, data: &CatalogData) -> PathBuf {
        let input = dir.path().join("plain.json");
        std::fs::write(&input, wire::encode(data).unwrap()).unwrap();
        let output = dir.path().join("catalog.kura");
        cmd_seal(&input, &output, PASSWORD, &fast(), false)
            .await
            .unwrap();
        output
    }

    #[tokio::test]
    async fn test_seal_then_info() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let info = cmd_info(&path).await.unwrap();
        assert_eq!(info["kdf"]["algorithm"], "argon2id");
        assert_eq!(info["kdf"]["iterations"], 1);
        assert!(info["internals_size"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_seal_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let input = dir.path().join("plain.json");

        let err = cmd_seal(&input, &path, PASSWORD, &fast(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(cmd_seal(&input, &path, PASSWORD, &fast(), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_seal_rejects_bad_configuration() {
        let dir = TempDir::new().unwrap();
        let data = CatalogData::new(EntryConfiguration::new(vec![]));
        let input = dir.path().join("plain.json");
        std::fs::write(&input, wire::encode(&data).unwrap()).unwrap();

        let err = cmd_seal(&input, &dir.path().join("out.kura"), PASSWORD, &fast(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid entry configuration"));
    }

    #[tokio::test]
    async fn test_wrong_password_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let err = cmd_list(&path, "wrong", None, false).await.unwrap_err();
        assert!(err.to_string().contains("wrong password"));
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let listed = cmd_list(&path, PASSWORD, Some("year"), true).await.unwrap();
        assert_eq!(listed["count"], 2);
        assert_eq!(listed["records"][0]["id"], "b");
        assert_eq!(listed["records"][1]["id"], "a");

        let err = cmd_list(&path, PASSWORD, Some("label"), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown entry"));
    }

    #[tokio::test]
    async fn test_search() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let found = cmd_search(&path, PASSWORD, &["$score>5".to_string()], false)
            .await
            .unwrap();
        assert_eq!(found["ids"], json!(["a"]));

        let queries = vec!["$title=Giant Steps".to_string(), "$score@9".to_string()];
        let found = cmd_search(&path, PASSWORD, &queries, true).await.unwrap();
        assert_eq!(found["count"], 2);
    }

    #[tokio::test]
    async fn test_search_rejects_invalid_command() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let err = cmd_search(&path, PASSWORD, &["$label:x".to_string()], false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("$label:x"));
    }

    #[tokio::test]
    async fn test_operators_follow_sorting() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        let listed = cmd_operators(&path, PASSWORD).await.unwrap();
        let entries = listed["entries"].as_array().unwrap();
        let title_ops = entries[0]["operators"].as_array().unwrap().len();
        assert_eq!(entries[0]["entry"], "title");
        assert!(title_ops > 2);
    }

    #[tokio::test]
    async fn test_check_config() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"entries":[{"name":"title","type":"string","sorting_method":"as_string",
                "optional":false,"unique":false}]}"#,
        )
        .unwrap();
        let report = cmd_check_config(&good).await.unwrap();
        assert_eq!(report["valid"], true, "{}", report);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"entries":[]}"#).unwrap();
        let report = cmd_check_config(&bad).await.unwrap();
        assert_eq!(report["valid"], false);
        assert!(!report["violations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_diagnose_reports_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut config =
            EntryConfiguration::new(vec![EntryDefinition::string("code", SortingMethod::AsString)]);
        config.entries[0].kind = EntryKind::String { unique: true };
        let data = CatalogData::new(config)
            .with_record("x", Record::new().with_entry("code", EntryValue::string("A1")))
            .with_record("y", Record::new().with_entry("code", EntryValue::string("A1")))
            .with_record("z", Record::new().with_entry("code", EntryValue::string("B2")));
        let path = sealed(&dir, &data).await;

        let report = cmd_diagnose(&path, PASSWORD).await.unwrap();
        assert_eq!(report["records"], 3);
        assert_eq!(report["invalid_count"], 2);
        assert_eq!(report["invalid"][0]["reasons"][0]["reason"]["type"], "duplicated_value");
    }

    #[tokio::test]
    async fn test_import_writes_back() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let dump = dir.path().join("record.json");
        std::fs::write(&dump, r#"{"title":"Kind of Blue","year":"1959"}"#).unwrap();

        let result = cmd_import(&path, PASSWORD, "c", &dump, false).await.unwrap();
        assert_eq!(result["records"], 3);

        let found = cmd_search(&path, PASSWORD, &["$title:Kind".to_string()], false)
            .await
            .unwrap();
        assert_eq!(found["ids"], json!(["c"]));

        let err = cmd_import(&path, PASSWORD, "c", &dump, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_passwd() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;

        cmd_passwd(&path, PASSWORD, "new secret", &fast()).await.unwrap();
        assert!(cmd_list(&path, PASSWORD, None, false).await.is_err());
        let listed = cmd_list(&path, "new secret", None, false).await.unwrap();
        assert_eq!(listed["count"], 2);
    }

    #[tokio::test]
    async fn test_image_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = EntryConfiguration::new(vec![EntryDefinition::string(
            "title",
            SortingMethod::AsString,
        )])
        .with_image_size(64, 64);
        let data = CatalogData::new(config);
        let (envelope, database_key) = seal_catalog(data, PASSWORD, &fast()).await.unwrap();
        let path = dir.path().join("catalog.kura");
        write_envelope(&path, &envelope).await.unwrap();

        let image = b"RIFF\x10\0\0\0WEBPVP8 pixels".to_vec();
        let blob = kura_crypto::seal_image(&image, ImageFormat::WEBP, &database_key).unwrap();
        std::fs::write(dir.path().join("cover.webp"), blob).unwrap();

        let output = dir.path().join("cover-plain.webp");
        let result = cmd_image(&path, PASSWORD, dir.path(), "cover", false, &output)
            .await
            .unwrap();
        assert_eq!(result["mime"], "image/webp");
        assert_eq!(std::fs::read(&output).unwrap(), image);

        assert!(cmd_image(&path, PASSWORD, dir.path(), "missing", false, &output)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_passwd_leaves_catalog_untouched() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let before = std::fs::read(&path).unwrap();

        let broken = KdfCost {
            threads: 0,
            ..fast()
        };
        assert!(cmd_passwd(&path, PASSWORD, "new secret", &broken).await.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(cmd_list(&path, PASSWORD, None, false).await.unwrap()["count"], 2);
    }

    #[tokio::test]
    async fn test_failed_import_leaves_catalog_untouched() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let before = std::fs::read(&path).unwrap();
        let dump = dir.path().join("record.json");
        std::fs::write(&dump, "not a record").unwrap();

        assert!(cmd_import(&path, PASSWORD, "c", &dump, false).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_write_envelope_replaces_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let envelope = read_envelope(&path).await.unwrap();

        std::fs::write(&path, "stale").unwrap();
        write_envelope(&path, &envelope).await.unwrap();
        assert_eq!(read_envelope(&path).await.unwrap(), envelope);

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["catalog.kura", "plain.json"]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_target_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = sealed(&dir, &sample_data()).await;
        let envelope = read_envelope(&path).await.unwrap();

        // A non-empty directory cannot be renamed over
        let blocked = dir.path().join("blocked.kura");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();

        let err = write_envelope(&blocked, &envelope).await.unwrap_err();
        assert!(err.to_string().contains("Failed to write catalog"));
        assert_eq!(std::fs::read_to_string(blocked.join("keep")).unwrap(), "x");

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["blocked.kura", "catalog.kura", "plain.json"]);

        let missing_dir = dir.path().join("absent").join("catalog.kura");
        assert!(write_envelope(&missing_dir, &envelope).await.is_err());
    }

    #[tokio::test]
    async fn test_loader_rejects_paths() {
        let dir = TempDir::new().unwrap();
        let loader = DirectoryImageLoader::new(dir.path());
        assert!(loader.load("../secret.webp").await.is_err());
        assert!(loader.load("absent.webp").await.unwrap().is_none());
    }
}
