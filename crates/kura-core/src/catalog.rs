//! The decrypted catalog payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::EntryConfiguration;
use crate::image::ImagePools;
use crate::record::Record;
use crate::tags::TagPool;
use crate::wire;

/// Write counter carried inside the encrypted payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionCounter {
    pub encrypted_counter: u64,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configurations {
    /// Application-level settings, kept as opaque JSON.
    #[serde(default = "empty_object")]
    pub global: Value,
    pub entry: EntryConfiguration,
}

/// Everything stored inside the encrypted `internals` blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub protection: ProtectionCounter,
    pub configurations: Configurations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ImagePools>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagPool>,
    /// Records keyed by their stable id.
    #[serde(
        default,
        serialize_with = "wire::serialize_map",
        deserialize_with = "wire::deserialize_map"
    )]
    pub data: BTreeMap<String, Record>,
}

impl CatalogData {
    /// An empty catalog using `entry` as its schema.
    pub fn new(entry: EntryConfiguration) -> Self {
        let images = entry.has_images().then(ImagePools::default);
        Self {
            protection: ProtectionCounter::default(),
            configurations: Configurations {
                global: empty_object(),
                entry,
            },
            images,
            tags: Some(TagPool::new()),
            data: BTreeMap::new(),
        }
    }

    pub fn entry_configuration(&self) -> &EntryConfiguration {
        &self.configurations.entry
    }

    /// The tag pool, or an empty one when the payload has none.
    pub fn tag_pool(&self) -> std::borrow::Cow<'_, TagPool> {
        match &self.tags {
            Some(pool) => std::borrow::Cow::Borrowed(pool),
            None => std::borrow::Cow::Owned(TagPool::new()),
        }
    }

    /// The tag pool for editing, created on first use.
    pub fn tag_pool_mut(&mut self) -> &mut TagPool {
        self.tags.get_or_insert_with(TagPool::new)
    }

    pub fn with_record(mut self, id: impl Into<String>, record: Record) -> Self {
        self.data.insert(id.into(), record);
        self
    }

    pub fn with_tags(mut self, tags: TagPool) -> Self {
        self.tags = Some(tags);
        self
    }
}
