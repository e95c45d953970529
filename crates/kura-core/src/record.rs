//! Records, entry values and editing drafts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entry::{EntryConfiguration, EntryKind};
use crate::tags::TagPool;
use crate::wire;

/// Location of a record's image inside the image pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub index: u32,
}

/// The stored value of one entry.
///
/// The wire form is the bare object of the variant (`{"value": ...}`,
/// `{"tags": [...]}` or `{"score": ..., "comment": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    String {
        value: String,
    },
    Tags {
        /// Indices into the entry's tag pool, ascending.
        tags: Vec<usize>,
    },
    Rating {
        score: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

impl EntryValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
        }
    }

    /// Tag indices; sorted and deduplicated on construction.
    pub fn tags(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self::Tags { tags: indices }
    }

    pub fn rating(score: u32, comment: Option<String>) -> Self {
        Self::Rating { score, comment }
    }

    /// Empty string, no tags or a zero score.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String { value } => value.is_empty(),
            Self::Tags { tags } => tags.is_empty(),
            Self::Rating { score, .. } => *score == 0,
        }
    }
}

/// One catalog record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(
        default,
        serialize_with = "wire::serialize_map",
        deserialize_with = "wire::deserialize_map"
    )]
    pub entries: BTreeMap<String, EntryValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, value: EntryValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    pub fn with_image(mut self, name: impl Into<String>, index: u32) -> Self {
        self.image = Some(ImageRef {
            name: name.into(),
            index,
        });
        self
    }

    pub fn get(&self, entry: &str) -> Option<&EntryValue> {
        self.entries.get(entry)
    }

    /// Whether the record holds a non-empty value for `entry`.
    pub fn has_entry(&self, entry: &str) -> bool {
        self.get(entry).is_some_and(|value| !value.is_empty())
    }
}

// =============================================================================
// DRAFTS
// =============================================================================

/// A tag chosen while editing: either pooled already or typed fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftTag {
    Existing(usize),
    New(String),
}

/// An entry value while it is being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftValue {
    String(String),
    Tags(Vec<DraftTag>),
    Rating {
        score: u32,
        comment: String,
        use_comment: bool,
    },
}

impl DraftValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(value) => value.is_empty(),
            Self::Tags(tags) => tags.is_empty(),
            Self::Rating { score, .. } => *score == 0,
        }
    }
}

impl From<&EntryValue> for DraftValue {
    fn from(value: &EntryValue) -> Self {
        match value {
            EntryValue::String { value } => Self::String(value.clone()),
            EntryValue::Tags { tags } => Self::Tags(tags.iter().copied().map(DraftTag::Existing).collect()),
            EntryValue::Rating { score, comment } => Self::Rating {
                score: *score,
                use_comment: comment.is_some(),
                comment: comment.clone().unwrap_or_default(),
            },
        }
    }
}

/// A record while it is being created or edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftRecord {
    pub image: Option<ImageRef>,
    pub entries: BTreeMap<String, DraftValue>,
}

impl DraftRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: DraftValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// Produce the stored record.
    ///
    /// New tag strings are registered in `tags`, so callers should run the
    /// record-level checker first. Empty values and values for entries the
    /// configuration does not declare are dropped.
    pub fn finalize(&self, config: &EntryConfiguration, tags: &mut TagPool) -> Record {
        let mut entries = BTreeMap::new();

        for entry in &config.entries {
            let Some(draft) = self.entries.get(&entry.name) else {
                continue;
            };
            let value = match (&entry.kind, draft) {
                (EntryKind::String { .. }, DraftValue::String(value)) => EntryValue::string(value.clone()),
                (EntryKind::Tag { .. }, DraftValue::Tags(draft_tags)) => {
                    let fresh: Vec<&str> = draft_tags
                        .iter()
                        .filter_map(|tag| match tag {
                            DraftTag::New(text) => Some(text.as_str()),
                            DraftTag::Existing(_) => None,
                        })
                        .collect();
                    let mut indices = tags.register_tags(&entry.name, &fresh);
                    indices.extend(draft_tags.iter().filter_map(|tag| match tag {
                        DraftTag::Existing(index) => Some(*index),
                        DraftTag::New(_) => None,
                    }));
                    EntryValue::tags(indices)
                }
                (
                    EntryKind::Rating { .. },
                    DraftValue::Rating {
                        score,
                        comment,
                        use_comment,
                    },
                ) => EntryValue::rating(*score, use_comment.then(|| comment.clone())),
                _ => continue,
            };
            if !value.is_empty() {
                entries.insert(entry.name.clone(), value);
            }
        }

        Record {
            image: self.image.clone(),
            entries,
        }
    }
}

impl From<&Record> for DraftRecord {
    fn from(record: &Record) -> Self {
        Self {
            image: record.image.clone(),
            entries: record
                .entries
                .iter()
                .map(|(name, value)| (name.clone(), DraftValue::from(value)))
                .collect(),
        }
    }
}
