//! Importing records dumped as plain JSON.
//!
//! A dumped record is an object keyed by entry name:
//!
//! ```json
//! { "title": "Blue Train", "genre": ["jazz"], "score": { "score": 5, "comment": "classic" } }
//! ```
//!
//! Unlike the record-level checker, import fails on the first problem. New
//! tags are only registered once the whole record has been accepted.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::entry::{EntryConfiguration, EntryDefinition, EntryKind};
use crate::error::{Error, Result};
use crate::record::{EntryValue, Record};
use crate::sorting;
use crate::tags::TagPool;

enum Loaded {
    Value(EntryValue),
    Tags(Vec<String>),
}

/// Parse `text` into a record, registering its new tags in `tags`.
///
/// `has_image` tells whether an image file accompanies the record; it is
/// required when the configuration declares an image size. The caller
/// attaches the stored image reference afterwards.
pub fn import_dumped_record(
    config: &EntryConfiguration,
    text: &str,
    tags: &mut TagPool,
    has_image: bool,
) -> Result<Record> {
    let data: Value =
        serde_json::from_str(text).map_err(|e| Error::Import(format!("invalid JSON: {}", e)))?;
    let Value::Object(fields) = data else {
        return Err(Error::Import("dumped record is not an object".to_string()));
    };

    let mut loaded = Vec::with_capacity(config.entries.len());
    for entry in &config.entries {
        let Some(raw) = fields.get(&entry.name) else {
            if !entry.optional {
                return Err(Error::MissingEntry(entry.name.clone()));
            }
            continue;
        };
        let value = match &entry.kind {
            EntryKind::String { .. } => load_string(entry, raw)?,
            EntryKind::Tag { exclusive } => load_tags(entry, *exclusive, raw)?,
            EntryKind::Rating { maximum_score, .. } => load_rating(entry, *maximum_score, raw)?,
        };
        if let Loaded::Value(value) = &value {
            let method = entry.sorting_method;
            if method.is_active() && !value.is_empty() && sorting::sort_key(entry, value, tags).is_none() {
                return Err(Error::InvalidFormatting(entry.name.clone()));
            }
        }
        loaded.push((entry, value));
    }

    if config.has_images() && !has_image {
        return Err(Error::ImageNotFound);
    }

    let mut entries = BTreeMap::new();
    for (entry, value) in loaded {
        let value = match value {
            Loaded::Value(value) => value,
            Loaded::Tags(names) => EntryValue::tags(tags.register_tags(&entry.name, &names)),
        };
        if !value.is_empty() {
            entries.insert(entry.name.clone(), value);
        }
    }

    debug!(entries = entries.len(), "Imported dumped record");
    Ok(Record {
        image: None,
        entries,
    })
}

fn load_string(entry: &EntryDefinition, raw: &Value) -> Result<Loaded> {
    let Value::String(text) = raw else {
        return Err(Error::Import(format!("{} expects a string", entry.name)));
    };
    if text.is_empty() && !entry.optional {
        return Err(Error::MissingEntry(entry.name.clone()));
    }
    Ok(Loaded::Value(EntryValue::string(text.clone())))
}

fn load_tags(entry: &EntryDefinition, exclusive: bool, raw: &Value) -> Result<Loaded> {
    let Value::Array(items) = raw else {
        return Err(Error::Import(format!("{} expects an array of tags", entry.name)));
    };
    let names = items
        .iter()
        .map(|item| match item {
            Value::String(name) if !name.is_empty() => Ok(name.clone()),
            _ => Err(Error::Import(format!(
                "{} expects non-empty tag strings",
                entry.name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    if exclusive && names.len() > 1 {
        return Err(Error::ExclusiveTag(entry.name.clone()));
    }
    if names.is_empty() && !entry.optional {
        return Err(Error::MissingEntry(entry.name.clone()));
    }
    Ok(Loaded::Tags(names))
}

fn load_rating(entry: &EntryDefinition, maximum_score: u32, raw: &Value) -> Result<Loaded> {
    let invalid = || Error::Import(format!("{} expects {{\"score\": n, \"comment\"?: text}}", entry.name));
    let Value::Object(fields) = raw else {
        return Err(invalid());
    };
    let score = fields
        .get("score")
        .and_then(Value::as_u64)
        .and_then(|score| u32::try_from(score).ok())
        .ok_or_else(invalid)?;
    if score > maximum_score {
        return Err(Error::Import(format!(
            "{} score {} exceeds {}",
            entry.name, score, maximum_score
        )));
    }
    if score == 0 && !entry.optional {
        return Err(Error::MissingEntry(entry.name.clone()));
    }
    let comment = match fields.get("comment") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => return Err(invalid()),
    };
    Ok(Loaded::Value(EntryValue::rating(score, comment)))
}
