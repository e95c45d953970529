//! Entry configuration and record validation.
//!
//! Validation never stops at the first problem: every checker returns the
//! complete list of violations so a caller can show them all at once.
//!
//! - [`check_configuration`] inspects a typed configuration for content
//!   problems (empty or duplicated names, rating bounds, nothing to store).
//! - [`check_configuration_value`] accepts arbitrary JSON, reports shape
//!   problems with a path prefix and, when the shape is sound, falls
//!   through to the content checks.
//! - [`check_record`] classifies one record being edited.
//! - [`find_duplicated_values`] looks across records for clashes on
//!   `unique` string entries.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::defaults::{RATING_MAX_SCORE, RATING_MIN_SCORE};
use crate::entry::{EntryConfiguration, EntryDefinition, EntryKind, SortingMethod};
use crate::record::{DraftRecord, DraftValue, EntryValue, Record};
use crate::sorting;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// A problem found in an entry configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("image width and height must be positive")]
    ImageSizeNotPositive,

    #[error("image width and height must be integers")]
    ImageSizeNotInteger,

    /// `index` is zero-based; the message counts from one.
    #[error("entry #{} has an empty name", .index + 1)]
    EmptyEntryName { index: usize },

    #[error("entry name \"{name}\" is used more than once")]
    DuplicatedEntryName { name: String },

    #[error(
        "rating entry \"{name}\" (#{}) must have an integer maximum score between {} and {}",
        .index + 1, RATING_MIN_SCORE, RATING_MAX_SCORE
    )]
    BadRatingMaximumScore { name: String, index: usize },

    #[error("rating entry \"{name}\" has maximum score {maximum_score} but {hints} hints")]
    RatingHintMismatch {
        name: String,
        maximum_score: u32,
        hints: usize,
    },

    #[error("no entry is configured and images are disabled, nothing could be stored")]
    EmptyCatalog,

    /// Structural problem in untrusted input, with its path.
    #[error("{0}")]
    Shape(String),
}

/// Content checks on a structurally sound configuration.
pub fn check_configuration(config: &EntryConfiguration) -> Vec<ConfigViolation> {
    check_content(config, false)
}

fn check_content(config: &EntryConfiguration, image_size_not_integer: bool) -> Vec<ConfigViolation> {
    let mut violations = Vec::new();

    if let Some(size) = config.image_size {
        if size.width == 0 || size.height == 0 {
            violations.push(ConfigViolation::ImageSizeNotPositive);
        }
    }
    if image_size_not_integer {
        violations.push(ConfigViolation::ImageSizeNotInteger);
    }

    let mut used_names = HashSet::new();
    let mut reported = HashSet::new();
    for (index, entry) in config.entries.iter().enumerate() {
        if entry.name.trim().is_empty() {
            violations.push(ConfigViolation::EmptyEntryName { index });
        } else if !reported.contains(entry.name.as_str()) && !used_names.insert(entry.name.as_str()) {
            violations.push(ConfigViolation::DuplicatedEntryName {
                name: entry.name.clone(),
            });
            reported.insert(entry.name.as_str());
        }

        if let EntryKind::Rating {
            maximum_score,
            hints,
        } = &entry.kind
        {
            if !(RATING_MIN_SCORE..=RATING_MAX_SCORE).contains(maximum_score) {
                violations.push(ConfigViolation::BadRatingMaximumScore {
                    name: entry.name.clone(),
                    index,
                });
            } else if let Some(hints) = hints {
                if hints.len() != *maximum_score as usize {
                    violations.push(ConfigViolation::RatingHintMismatch {
                        name: entry.name.clone(),
                        maximum_score: *maximum_score,
                        hints: hints.len(),
                    });
                }
            }
        }
    }

    if config.image_size.is_none() && config.entries.is_empty() {
        violations.push(ConfigViolation::EmptyCatalog);
    }

    violations
}

/// Full check of an untrusted configuration document.
pub fn check_configuration_value(value: &Value) -> Vec<ConfigViolation> {
    let fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return vec![shape("configuration is null")],
        _ => return vec![shape("configuration is not an object")],
    };

    let mut reasons = Vec::new();
    let mut sanitized = fields.clone();

    match fields.get("entries") {
        None => reasons.push(".entries is missing".to_string()),
        Some(Value::Array(entries)) => {
            let mut cleaned = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                let (entry_reasons, entry_clean) = check_entry_shape(entry);
                reasons.extend(
                    entry_reasons
                        .into_iter()
                        .map(|reason| format!(".entries.[{}]: {}", index, reason)),
                );
                cleaned.push(entry_clean);
            }
            sanitized.insert("entries".to_string(), Value::Array(cleaned));
        }
        Some(_) => reasons.push(".entries is not an array".to_string()),
    }

    let mut image_size_not_integer = false;
    match fields.get("image_size") {
        None | Some(Value::Null) => {}
        Some(Value::Object(size)) => {
            let mut cleaned = size.clone();
            for key in ["width", "height"] {
                match field_check(size, key, JsonKind::Number, ".image_size") {
                    Some(reason) => reasons.push(reason),
                    None => {
                        let (dimension, integral) = clamp_dimension(&size[key]);
                        image_size_not_integer |= !integral;
                        cleaned.insert(key.to_string(), Value::from(dimension));
                    }
                }
            }
            sanitized.insert("image_size".to_string(), Value::Object(cleaned));
        }
        Some(_) => reasons.push(".image_size is not an object".to_string()),
    }

    if !reasons.is_empty() {
        debug!(count = reasons.len(), "Configuration failed shape check");
        return reasons.into_iter().map(ConfigViolation::Shape).collect();
    }

    match serde_json::from_value::<EntryConfiguration>(Value::Object(sanitized)) {
        Ok(config) => check_content(&config, image_size_not_integer),
        Err(e) => vec![shape(&format!("configuration does not deserialize: {}", e))],
    }
}

fn shape(message: &str) -> ConfigViolation {
    ConfigViolation::Shape(message.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    String,
    Boolean,
    Number,
}

impl JsonKind {
    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Number => "number",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// At most one problem per field: missing or of the wrong type.
fn field_check(object: &Map<String, Value>, name: &str, kind: JsonKind, prefix: &str) -> Option<String> {
    match object.get(name) {
        None => Some(format!("missing {}.{}", prefix, name)),
        Some(value) if !kind.matches(value) => Some(format!(
            "{}.{} is not a {} as expected",
            prefix,
            name,
            kind.name()
        )),
        Some(_) => None,
    }
}

/// A JSON number holding a whole value that fits in `u32`.
fn as_whole_u32(value: &Value) -> Option<u32> {
    if let Some(unsigned) = value.as_u64() {
        return u32::try_from(unsigned).ok();
    }
    let float = value.as_f64()?;
    (float.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&float)).then(|| float as u32)
}

/// Map a JSON number onto a `u32` dimension, reporting whether it was integral.
/// Non-positive values map to zero so the content check flags them.
fn clamp_dimension(value: &Value) -> (u32, bool) {
    if let Some(whole) = as_whole_u32(value) {
        return (whole, true);
    }
    let float = value.as_f64().unwrap_or(0.0);
    let clamped = if float <= 0.0 {
        0
    } else {
        float.ceil().min(f64::from(u32::MAX)) as u32
    };
    (clamped, float.fract() == 0.0)
}

fn check_entry_shape(entry: &Value) -> (Vec<String>, Value) {
    let fields = match entry {
        Value::Object(fields) => fields,
        Value::Null => return (vec!["entry is null".to_string()], entry.clone()),
        _ => return (vec!["entry is not an object".to_string()], entry.clone()),
    };

    let mut reasons = Vec::new();
    let mut cleaned = fields.clone();

    for (name, kind) in [
        ("name", JsonKind::String),
        ("sorting_method", JsonKind::String),
        ("optional", JsonKind::Boolean),
    ] {
        if let Some(reason) = field_check(fields, name, kind, "") {
            reasons.push(reason);
        }
    }
    if let Some(Value::String(method)) = fields.get("sorting_method") {
        if method.parse::<SortingMethod>().is_err() {
            reasons.push(format!("unsupported sorting method {}", method));
        }
    }

    if let Some(reason) = field_check(fields, "type", JsonKind::String, "") {
        reasons.push(reason);
        return (reasons, Value::Object(cleaned));
    }
    let entry_type = fields.get("type").and_then(Value::as_str).unwrap_or_default();

    match entry_type {
        "string" => reasons.extend(field_check(fields, "unique", JsonKind::Boolean, "")),
        "tag" => reasons.extend(field_check(fields, "exclusive", JsonKind::Boolean, "")),
        "rating" => {
            match field_check(fields, "maximum_score", JsonKind::Number, "") {
                Some(reason) => reasons.push(reason),
                None => {
                    // Out-of-range or fractional scores become 0, which the
                    // content check reports with the entry's name and index.
                    let score = fields
                        .get("maximum_score")
                        .and_then(as_whole_u32)
                        .unwrap_or(0);
                    cleaned.insert("maximum_score".to_string(), Value::from(score));
                }
            }
            match fields.get("hints") {
                None | Some(Value::Null) => {}
                Some(Value::Array(hints)) => {
                    for (index, hint) in hints.iter().enumerate() {
                        if !hint.is_string() {
                            reasons.push(format!(
                                ".hints.[{}] is not a string as expected but a {}",
                                index,
                                json_type_name(hint)
                            ));
                        }
                    }
                }
                Some(_) => reasons.push(".hints is not null but not an array".to_string()),
            }
        }
        other => reasons.push(format!("unsupported type {}", other)),
    }

    (reasons, Value::Object(cleaned))
}

// =============================================================================
// RECORDS
// =============================================================================

/// Why a record cannot be stored as is.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemInvalidReason {
    /// A required entry is empty; `key: None` means the image.
    #[error("{} is missing", .key.as_deref().unwrap_or("image"))]
    Missing { key: Option<String> },

    #[error("{key} cannot be read {expected_format}")]
    Formatting {
        key: String,
        expected_format: SortingMethod,
    },

    #[error("{key} has value \"{value}\" which another record already uses")]
    DuplicatedValue { key: String, value: String },

    #[error("{key} accepts only one tag")]
    Exclusive { key: String },
}

impl ItemInvalidReason {
    /// Entry the reason refers to; `None` for the image.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Missing { key } => key.as_deref(),
            Self::Formatting { key, .. } | Self::DuplicatedValue { key, .. } | Self::Exclusive { key } => {
                Some(key)
            }
        }
    }
}

/// Classify one record against the configuration.
///
/// `override_image` is set when a replacement image is pending, which
/// satisfies the image requirement even if the draft has none yet.
pub fn check_record(
    draft: &DraftRecord,
    override_image: bool,
    config: &EntryConfiguration,
) -> Vec<ItemInvalidReason> {
    let mut reasons = Vec::new();

    if config.has_images() && draft.image.is_none() && !override_image {
        reasons.push(ItemInvalidReason::Missing { key: None });
    }

    for entry in &config.entries {
        if let Some(reason) = check_entry(entry, draft.entries.get(&entry.name)) {
            reasons.push(reason);
        }
    }

    reasons
}

/// Classify a stored record; stored records always carry their own image.
pub fn check_stored_record(record: &Record, config: &EntryConfiguration) -> Vec<ItemInvalidReason> {
    check_record(&DraftRecord::from(record), false, config)
}

fn check_entry(entry: &EntryDefinition, draft: Option<&DraftValue>) -> Option<ItemInvalidReason> {
    // A value of the wrong kind counts as absent
    let value = draft.filter(|value| {
        matches!(
            (&entry.kind, value),
            (EntryKind::String { .. }, DraftValue::String(_))
                | (EntryKind::Tag { .. }, DraftValue::Tags(_))
                | (EntryKind::Rating { .. }, DraftValue::Rating { .. })
        )
    });

    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return (!entry.optional).then(|| ItemInvalidReason::Missing {
            key: Some(entry.name.clone()),
        });
    };

    if let DraftValue::Tags(tags) = value {
        if entry.is_exclusive() && tags.len() > 1 {
            return Some(ItemInvalidReason::Exclusive {
                key: entry.name.clone(),
            });
        }
    }

    let method = entry.sorting_method;
    if !method.is_active() {
        return None;
    }
    let encodes = match value {
        DraftValue::String(text) => sorting::encode_text(method, text).is_some(),
        DraftValue::Rating { score, .. } => sorting::encode_rating(method, *score).is_some(),
        // Fresh tags get indices on finalize; any index list encodes
        DraftValue::Tags(_) => true,
    };
    (!encodes).then(|| ItemInvalidReason::Formatting {
        key: entry.name.clone(),
        expected_format: method,
    })
}

/// Records sharing a value of a `unique` string entry.
///
/// Every record involved in a clash gets one [`ItemInvalidReason::DuplicatedValue`]
/// per clashing entry.
pub fn find_duplicated_values(
    config: &EntryConfiguration,
    records: &BTreeMap<String, Record>,
) -> BTreeMap<String, Vec<ItemInvalidReason>> {
    let mut found: BTreeMap<String, Vec<ItemInvalidReason>> = BTreeMap::new();

    for entry in config.entries.iter().filter(|entry| entry.is_unique()) {
        let mut holders: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, record) in records {
            if let Some(EntryValue::String { value }) = record.get(&entry.name) {
                if !value.is_empty() {
                    holders.entry(value.as_str()).or_default().push(id.as_str());
                }
            }
        }
        for (value, ids) in holders.into_iter().filter(|(_, ids)| ids.len() > 1) {
            for id in ids {
                found
                    .entry(id.to_string())
                    .or_default()
                    .push(ItemInvalidReason::DuplicatedValue {
                        key: entry.name.clone(),
                        value: value.to_string(),
                    });
            }
        }
    }

    found
}
