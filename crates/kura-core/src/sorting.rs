//! Sort key encoding.
//!
//! Every entry value reduces to a string whose plain lexicographic order is
//! the entry's semantic order, so records can be sorted and compared without
//! knowing the entry type. `None` means "no encoding": such values never
//! match a comparison and sort after every encoded value.
//!
//! Numbers are packed at a fixed width. A non-negative value is zero padded
//! to 19 digits; a negative value is `-` followed by the 18-digit nines
//! complement of its magnitude. `-` sorts before every digit, and the
//! complement makes a larger magnitude produce a smaller key, so
//! `-5 < -1 < 0 < 3` holds on the strings.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::defaults::{SORT_KEY_DIGITS, SORT_KEY_MAX_MAGNITUDE};
use crate::entry::{EntryDefinition, EntryKind, SortingMethod};
use crate::record::{EntryValue, Record};
use crate::tags::TagPool;

static NUMERIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("numeric run pattern is valid"));

// =============================================================================
// NUMBERS
// =============================================================================

/// Pack an integer into a fixed-width key. Magnitudes beyond
/// [`SORT_KEY_MAX_MAGNITUDE`] saturate.
pub fn pack_integer(value: i64) -> String {
    let magnitude = value.unsigned_abs().min(SORT_KEY_MAX_MAGNITUDE);
    if value < 0 {
        format!(
            "-{:0width$}",
            SORT_KEY_MAX_MAGNITUDE - magnitude,
            width = SORT_KEY_DIGITS
        )
    } else {
        format!("{:0width$}", magnitude, width = SORT_KEY_DIGITS + 1)
    }
}

/// Round half up and pack. Non-finite values have no encoding.
pub fn pack_number(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    // `as` saturates at the i64 bounds
    Some(pack_integer((value + 0.5).floor() as i64))
}

/// Encode the first run of ASCII digits found in `text`.
pub fn encode_number_text(text: &str) -> Option<String> {
    let run = NUMERIC_RUN.find(text)?.as_str();
    let significant = run.trim_start_matches('0');
    if significant.len() > SORT_KEY_DIGITS {
        return Some(pack_integer(SORT_KEY_MAX_MAGNITUDE as i64));
    }
    let value = significant.parse::<i64>().unwrap_or(0);
    Some(pack_integer(value))
}

// =============================================================================
// DATES
// =============================================================================

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Parse calendar text into milliseconds since the Unix epoch.
///
/// Offsets are honoured when present (RFC 3339, RFC 2822); text without an
/// offset is read as UTC. Bare years and year-months denote their first day.
pub fn parse_timestamp_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.timestamp_millis());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    let padded = match text.len() {
        4 => format!("{}-01-01", text),
        7 => format!("{}-01", text),
        _ => text.to_string(),
    };
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(&padded, format) {
            return parsed
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc().timestamp_millis());
        }
    }
    None
}

/// Encode calendar text as a packed millisecond timestamp.
pub fn encode_date_text(text: &str) -> Option<String> {
    parse_timestamp_millis(text).map(pack_integer)
}

// =============================================================================
// TAGS
// =============================================================================

/// Digits needed to print every index of a pool holding `pool_len` tags.
fn tag_index_width(pool_len: usize) -> usize {
    if pool_len <= 1 {
        0
    } else {
        (pool_len - 1).to_string().len()
    }
}

/// Concatenate zero-padded tag indices in stored order.
pub fn encode_tags(indices: &[usize], pool_len: usize) -> String {
    let width = tag_index_width(pool_len);
    indices
        .iter()
        .map(|index| format!("{:0width$}", index, width = width))
        .collect()
}

// =============================================================================
// ENTRY VALUES
// =============================================================================

/// Encode raw text under `method`, as string entries and query operands are.
pub fn encode_text(method: SortingMethod, text: &str) -> Option<String> {
    match method {
        SortingMethod::AsString => Some(text.to_string()),
        SortingMethod::AsNumber => encode_number_text(text),
        SortingMethod::AsDate => encode_date_text(text),
        SortingMethod::Unset | SortingMethod::Disabled => None,
    }
}

/// Encode a rating score. Only numeric sorting applies to ratings.
pub fn encode_rating(method: SortingMethod, score: u32) -> Option<String> {
    match method {
        SortingMethod::AsNumber => Some(pack_integer(i64::from(score))),
        _ => None,
    }
}

/// Encode tag indices. Any active method orders tags by index.
pub fn encode_tag_value(method: SortingMethod, indices: &[usize], pool_len: usize) -> Option<String> {
    method
        .is_active()
        .then(|| encode_tags(indices, pool_len))
}

/// Sort key of `value` stored under `entry`.
pub fn sort_key(entry: &EntryDefinition, value: &EntryValue, tags: &TagPool) -> Option<String> {
    let method = entry.sorting_method;
    match (&entry.kind, value) {
        (EntryKind::String { .. }, EntryValue::String { value }) => encode_text(method, value),
        (EntryKind::Rating { .. }, EntryValue::Rating { score, .. }) => encode_rating(method, *score),
        (EntryKind::Tag { .. }, EntryValue::Tags { tags: indices }) => {
            encode_tag_value(method, indices, tags.len(&entry.name))
        }
        _ => {
            warn!(entry = %entry.name, "Value does not match entry type");
            None
        }
    }
}

/// Order two optional keys, placing `None` after every encoded key.
pub fn compare_keys(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Record ids ordered by their key for `entry`.
///
/// Records without an encoding come last in either direction; ties keep id
/// order.
pub fn sort_records(
    entry: &EntryDefinition,
    records: &BTreeMap<String, Record>,
    tags: &TagPool,
    descending: bool,
) -> Vec<String> {
    let mut keyed: Vec<(&String, Option<String>)> = records
        .iter()
        .map(|(id, record)| {
            let key = record
                .get(&entry.name)
                .and_then(|value| sort_key(entry, value, tags));
            (id, key)
        })
        .collect();

    keyed.sort_by(|(_, a), (_, b)| match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(a),
        _ => compare_keys(a.as_deref(), b.as_deref()),
    });

    keyed.into_iter().map(|(id, _)| id.clone()).collect()
}
