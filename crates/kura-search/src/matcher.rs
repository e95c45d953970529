//! Per-entry-type text matching.

use kura_core::{EntryDefinition, EntryKind, EntryValue, TagPool};
use tracing::warn;

/// How a value is compared against query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The value contains the text.
    Partial,
    /// The value equals the text.
    Exact,
}

impl MatchMode {
    fn test(self, candidate: &str, text: &str) -> bool {
        match self {
            Self::Partial => candidate.contains(text),
            Self::Exact => candidate == text,
        }
    }
}

/// Whether `value`, stored under `entry`, matches `text`.
///
/// - string: the value itself
/// - tag: any of the tag names, resolved through `tags`
/// - rating: the comment; a rating without comment never matches
pub fn entry_matches(
    entry: &EntryDefinition,
    value: &EntryValue,
    tags: &TagPool,
    text: &str,
    mode: MatchMode,
) -> bool {
    match (&entry.kind, value) {
        (EntryKind::String { .. }, EntryValue::String { value }) => mode.test(value, text),
        (EntryKind::Tag { .. }, EntryValue::Tags { tags: indices }) => {
            indices.iter().any(|&index| match tags.resolve(&entry.name, index) {
                Some(tag) => mode.test(tag, text),
                None => {
                    warn!(entry = %entry.name, index, "Tag index outside the pool");
                    false
                }
            })
        }
        (EntryKind::Rating { .. }, EntryValue::Rating { comment, .. }) => comment
            .as_deref()
            .is_some_and(|comment| mode.test(comment, text)),
        _ => false,
    }
}
