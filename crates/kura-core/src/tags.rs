//! Tag pool and tag candidate matching.
//!
//! Records never store tag strings. Every tag entry owns an ordered list of
//! distinct strings in the [`TagPool`], and a record holds the indices of
//! its tags in ascending order. Appending to a pool never moves existing
//! strings, so stored indices stay valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

use crate::wire;

// =============================================================================
// TAG POOL
// =============================================================================

/// Per-entry registry of distinct tag strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TagPool {
    #[serde(deserialize_with = "wire::deserialize_map")]
    pools: BTreeMap<String, Vec<String>>,
}

impl Serialize for TagPool {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        wire::serialize_map(&self.pools, serializer)
    }
}

impl TagPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from a list of `(entry, tags)` pairs.
    pub fn from_entries<I, N, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<T>)>,
        N: Into<String>,
        T: Into<String>,
    {
        let pools = entries
            .into_iter()
            .map(|(name, tags)| (name.into(), tags.into_iter().map(Into::into).collect()))
            .collect();
        Self { pools }
    }

    /// Tags registered for `entry`, in index order.
    pub fn tags(&self, entry: &str) -> &[String] {
        self.pools.get(entry).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of tags registered for `entry`.
    pub fn len(&self, entry: &str) -> usize {
        self.tags(entry).len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.values().all(Vec::is_empty)
    }

    /// The tag string stored at `index` for `entry`.
    pub fn resolve(&self, entry: &str, index: usize) -> Option<&str> {
        self.tags(entry).get(index).map(String::as_str)
    }

    /// Index of `tag` in the pool of `entry`.
    pub fn position(&self, entry: &str, tag: &str) -> Option<usize> {
        self.tags(entry).iter().position(|known| known == tag)
    }

    /// Look up each tag, appending the unknown ones, and return the indices
    /// sorted ascending without duplicates.
    pub fn register_tags<S: AsRef<str>>(&mut self, entry: &str, tags: &[S]) -> Vec<usize> {
        if tags.is_empty() {
            return Vec::new();
        }
        let pool = self.pools.entry(entry.to_string()).or_default();
        let mut indices: Vec<usize> = tags
            .iter()
            .map(|tag| {
                let tag = tag.as_ref();
                match pool.iter().position(|known| known == tag) {
                    Some(index) => index,
                    None => {
                        pool.push(tag.to_string());
                        pool.len() - 1
                    }
                }
            })
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Iterate over `(entry, tags)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.pools
            .iter()
            .map(|(name, tags)| (name.as_str(), tags.as_slice()))
    }
}

// =============================================================================
// CANDIDATES
// =============================================================================

/// How a pooled tag matched a typed criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagMatchClass {
    Exact,
    Prefix,
    Substring,
}

/// One suggestion offered while typing a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCandidate {
    /// An existing pooled tag.
    Matched {
        class: TagMatchClass,
        index: usize,
        display: String,
    },
    /// A tag that does not exist yet and would be created.
    Creation { display: String },
}

impl TagCandidate {
    pub fn display(&self) -> &str {
        match self {
            Self::Matched { display, .. } | Self::Creation { display } => display,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Matched { index, .. } => Some(*index),
            Self::Creation { .. } => None,
        }
    }
}

/// Rank the tags of `haystack` against `criterion`.
///
/// Exact matches come first, then prefix matches, then substring matches,
/// each group in haystack order. When `allow_creating` is set and nothing
/// matched exactly, a trailing [`TagCandidate::Creation`] carries the
/// criterion itself.
pub fn find_tag_candidates<S: AsRef<str>>(
    criterion: &str,
    haystack: &[S],
    allow_creating: bool,
) -> Vec<TagCandidate> {
    let mut exact = Vec::new();
    let mut prefix = Vec::new();
    let mut substring = Vec::new();

    for (index, tag) in haystack.iter().enumerate() {
        let tag = tag.as_ref();
        let class = if tag == criterion {
            TagMatchClass::Exact
        } else if tag.starts_with(criterion) {
            TagMatchClass::Prefix
        } else if tag.contains(criterion) {
            TagMatchClass::Substring
        } else {
            continue;
        };
        let candidate = TagCandidate::Matched {
            class,
            index,
            display: tag.to_string(),
        };
        match class {
            TagMatchClass::Exact => exact.push(candidate),
            TagMatchClass::Prefix => prefix.push(candidate),
            TagMatchClass::Substring => substring.push(candidate),
        }
    }

    let creation = (allow_creating && exact.is_empty()).then(|| TagCandidate::Creation {
        display: criterion.to_string(),
    });

    exact
        .into_iter()
        .chain(prefix)
        .chain(substring)
        .chain(creation)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn displays(candidates: &[TagCandidate], class: TagMatchClass) -> Vec<&str> {
        candidates
            .iter()
            .filter(|c| matches!(c, TagCandidate::Matched { class: k, .. } if *k == class))
            .map(TagCandidate::display)
            .collect()
    }

    #[test]
    fn test_find_candidates_class_order() {
        let haystack = ["foobar", "food", "barfoo"];
        let candidates = find_tag_candidates("foo", &haystack, false);

        assert!(displays(&candidates, TagMatchClass::Exact).is_empty());
        assert_eq!(displays(&candidates, TagMatchClass::Prefix), vec!["foobar", "food"]);
        assert_eq!(displays(&candidates, TagMatchClass::Substring), vec!["barfoo"]);
        let all: Vec<&str> = candidates.iter().map(TagCandidate::display).collect();
        assert_eq!(all, vec!["foobar", "food", "barfoo"]);
    }

    #[test]
    fn test_find_candidates_exact_first() {
        let haystack = ["xfoo", "foo", "foox"];
        let candidates = find_tag_candidates("foo", &haystack, true);
        let all: Vec<&str> = candidates.iter().map(TagCandidate::display).collect();
        assert_eq!(all, vec!["foo", "foox", "xfoo"]);
        assert_eq!(candidates[0].index(), Some(1));
        // Exact match present, no creation offered
        assert!(!candidates
            .iter()
            .any(|c| matches!(c, TagCandidate::Creation { .. })));
    }

    #[test]
    fn test_find_candidates_creation_last() {
        let haystack = ["foobar"];
        let candidates = find_tag_candidates("foo", &haystack, true);
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[1],
            TagCandidate::Creation {
                display: "foo".to_string()
            }
        );
        assert_eq!(candidates[1].index(), None);
    }

    #[test]
    fn test_register_tags_appends_and_sorts() {
        let mut pool = TagPool::from_entries([("genre", vec!["rock", "jazz"])]);
        let indices = pool.register_tags("genre", &["pop", "jazz", "rock"]);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(pool.tags("genre"), &["rock", "jazz", "pop"]);
    }

    #[test]
    fn test_register_tags_numeric_order() {
        let mut pool = TagPool::new();
        let names: Vec<String> = (0..11).map(|i| format!("t{}", i)).collect();
        pool.register_tags("e", &names);
        let indices = pool.register_tags("e", &["t10", "t9"]);
        assert_eq!(indices, vec![9, 10]);
    }

    #[test]
    fn test_register_tags_dedups() {
        let mut pool = TagPool::new();
        let indices = pool.register_tags("e", &["a", "a", "b"]);
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(pool.len("e"), 2);
    }

    #[test]
    fn test_resolve_and_missing_entry() {
        let pool = TagPool::from_entries([("genre", vec!["rock"])]);
        assert_eq!(pool.resolve("genre", 0), Some("rock"));
        assert_eq!(pool.resolve("genre", 1), None);
        assert_eq!(pool.resolve("mood", 0), None);
        assert!(pool.tags("mood").is_empty());
    }

    #[test]
    fn test_pool_wire_form() {
        let pool = TagPool::from_entries([("genre", vec!["rock", "jazz"])]);
        let text = wire::encode(&pool).unwrap();
        assert_eq!(text, r#"["map://",["genre",["rock","jazz"]]]"#);
        let back: TagPool = wire::decode(&text).unwrap();
        assert_eq!(back, pool);
    }
}
