//! Entry configuration: the schema of a catalog.
//!
//! A catalog declares an ordered list of entries, each one of three types
//! (`string`, `tag`, `rating`). On the wire an entry is a flat object whose
//! `type` field selects the variant:
//!
//! ```json
//! { "name": "score", "type": "rating", "sorting_method": "as_number",
//!   "optional": false, "maximum_score": 5, "hints": null }
//! ```

use serde::{Deserialize, Serialize};

/// How the values of an entry are ordered and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingMethod {
    /// State before a method is chosen; never expected in a saved catalog.
    #[default]
    Unset,
    Disabled,
    AsString,
    AsNumber,
    AsDate,
}

impl SortingMethod {
    /// Whether values of this entry produce sort keys at all.
    #[inline]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Unset | Self::Disabled)
    }
}

impl std::fmt::Display for SortingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Disabled => write!(f, "disabled"),
            Self::AsString => write!(f, "as_string"),
            Self::AsNumber => write!(f, "as_number"),
            Self::AsDate => write!(f, "as_date"),
        }
    }
}

impl std::str::FromStr for SortingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "disabled" => Ok(Self::Disabled),
            "as_string" => Ok(Self::AsString),
            "as_number" => Ok(Self::AsNumber),
            "as_date" => Ok(Self::AsDate),
            _ => Err(format!("Invalid sorting method: {}", s)),
        }
    }
}

/// The three entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    String,
    Tag,
    Rating,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Tag => write!(f, "tag"),
            Self::Rating => write!(f, "rating"),
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "tag" => Ok(Self::Tag),
            "rating" => Ok(Self::Rating),
            _ => Err(format!("Invalid entry type: {}", s)),
        }
    }
}

/// Type-specific part of an entry definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    String {
        /// No two records may share a value.
        unique: bool,
    },
    Tag {
        /// At most one tag per record.
        exclusive: bool,
    },
    Rating {
        maximum_score: u32,
        /// One label per score, when present.
        #[serde(default)]
        hints: Option<Vec<String>>,
    },
}

/// One named, typed field of the catalog schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDefinition {
    pub name: String,
    pub sorting_method: SortingMethod,
    pub optional: bool,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl EntryDefinition {
    /// A required string entry.
    pub fn string(name: impl Into<String>, sorting_method: SortingMethod) -> Self {
        Self {
            name: name.into(),
            sorting_method,
            optional: false,
            kind: EntryKind::String { unique: false },
        }
    }

    /// A required tag entry.
    pub fn tag(name: impl Into<String>, sorting_method: SortingMethod, exclusive: bool) -> Self {
        Self {
            name: name.into(),
            sorting_method,
            optional: false,
            kind: EntryKind::Tag { exclusive },
        }
    }

    /// A required rating entry sorted as a number, without hints.
    pub fn rating(name: impl Into<String>, maximum_score: u32) -> Self {
        Self {
            name: name.into(),
            sorting_method: SortingMethod::AsNumber,
            optional: false,
            kind: EntryKind::Rating {
                maximum_score,
                hints: None,
            },
        }
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_sorting(mut self, sorting_method: SortingMethod) -> Self {
        self.sorting_method = sorting_method;
        self
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::String { .. } => EntryType::String,
            EntryKind::Tag { .. } => EntryType::Tag,
            EntryKind::Rating { .. } => EntryType::Rating,
        }
    }

    /// True for string entries declared `unique`.
    pub fn is_unique(&self) -> bool {
        matches!(self.kind, EntryKind::String { unique: true })
    }

    /// True for tag entries declared `exclusive`.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.kind, EntryKind::Tag { exclusive: true })
    }
}

/// Pixel dimensions every record image is stored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// The schema of a catalog: optional image size plus ordered entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageSize>,
    pub entries: Vec<EntryDefinition>,
}

impl EntryConfiguration {
    pub fn new(entries: Vec<EntryDefinition>) -> Self {
        Self {
            image_size: None,
            entries,
        }
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some(ImageSize { width, height });
        self
    }

    /// Whether every record carries an image.
    #[inline]
    pub fn has_images(&self) -> bool {
        self.image_size.is_some()
    }

    /// Look up an entry by its exact name.
    pub fn find(&self, name: &str) -> Option<&EntryDefinition> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}
