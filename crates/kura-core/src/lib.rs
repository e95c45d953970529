//! # kura-core
//!
//! Catalog data model for kura: entry configuration, records and drafts,
//! the tag pool, sort keys and validation.
//!
//! This crate has no cryptography and no I/O. `kura-crypto` seals and opens
//! the [`CatalogData`] defined here, and `kura-search` queries it.

pub mod catalog;
pub mod defaults;
pub mod entry;
pub mod error;
pub mod image;
pub mod import;
pub mod record;
pub mod sorting;
pub mod tags;
pub mod validation;
pub mod wire;

// Re-export commonly used types at crate root
pub use catalog::{CatalogData, Configurations, ProtectionCounter};
pub use entry::{EntryConfiguration, EntryDefinition, EntryKind, EntryType, ImageSize, SortingMethod};
pub use error::{Error, Result};
pub use image::{ImageFormat, ImagePool, ImagePools};
pub use import::import_dumped_record;
pub use record::{DraftRecord, DraftTag, DraftValue, EntryValue, ImageRef, Record};
pub use sorting::{sort_key, sort_records};
pub use tags::{find_tag_candidates, TagCandidate, TagMatchClass, TagPool};
pub use validation::{
    check_configuration, check_configuration_value, check_record, check_stored_record,
    find_duplicated_values, ConfigViolation, ItemInvalidReason,
};
