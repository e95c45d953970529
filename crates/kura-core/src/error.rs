//! Error types for kura-core.

use thiserror::Error;

/// Result type alias using kura-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for catalog model operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A dumped record could not be imported.
    #[error("Import error: {0}")]
    Import(String),

    /// A required entry has no value.
    #[error("Missing required entry: {0}")]
    MissingEntry(String),

    /// An exclusive tag entry carries more than one tag.
    #[error("Entry {0} accepts only one tag")]
    ExclusiveTag(String),

    /// A sortable entry carries a value that cannot be encoded as a sort key.
    #[error("Entry {0} is not formatted for its sorting method")]
    InvalidFormatting(String),

    /// The configuration requires an image but none was supplied.
    #[error("Image not found")]
    ImageNotFound,

    /// Entry configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Marker-encoded payload could not be revived.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
