//! Centralized default constants for kura.
//!
//! **This module is the single source of truth** for values shared between
//! the catalog model, the envelope crypto and the search compiler. Crates
//! should reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// CRYPTO
// =============================================================================

/// Length of every AES-GCM nonce stored in an envelope or image blob.
pub const NONCE_LENGTH: usize = 12;

/// Length of user keys and database keys (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated Argon2 salts.
pub const SALT_LENGTH: usize = 32;

/// Length of the AES-GCM authentication tag appended to ciphertext.
pub const TAG_LENGTH: usize = 16;

/// Default Argon2id memory cost in KiB (64 MiB).
pub const KDF_MEMORY_KIB: u32 = 65536;

/// Default Argon2id iteration count.
pub const KDF_ITERATIONS: u32 = 3;

/// Default Argon2id parallelism.
pub const KDF_THREADS: u32 = 4;

/// Error code reported by the KDF worker when a derivation is cancelled.
pub const KDF_CANCELLED_CODE: i32 = -1000;

/// Error code reported by the KDF worker when the hash itself fails.
pub const KDF_FAILED_CODE: i32 = -1;

/// Environment variable overriding the Argon2id memory cost (KiB).
pub const KDF_MEMORY_ENV: &str = "KURA_KDF_MEMORY_KIB";

/// Environment variable overriding the Argon2id iteration count.
pub const KDF_ITERATIONS_ENV: &str = "KURA_KDF_ITERATIONS";

/// Environment variable overriding the Argon2id parallelism.
pub const KDF_THREADS_ENV: &str = "KURA_KDF_THREADS";

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Prefix marking a string as base64-encoded raw bytes.
pub const BYTES_MARKER: &str = "base64://";

/// First element of an array that encodes a key/value mapping.
pub const MAP_MARKER: &str = "map://";

// =============================================================================
// ENTRIES
// =============================================================================

/// Smallest `maximum_score` a rating entry may declare.
pub const RATING_MIN_SCORE: u32 = 2;

/// Largest `maximum_score` a rating entry may declare.
pub const RATING_MAX_SCORE: u32 = 10;

// =============================================================================
// SORTING
// =============================================================================

/// Digit width of a packed numeric sort key.
///
/// Non-negative values are padded to `SORT_KEY_DIGITS + 1` digits; negative
/// values are a `-` followed by `SORT_KEY_DIGITS` digits, so both render with
/// the same total width and every negative key sorts before every
/// non-negative one.
pub const SORT_KEY_DIGITS: usize = 18;

/// Largest magnitude a packed numeric sort key can represent.
pub const SORT_KEY_MAX_MAGNITUDE: u64 = 999_999_999_999_999_999;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds_ordered() {
        assert!(RATING_MIN_SCORE < RATING_MAX_SCORE);
    }

    #[test]
    fn test_sort_key_max_magnitude_fits_width() {
        assert_eq!(SORT_KEY_MAX_MAGNITUDE.to_string().len(), SORT_KEY_DIGITS);
    }

    #[test]
    fn test_markers_distinct() {
        assert_ne!(BYTES_MARKER, MAP_MARKER);
        assert!(BYTES_MARKER.ends_with("://"));
    }
}
