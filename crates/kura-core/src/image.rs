//! Image formats and image pool bookkeeping.

use serde::{Deserialize, Serialize};

use crate::wire;

/// Fixed properties of a stored image format.
///
/// The first `header_length` bytes of a stored image are kept in clear so
/// the format can be recognised before decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub mime: &'static str,
    /// Including the leading dot.
    pub extension: &'static str,
    pub header_length: usize,
}

impl ImageFormat {
    pub const WEBP: ImageFormat = ImageFormat {
        mime: "image/webp",
        extension: ".webp",
        header_length: 12,
    };

    pub const PNG: ImageFormat = ImageFormat {
        mime: "image/png",
        extension: ".png",
        header_length: 33,
    };

    /// Format of full-size record images.
    pub const IMAGE: ImageFormat = Self::WEBP;

    /// Format of record thumbnails.
    pub const THUMBNAIL: ImageFormat = Self::PNG;

    /// File name of the stored image `stem`.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}{}", stem, self.extension)
    }
}

/// Allocation bitmap of one image pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePool {
    pub name: String,
    #[serde(with = "wire::bytes")]
    pub bitmap: Vec<u8>,
}

impl ImagePool {
    /// Whether slot `index` is taken.
    pub fn is_allocated(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let bit = index % 8;
        self.bitmap
            .get(byte)
            .is_some_and(|value| value & (1 << bit) != 0)
    }
}

/// All image pools of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePools {
    pub pools: Vec<ImagePool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_constants() {
        assert_eq!(ImageFormat::IMAGE, ImageFormat::WEBP);
        assert_eq!(ImageFormat::THUMBNAIL.header_length, 33);
        assert_eq!(ImageFormat::WEBP.file_name("abc"), "abc.webp");
    }

    #[test]
    fn test_pool_bitmap() {
        let pool = ImagePool {
            name: "p".to_string(),
            bitmap: vec![0b0000_0101, 0b1000_0000],
        };
        assert!(pool.is_allocated(0));
        assert!(!pool.is_allocated(1));
        assert!(pool.is_allocated(2));
        assert!(pool.is_allocated(15));
        assert!(!pool.is_allocated(64));
    }

    #[test]
    fn test_pools_wire_form() {
        let pools = ImagePools {
            pools: vec![ImagePool {
                name: "p".to_string(),
                bitmap: vec![1, 2],
            }],
        };
        let text = wire::encode(&pools).unwrap();
        assert!(text.contains("base64://AQI="));
        let back: ImagePools = wire::decode(&text).unwrap();
        assert_eq!(back, pools);
    }
}
