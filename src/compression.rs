//! Compression hint inference for S3 Select input

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding of the source object, declared to the select engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Bzip2,
}

impl CompressionType {
    /// Infer the hint from the key suffix.
    ///
    /// The match is case-sensitive: `data.GZ` is treated as uncompressed.
    pub fn from_key(key: &str) -> Self {
        if key.ends_with(".gz") {
            CompressionType::Gzip
        } else if key.ends_with(".bz2") {
            CompressionType::Bzip2
        } else {
            CompressionType::None
        }
    }

    /// Value used in the `<CompressionType>` element of the request body
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "NONE",
            CompressionType::Gzip => "GZIP",
            CompressionType::Bzip2 => "BZIP2",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an object key to the compression hint the select request should carry
pub fn infer_compression(key: &str) -> CompressionType {
    CompressionType::from_key(key)
}
