//! Optional zstd compression applied to file content before chunking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use openvault_common::{Error, Result};

const ZSTD_LEVEL: i32 = 3;

/// Compression applied to a file's plaintext before it is chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Zstd,
}

impl Compression {
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| Error::Crypto(format!("Compression failed: {}", e))),
        }
    }

    /// Reverse [`Compression::compress`].
    ///
    /// # Errors
    /// - Returns a corruption error if the stored bytes do not decode
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::corrupted(format!("Content does not decompress: {}", e))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zstd => "zstd",
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::Validation(format!("Unknown compression: {}", other))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_shrinks_repetitive_data() {
        let data = vec![b'a'; 100_000];
        let packed = Compression::Zstd.compress(&data).unwrap();
        assert!(packed.len() < data.len() / 10);
        assert_eq!(Compression::Zstd.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"plain".to_vec();
        assert_eq!(Compression::None.compress(&data).unwrap(), data);
        assert_eq!(Compression::None.decompress(&data).unwrap(), data);
    }

    #[test]
    fn test_empty_input() {
        let packed = Compression::Zstd.compress(&[]).unwrap();
        assert!(Compression::Zstd.decompress(&packed).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_corruption() {
        let err = Compression::Zstd.decompress(b"not zstd at all").unwrap_err();
        assert_eq!(err.code(), openvault_common::ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!("lz4".parse::<Compression>().is_err());
        let json = serde_json::to_string(&Compression::None).unwrap();
        assert_eq!(json, "\"none\"");
    }
}
