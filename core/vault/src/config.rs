//! Vault creation options and persisted vault metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use openvault_common::{Error, Result};
use openvault_crypto::{Compression, KdfParams};
use openvault_storage::layout::{valid_chunk_size, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Longest vault or item name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Settings chosen when a vault is created.
///
/// These are written into the boot header, so every later open of the
/// vault uses the same chunk size, compression and name policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultOptions {
    /// Chunk size in bytes. Power of two between 4 KiB and 64 KiB.
    pub chunk_size: u32,
    /// Argon2id parameters.
    pub kdf: KdfParams,
    /// Compression applied to file content.
    pub compression: Compression,
    /// Whether sibling names differing only in case are distinct.
    pub case_sensitive: bool,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
            compression: Compression::default(),
            case_sensitive: true,
        }
    }
}

impl VaultOptions {
    /// Options for tests: smallest chunks and the cheapest KDF.
    pub fn for_testing() -> Self {
        Self {
            chunk_size: MIN_CHUNK_SIZE,
            kdf: KdfParams::minimal(),
            ..Self::default()
        }
    }

    /// Check the options before anything is written.
    ///
    /// # Errors
    /// - Validation error for an unsupported chunk size
    /// - Key derivation error for KDF parameters Argon2id rejects
    pub fn validate(&self) -> Result<()> {
        if !valid_chunk_size(self.chunk_size) {
            return Err(Error::Validation(format!(
                "Chunk size must be a power of two between {} and {} bytes, got {}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        self.kdf.validate()
    }
}

/// Vault-level metadata, stored sealed in the metadata chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMeta {
    /// Display name given at creation.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl VaultMeta {
    /// Build metadata for a new vault.
    ///
    /// # Errors
    /// - Validation error if the name is blank or too long
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Vault name cannot be empty".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "Vault name exceeds {} bytes",
                MAX_NAME_LEN
            )));
        }
        Ok(Self {
            name: name.to_string(),
            created_at: Utc::now(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::corrupted(format!("Vault metadata is unreadable: {}", e)))
    }
}
