//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 32;

/// What a subkey is used for. Each purpose yields an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Sealing the password verification constant.
    Verification,
    /// Commit slots, folder records, the free list and vault metadata.
    Metadata,
    /// File content chunks.
    Content,
}

impl KeyPurpose {
    fn context(&self) -> &'static [u8] {
        match self {
            KeyPurpose::Verification => b"openvault/v1/verification",
            KeyPurpose::Metadata => b"openvault/v1/metadata",
            KeyPurpose::Content => b"openvault/v1/content",
        }
    }
}

/// Master key derived from the user password.
///
/// This key is the root of the key hierarchy and is never used to
/// encrypt data directly.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the subkey for a purpose.
    ///
    /// Uses BLAKE2b over the master key and a purpose-specific context.
    pub fn derive_subkey(&self, purpose: KeyPurpose) -> SubKey {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(purpose.context());

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        SubKey {
            key: derived,
            purpose,
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Purpose-bound key used with the AEAD.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SubKey {
    key: [u8; KEY_LENGTH],
    #[zeroize(skip)]
    purpose: KeyPurpose,
}

impl SubKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// The purpose this key was derived for.
    pub fn purpose(&self) -> KeyPurpose {
        self.purpose
    }
}

impl fmt::Debug for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubKey({:?}, [REDACTED])", self.purpose)
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice read back from storage.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; SALT_LENGTH]>::try_from(bytes).ok().map(Self)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// BLAKE2b-256 digest of file plaintext.
pub fn content_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
