//! Key derivation using Argon2id, and the password verification tag.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::aead::{decrypt_chunk, encrypt_chunk, SealedChunk};
use crate::keys::{KeyPurpose, MasterKey, Salt, KEY_LENGTH};
use openvault_common::{Error, Result};

/// Constant sealed under the verification subkey at vault creation.
const VERIFICATION_CONSTANT: &[u8] = b"openvault password verification v1";
const VERIFICATION_AAD: &[u8] = b"openvault/v1/verify";

/// Largest memory cost accepted, in KiB (4 GiB).
pub const MAX_MEMORY_COST: u32 = 4 * 1024 * 1024;
/// Largest iteration count accepted.
pub const MAX_TIME_COST: u32 = 64;
/// Largest degree of parallelism accepted.
pub const MAX_PARALLELISM: u32 = 64;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Smallest parameters Argon2id accepts. For tests only.
    pub fn minimal() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "interactive" => Some(Self::interactive()),
            "moderate" => Some(Self::moderate()),
            "sensitive" => Some(Self::sensitive()),
            "minimal" => Some(Self::minimal()),
            _ => None,
        }
    }

    /// Whether the costs stay under the ceilings this format accepts.
    pub fn within_limits(&self) -> bool {
        self.memory_cost <= MAX_MEMORY_COST
            && self.time_cost <= MAX_TIME_COST
            && self.parallelism <= MAX_PARALLELISM
    }

    /// Check the parameters against Argon2id's limits and the cost ceilings.
    ///
    /// # Errors
    /// - Returns a key derivation error if Argon2id rejects the parameters
    ///   or a cost exceeds its ceiling
    pub fn validate(&self) -> Result<()> {
        if !self.within_limits() {
            return Err(Error::KeyDerivation(format!(
                "KDF costs exceed the supported maximum (memory {} KiB, time {}, parallelism {})",
                MAX_MEMORY_COST, MAX_TIME_COST, MAX_PARALLELISM
            )));
        }
        self.to_argon2().map(|_| ())
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::KeyDerivation(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a master key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - Returns a MasterKey derived from the password
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns a validation error if password is empty
/// - Returns a key derivation error if Argon2id parameters are invalid
///
/// # Security
/// - Password is not stored or logged
/// - Memory is zeroized after derivation
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::Validation("Password cannot be empty".to_string()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(key_bytes))
}

/// Produce the verification tag stored in the vault header.
///
/// The tag is a fixed constant sealed under the verification subkey, so a
/// later open can reject a wrong password without touching user data.
/// `context` is authenticated with it; the header passes its own settings
/// so that editing them invalidates the tag.
pub fn verification_tag(key: &MasterKey, context: &[u8]) -> Result<Vec<u8>> {
    let subkey = key.derive_subkey(KeyPurpose::Verification);
    Ok(encrypt_chunk(&subkey, VERIFICATION_CONSTANT, &verification_aad(context))?.to_bytes())
}

/// Check a derived key against a stored verification tag.
///
/// Returns `false` for a wrong key. A malformed tag is also reported as a
/// mismatch; header integrity is checked separately.
pub fn verify_password(key: &MasterKey, tag: &[u8], context: &[u8]) -> bool {
    let Ok(sealed) = SealedChunk::from_bytes(tag) else {
        return false;
    };
    let subkey = key.derive_subkey(KeyPurpose::Verification);
    match decrypt_chunk(&subkey, &sealed, &verification_aad(context)) {
        Ok(plaintext) => plaintext.as_slice().ct_eq(VERIFICATION_CONSTANT).into(),
        Err(_) => false,
    }
}

fn verification_aad(context: &[u8]) -> Vec<u8> {
    let mut aad = VERIFICATION_AAD.to_vec();
    aad.extend_from_slice(context);
    aad
}
