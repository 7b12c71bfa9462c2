//! Cryptographic primitives for OpenVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - A purpose-separated key hierarchy derived with BLAKE2b
//! - Per-chunk authenticated encryption using XChaCha20-Poly1305
//! - Password verification tags
//! - Optional zstd compression of file content
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison of verification plaintext

pub mod aead;
pub mod compress;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt_chunk, encrypt_chunk, SealedChunk, NONCE_SIZE, SEAL_OVERHEAD, TAG_SIZE};
pub use compress::Compression;
pub use kdf::{
    derive_key, verification_tag, verify_password, KdfParams, MAX_MEMORY_COST, MAX_PARALLELISM,
    MAX_TIME_COST,
};
pub use keys::{content_digest, KeyPurpose, MasterKey, Salt, SubKey, KEY_LENGTH, SALT_LENGTH};
