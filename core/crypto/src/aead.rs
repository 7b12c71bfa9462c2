//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Every chunk
//! gets a fresh nonce on every write, and the associated data binds the
//! ciphertext to where it lives so chunks cannot be swapped around.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, AeadCore, AeadInPlace, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::SubKey;
use openvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Bytes added to a plaintext by sealing it.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// A sealed chunk: nonce, ciphertext and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChunk {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl SealedChunk {
    /// Physical length of this chunk.
    pub fn len(&self) -> usize {
        SEAL_OVERHEAD + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Serialize as `nonce || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse `nonce || ciphertext || tag`.
    ///
    /// # Errors
    /// - Returns an authentication error if the input is shorter than the overhead
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEAL_OVERHEAD {
            return Err(Error::Authentication);
        }
        let (nonce, rest) = bytes.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

        let mut sealed = Self {
            nonce: [0u8; NONCE_SIZE],
            ciphertext: ciphertext.to_vec(),
            tag: [0u8; TAG_SIZE],
        };
        sealed.nonce.copy_from_slice(nonce);
        sealed.tag.copy_from_slice(tag);
        Ok(sealed)
    }
}

/// Seal a plaintext under `key` with a fresh random nonce.
///
/// # Postconditions
/// - The ciphertext length equals the plaintext length
/// - `associated_data` is authenticated but not stored
///
/// # Errors
/// - Returns a crypto error if the cipher refuses the input
pub fn encrypt_chunk(key: &SubKey, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedChunk> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, associated_data, &mut buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = SealedChunk {
        nonce: [0u8; NONCE_SIZE],
        ciphertext: buffer,
        tag: [0u8; TAG_SIZE],
    };
    sealed.nonce.copy_from_slice(&nonce);
    sealed.tag.copy_from_slice(&tag);
    Ok(sealed)
}

/// Open a sealed chunk.
///
/// # Errors
/// - Returns `Error::Authentication` if the tag does not verify for this
///   key and associated data
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn decrypt_chunk(key: &SubKey, sealed: &SealedChunk, associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&sealed.nonce),
            associated_data,
            &mut buffer,
            GenericArray::from_slice(&sealed.tag),
        )
        .map_err(|_| Error::Authentication)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPurpose, MasterKey};
    use proptest::prelude::*;

    fn key(byte: u8) -> SubKey {
        MasterKey::from_bytes([byte; 32]).derive_subkey(KeyPurpose::Content)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = key(42);
        let sealed = encrypt_chunk(&key, b"Hello, World!", b"chunk-7").unwrap();
        assert_eq!(sealed.ciphertext.len(), 13);

        let decrypted = decrypt_chunk(&key, &sealed, b"chunk-7").unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt_chunk(&key(1), b"secret", b"ad").unwrap();
        assert!(matches!(
            decrypt_chunk(&key(2), &sealed, b"ad"),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_wrong_associated_data_fails() {
        let key = key(3);
        let sealed = encrypt_chunk(&key, b"secret", b"chunk-1").unwrap();
        assert!(decrypt_chunk(&key, &sealed, b"chunk-2").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = key(4);
        let mut sealed = encrypt_chunk(&key, b"secret data", b"").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(decrypt_chunk(&key, &sealed, b"").is_err());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = key(5);
        let a = encrypt_chunk(&key, b"same", b"").unwrap();
        let b = encrypt_chunk(&key, b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_from_bytes_rejects_short_input() {
        assert!(SealedChunk::from_bytes(&[0u8; SEAL_OVERHEAD - 1]).is_err());
        let empty = SealedChunk::from_bytes(&[0u8; SEAL_OVERHEAD]).unwrap();
        assert!(empty.is_empty());
    }

    proptest! {
        #[test]
        fn prop_sealed_bytes_open(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = key(9);
            let bytes = encrypt_chunk(&key, &data, b"ad").unwrap().to_bytes();
            prop_assert_eq!(bytes.len(), data.len() + SEAL_OVERHEAD);
            let sealed = SealedChunk::from_bytes(&bytes).unwrap();
            prop_assert_eq!(decrypt_chunk(&key, &sealed, b"ad").unwrap(), data);
        }
    }
}
