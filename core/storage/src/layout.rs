//! On-disk layout: boot header, commit slots and chunk area offsets.
//!
//! ```text
//! 0      boot header block (1 KiB, plaintext, written once)
//! 1024   commit slot 0 (256 B, sealed)
//! 1280   commit slot 1 (256 B, sealed)
//! 4096   chunk 0, chunk 1, ... (chunk_size each)
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::device::BlockDevice;
use openvault_common::{Error, Result};
use openvault_crypto::{
    decrypt_chunk, encrypt_chunk, Compression, KdfParams, Salt, SealedChunk, SubKey,
    SEAL_OVERHEAD,
};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

pub const MAGIC: &[u8; 8] = b"OPNVAULT";
pub const HEADER_SIZE: usize = 1024;
pub const SLOT_SIZE: usize = 256;
pub const SLOT_OFFSETS: [u64; 2] = [1024, 1024 + SLOT_SIZE as u64];
pub const DATA_OFFSET: u64 = 4096;

pub const MIN_CHUNK_SIZE: u32 = 4 * 1024;
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024;

/// magic | json length u32 | crc32 u32
const HEADER_PREFIX: usize = MAGIC.len() + 8;
const SLOT_PAYLOAD: usize = 40;
const SLOT_AAD: &[u8] = b"openvault/v1/slot";

/// Plaintext vault header.
///
/// Holds everything needed to derive the key and check the password, plus
/// the settings fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootHeader {
    pub version: u32,
    pub chunk_size: u32,
    pub compression: Compression,
    pub case_sensitive: bool,
    pub kdf: KdfParams,
    /// Base64 KDF salt.
    pub salt: String,
    /// Base64 sealed verification constant.
    pub verification: String,
}

impl BootHeader {
    pub fn new(
        chunk_size: u32,
        compression: Compression,
        case_sensitive: bool,
        kdf: KdfParams,
        salt: &Salt,
        verification: &[u8],
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            chunk_size,
            compression,
            case_sensitive,
            kdf,
            salt: BASE64.encode(salt.as_bytes()),
            verification: BASE64.encode(verification),
        }
    }

    pub fn salt(&self) -> Result<Salt> {
        BASE64
            .decode(&self.salt)
            .ok()
            .and_then(|bytes| Salt::from_slice(&bytes))
            .ok_or_else(|| Error::NotAVault("Header salt is malformed".to_string()))
    }

    pub fn verification_tag(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.verification)
            .map_err(|_| Error::NotAVault("Header verification tag is malformed".to_string()))
    }

    /// Store the verification tag produced over [`BootHeader::binding`].
    pub fn set_verification_tag(&mut self, tag: &[u8]) {
        self.verification = BASE64.encode(tag);
    }

    /// Bytes authenticated together with the verification tag: the header
    /// JSON with the tag itself left empty.
    pub fn binding(&self) -> Result<Vec<u8>> {
        let unsigned = Self {
            verification: String::new(),
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize into a full header block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json =
            serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if HEADER_PREFIX + json.len() > HEADER_SIZE {
            return Err(Error::Serialization("Boot header too large".to_string()));
        }

        let mut block = vec![0u8; HEADER_SIZE];
        block[..MAGIC.len()].copy_from_slice(MAGIC);
        block[8..12].copy_from_slice(&(json.len() as u32).to_le_bytes());
        block[12..16].copy_from_slice(&crc32fast::hash(&json).to_le_bytes());
        block[HEADER_PREFIX..HEADER_PREFIX + json.len()].copy_from_slice(&json);
        Ok(block)
    }

    /// Parse a header block.
    ///
    /// # Errors
    /// - Returns `Error::NotAVault` on bad magic, checksum, JSON, version,
    ///   an unsupported chunk size or KDF costs above the ceilings
    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < HEADER_SIZE || &block[..MAGIC.len()] != MAGIC {
            return Err(Error::NotAVault("Missing vault signature".to_string()));
        }

        let len = u32::from_le_bytes([block[8], block[9], block[10], block[11]]) as usize;
        let crc = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);
        if HEADER_PREFIX + len > HEADER_SIZE {
            return Err(Error::NotAVault("Header length out of range".to_string()));
        }

        let json = &block[HEADER_PREFIX..HEADER_PREFIX + len];
        if crc32fast::hash(json) != crc {
            return Err(Error::NotAVault("Header checksum mismatch".to_string()));
        }

        let header: BootHeader = serde_json::from_slice(json)
            .map_err(|e| Error::NotAVault(format!("Header is unreadable: {}", e)))?;

        if header.version != FORMAT_VERSION {
            return Err(Error::NotAVault(format!(
                "Unsupported format version {}",
                header.version
            )));
        }
        if !valid_chunk_size(header.chunk_size) {
            return Err(Error::NotAVault(format!(
                "Unsupported chunk size {}",
                header.chunk_size
            )));
        }
        if !header.kdf.within_limits() {
            return Err(Error::NotAVault(format!(
                "KDF costs out of range (memory {} KiB, time {}, parallelism {})",
                header.kdf.memory_cost, header.kdf.time_cost, header.kdf.parallelism
            )));
        }

        Ok(header)
    }

    /// Read and parse the header of a device.
    pub fn read(device: &dyn BlockDevice) -> Result<Self> {
        if device.len()? < DATA_OFFSET {
            return Err(Error::NotAVault("File is too small".to_string()));
        }
        let mut block = vec![0u8; HEADER_SIZE];
        device.read_at(0, &mut block)?;
        Self::decode(&block)
    }
}

/// Chunk sizes the format accepts: powers of two from 4 KiB to 64 KiB.
pub fn valid_chunk_size(size: u32) -> bool {
    size.is_power_of_two() && (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size)
}

/// Byte offset of a chunk.
pub fn chunk_offset(address: u64, chunk_size: u32) -> u64 {
    DATA_OFFSET + address * chunk_size as u64
}

/// Contents of a commit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub generation: u64,
    pub root: u64,
    pub free_list: u64,
    pub meta: u64,
    pub chunk_count: u64,
}

impl CommitRecord {
    /// Slot this record is written to.
    pub fn slot(&self) -> usize {
        (self.generation % 2) as usize
    }

    fn to_bytes(self) -> [u8; SLOT_PAYLOAD] {
        let mut out = [0u8; SLOT_PAYLOAD];
        for (i, value) in [
            self.generation,
            self.root,
            self.free_list,
            self.meta,
            self.chunk_count,
        ]
        .iter()
        .enumerate()
        {
            out[i * 8..i * 8 + 8].copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SLOT_PAYLOAD {
            return None;
        }
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(buf)
        };
        Some(Self {
            generation: field(0),
            root: field(1),
            free_list: field(2),
            meta: field(3),
            chunk_count: field(4),
        })
    }

    /// Seal and write this record into its slot. Does not sync.
    pub fn write(&self, device: &dyn BlockDevice, key: &SubKey) -> Result<()> {
        let slot = self.slot();
        let sealed = encrypt_chunk(key, &self.to_bytes(), &slot_aad(slot))?.to_bytes();

        let mut block = vec![0u8; SLOT_SIZE];
        block[..sealed.len()].copy_from_slice(&sealed);
        device.write_at(SLOT_OFFSETS[slot], &block)
    }

    /// Read one slot. `None` if it is empty, torn or does not authenticate.
    pub fn read(device: &dyn BlockDevice, key: &SubKey, slot: usize) -> Result<Option<Self>> {
        let mut block = vec![0u8; SLOT_SIZE];
        device.read_at(SLOT_OFFSETS[slot], &mut block)?;

        let sealed = SealedChunk::from_bytes(&block[..SEAL_OVERHEAD + SLOT_PAYLOAD])?;
        let record = decrypt_chunk(key, &sealed, &slot_aad(slot))
            .ok()
            .and_then(|plain| Self::from_bytes(&plain))
            .filter(|record| record.slot() == slot);
        Ok(record)
    }

    /// The newest slot that authenticates.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if neither slot is readable
    pub fn latest(device: &dyn BlockDevice, key: &SubKey) -> Result<Self> {
        let a = Self::read(device, key, 0)?;
        let b = Self::read(device, key, 1)?;
        match (a, b) {
            (Some(a), Some(b)) => Ok(if a.generation >= b.generation { a } else { b }),
            (Some(only), None) | (None, Some(only)) => {
                tracing::warn!(
                    generation = only.generation,
                    "Only one commit slot is valid, using it"
                );
                Ok(only)
            }
            (None, None) => Err(Error::corrupted("No valid commit slot")),
        }
    }
}

fn slot_aad(slot: usize) -> Vec<u8> {
    let mut aad = SLOT_AAD.to_vec();
    aad.push(slot as u8);
    aad
}
