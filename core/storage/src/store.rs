//! Encrypted chunk store with copy-on-write transactions.
//!
//! Every chunk is sealed independently under a purpose subkey with its
//! address as associated data. A [`Txn`] allocates fresh chunks, writes
//! them, and marks superseded chunks as freed; [`ChunkStore::commit`]
//! persists the new free list and then repoints the commit slot. Until the
//! slot write lands nothing the transaction did is visible, so dropping a
//! transaction (or crashing) leaves only unreferenced garbage behind.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::device::BlockDevice;
use crate::layout::{chunk_offset, BootHeader, CommitRecord, DATA_OFFSET};
use openvault_common::{Error, Result};
use openvault_crypto::{
    decrypt_chunk, encrypt_chunk, KeyPurpose, MasterKey, SealedChunk, SubKey, SEAL_OVERHEAD,
};

const CHUNK_AAD: &[u8] = b"openvault/v1/chunk";
const NO_NEXT: u64 = u64::MAX;
/// kind u8 | next u64 | len u32
const FRAME_HEADER: usize = 13;

/// Logical index of a chunk in the chunk area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkAddress(u64);

impl ChunkAddress {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a chunk holds. Stored inside the sealed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Folder record.
    Record,
    /// File content.
    Content,
    /// Persisted free list.
    FreeList,
    /// Vault metadata.
    Meta,
}

impl FrameKind {
    fn tag(&self) -> u8 {
        match self {
            FrameKind::Record => 1,
            FrameKind::Content => 2,
            FrameKind::FreeList => 3,
            FrameKind::Meta => 4,
        }
    }

    fn purpose(&self) -> KeyPurpose {
        match self {
            FrameKind::Content => KeyPurpose::Content,
            _ => KeyPurpose::Metadata,
        }
    }
}

/// Counters describing the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub generation: u64,
    pub chunk_size: u32,
    pub chunk_count: u64,
    pub free_chunks: u64,
    pub file_size: u64,
}

/// Pending changes against the committed state.
///
/// Created by [`ChunkStore::begin`]. Dropping a transaction without
/// committing it discards it.
#[derive(Debug)]
pub struct Txn {
    base_generation: u64,
    /// Next free-list entry to consider for allocation.
    cursor: u64,
    next_new: u64,
    taken: BTreeSet<u64>,
    freed: BTreeSet<u64>,
}

impl Txn {
    /// Addresses allocated so far.
    pub fn allocated(&self) -> usize {
        self.taken.len()
    }

    /// Addresses released so far.
    pub fn released(&self) -> usize {
        self.freed.len()
    }
}

/// Encrypted chunk storage over a block device.
pub struct ChunkStore {
    device: Box<dyn BlockDevice>,
    header: BootHeader,
    metadata_key: SubKey,
    content_key: SubKey,
    committed: CommitRecord,
    free: BTreeSet<u64>,
    free_list_chain: Vec<u64>,
    poisoned: bool,
}

impl ChunkStore {
    /// Initialize a new store on an empty device.
    ///
    /// Writes the boot header and blank commit slots. The store has no
    /// root until the first [`ChunkStore::commit`].
    pub fn create(device: Box<dyn BlockDevice>, header: BootHeader, key: &MasterKey) -> Result<Self> {
        let mut preamble = header.encode()?;
        preamble.resize(DATA_OFFSET as usize, 0);

        device.write_at(0, &preamble)?;
        device.sync()?;

        info!(chunk_size = header.chunk_size, "Initialized chunk store");

        Ok(Self {
            device,
            header,
            metadata_key: key.derive_subkey(KeyPurpose::Metadata),
            content_key: key.derive_subkey(KeyPurpose::Content),
            committed: CommitRecord {
                generation: 0,
                root: NO_NEXT,
                free_list: NO_NEXT,
                meta: NO_NEXT,
                chunk_count: 0,
            },
            free: BTreeSet::new(),
            free_list_chain: Vec::new(),
            poisoned: false,
        })
    }

    /// Open a store whose header has already been read and whose password
    /// has already been verified.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if no commit slot authenticates or
    ///   the free list is damaged
    pub fn open(device: Box<dyn BlockDevice>, header: BootHeader, key: &MasterKey) -> Result<Self> {
        let metadata_key = key.derive_subkey(KeyPurpose::Metadata);
        let committed = CommitRecord::latest(device.as_ref(), &metadata_key)?;

        let required = chunk_offset(committed.chunk_count, header.chunk_size);
        let actual = device.len()?;
        if actual < required {
            return Err(Error::corrupted(format!(
                "Vault file is truncated: {} bytes, committed state needs {}",
                actual, required
            )));
        }

        let mut store = Self {
            device,
            header,
            metadata_key,
            content_key: key.derive_subkey(KeyPurpose::Content),
            committed,
            free: BTreeSet::new(),
            free_list_chain: Vec::new(),
            poisoned: false,
        };

        let (payload, chain) =
            store.read_chain(ChunkAddress(committed.free_list), FrameKind::FreeList)?;
        store.free = decode_free_list(&payload, committed.chunk_count)?;
        store.free_list_chain = chain.iter().map(|a| a.0).collect();

        debug!(
            generation = committed.generation,
            chunks = committed.chunk_count,
            free = store.free.len(),
            "Opened chunk store"
        );

        Ok(store)
    }

    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    /// Root address of the committed state, if anything was committed yet.
    pub fn root(&self) -> Option<ChunkAddress> {
        (self.committed.root != NO_NEXT).then_some(ChunkAddress(self.committed.root))
    }

    /// Metadata chain of the committed state.
    pub fn meta(&self) -> Option<ChunkAddress> {
        (self.committed.meta != NO_NEXT).then_some(ChunkAddress(self.committed.meta))
    }

    pub fn generation(&self) -> u64 {
        self.committed.generation
    }

    /// Payload bytes that fit in one chunk.
    pub fn capacity(&self) -> usize {
        self.header.chunk_size as usize - SEAL_OVERHEAD - FRAME_HEADER
    }

    /// Chunks needed to hold `len` payload bytes.
    pub fn chunks_for(&self, len: usize) -> usize {
        len.div_ceil(self.capacity()).max(1)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            generation: self.committed.generation,
            chunk_size: self.header.chunk_size,
            chunk_count: self.committed.chunk_count,
            free_chunks: self.free.len() as u64,
            file_size: self.device.len()?,
        })
    }

    /// Start a transaction against the committed state.
    ///
    /// # Errors
    /// - Returns an I/O error if an earlier commit failed halfway
    pub fn begin(&self) -> Result<Txn> {
        self.ensure_healthy()?;
        Ok(Txn {
            base_generation: self.committed.generation,
            cursor: 0,
            next_new: self.committed.chunk_count,
            taken: BTreeSet::new(),
            freed: BTreeSet::new(),
        })
    }

    /// Allocate a chunk for the transaction.
    ///
    /// Reuses the lowest committed free address, else extends the chunk
    /// area. Addresses freed by this transaction are not reused by it.
    pub fn allocate(&self, txn: &mut Txn) -> ChunkAddress {
        let address = match self.free.range(txn.cursor..).next() {
            Some(&address) => {
                txn.cursor = address + 1;
                address
            }
            None => {
                let address = txn.next_new;
                txn.next_new += 1;
                address
            }
        };
        txn.taken.insert(address);
        ChunkAddress(address)
    }

    /// Seal and write one frame.
    ///
    /// # Errors
    /// - Returns a validation error if the transaction did not allocate
    ///   `address` or the payload exceeds [`ChunkStore::capacity`]
    pub fn write(
        &self,
        txn: &Txn,
        address: ChunkAddress,
        kind: FrameKind,
        payload: &[u8],
        next: Option<ChunkAddress>,
    ) -> Result<()> {
        if !txn.taken.contains(&address.0) {
            return Err(Error::Validation(format!(
                "Chunk {} is not owned by this transaction",
                address
            )));
        }
        if payload.len() > self.capacity() {
            return Err(Error::Validation(format!(
                "Payload of {} bytes exceeds chunk capacity",
                payload.len()
            )));
        }

        let mut plain = vec![0u8; self.header.chunk_size as usize - SEAL_OVERHEAD];
        plain[0] = kind.tag();
        plain[1..9].copy_from_slice(&next.map(|a| a.0).unwrap_or(NO_NEXT).to_le_bytes());
        plain[9..13].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        plain[FRAME_HEADER..FRAME_HEADER + payload.len()].copy_from_slice(payload);

        let sealed = encrypt_chunk(self.key_for(kind), &plain, &chunk_aad(address))?;
        self.device.write_at(
            chunk_offset(address.0, self.header.chunk_size),
            &sealed.to_bytes(),
        )?;

        debug!(chunk = address.0, kind = ?kind, len = payload.len(), "Wrote chunk");
        Ok(())
    }

    /// Write `data` as a linked chain of fresh chunks.
    ///
    /// Returns every address in chain order; the first is the head.
    pub fn write_chain(&self, txn: &mut Txn, kind: FrameKind, data: &[u8]) -> Result<Vec<ChunkAddress>> {
        let addresses: Vec<ChunkAddress> = (0..self.chunks_for(data.len()))
            .map(|_| self.allocate(txn))
            .collect();
        self.write_chain_into(txn, kind, data, &addresses)?;
        Ok(addresses)
    }

    /// Write `data` across the given addresses, padding with empty frames.
    fn write_chain_into(
        &self,
        txn: &Txn,
        kind: FrameKind,
        data: &[u8],
        addresses: &[ChunkAddress],
    ) -> Result<()> {
        let capacity = self.capacity();
        if data.len() > capacity * addresses.len() {
            return Err(Error::Validation("Chain is too short for its data".to_string()));
        }

        for (i, &address) in addresses.iter().enumerate() {
            let start = (i * capacity).min(data.len());
            let end = ((i + 1) * capacity).min(data.len());
            let next = addresses.get(i + 1).copied();
            self.write(txn, address, kind, &data[start..end], next)?;
        }
        Ok(())
    }

    /// Read and authenticate one frame. Returns its payload and successor.
    ///
    /// # Errors
    /// - I/O error if `address` lies outside the committed chunk area
    /// - Returns `Error::CorruptedVault` if the chunk is cut short, fails
    ///   authentication or holds a different kind of frame
    pub fn read(&self, address: ChunkAddress, kind: FrameKind) -> Result<(Vec<u8>, Option<ChunkAddress>)> {
        if address.0 >= self.committed.chunk_count {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Chunk {} is out of bounds", address),
            )
            .into());
        }

        let mut raw = vec![0u8; self.header.chunk_size as usize];
        self.device
            .read_at(chunk_offset(address.0, self.header.chunk_size), &mut raw)
            .map_err(|e| match e {
                Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Error::corrupted(format!("Chunk {} is truncated", address))
                }
                other => other,
            })?;

        let sealed = SealedChunk::from_bytes(&raw)?;
        let plain = decrypt_chunk(self.key_for(kind), &sealed, &chunk_aad(address))
            .map_err(|_| Error::corrupted(format!("Chunk {} failed authentication", address)))?;

        if plain[0] != kind.tag() {
            return Err(Error::corrupted(format!(
                "Chunk {} holds an unexpected frame kind",
                address
            )));
        }

        let mut next = [0u8; 8];
        next.copy_from_slice(&plain[1..9]);
        let next = u64::from_le_bytes(next);
        let len = u32::from_le_bytes([plain[9], plain[10], plain[11], plain[12]]) as usize;
        if len > self.capacity() {
            return Err(Error::corrupted(format!(
                "Chunk {} has an invalid length",
                address
            )));
        }

        let payload = plain[FRAME_HEADER..FRAME_HEADER + len].to_vec();
        let next = (next != NO_NEXT).then_some(ChunkAddress(next));
        Ok((payload, next))
    }

    /// Read a whole chain. Returns the joined payload and the chain's addresses.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if the chain loops back on itself
    pub fn read_chain(&self, head: ChunkAddress, kind: FrameKind) -> Result<(Vec<u8>, Vec<ChunkAddress>)> {
        let mut data = Vec::new();
        let mut addresses = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(head);

        while let Some(address) = current {
            if !seen.insert(address) {
                return Err(Error::corrupted(format!("Chunk chain loops at {}", address)));
            }
            let (payload, next) = self.read(address, kind)?;
            data.extend_from_slice(&payload);
            addresses.push(address);
            current = next;
        }

        Ok((data, addresses))
    }

    /// Read the given frames in order and join their payloads.
    pub fn read_all(&self, addresses: &[ChunkAddress], kind: FrameKind) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for &address in addresses {
            let (payload, _) = self.read(address, kind)?;
            data.extend_from_slice(&payload);
        }
        Ok(data)
    }

    /// Release a committed chunk once the transaction commits.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if the address is already free or
    ///   was never allocated
    pub fn free(&self, txn: &mut Txn, address: ChunkAddress) -> Result<()> {
        let owned_here = txn.taken.contains(&address.0);
        if !owned_here && address.0 >= self.committed.chunk_count {
            return Err(Error::corrupted(format!(
                "Cannot free unallocated chunk {}",
                address
            )));
        }
        if (!owned_here && self.free.contains(&address.0)) || !txn.freed.insert(address.0) {
            return Err(Error::corrupted(format!("Chunk {} freed twice", address)));
        }
        Ok(())
    }

    pub fn free_all(&self, txn: &mut Txn, addresses: &[ChunkAddress]) -> Result<()> {
        for &address in addresses {
            self.free(txn, address)?;
        }
        Ok(())
    }

    /// Publish the transaction with `root` and `meta` as the new entry points.
    ///
    /// Writes the new free list, syncs, writes the next commit slot and
    /// syncs again. A failure before the slot write leaves the committed
    /// state untouched. A failure during the slot write poisons the store
    /// until it is reopened, since the slot contents are then unknown.
    pub fn commit(&mut self, mut txn: Txn, root: ChunkAddress, meta: ChunkAddress) -> Result<()> {
        self.ensure_healthy()?;
        if txn.base_generation != self.committed.generation {
            return Err(Error::Validation(
                "Transaction was started against an older commit".to_string(),
            ));
        }

        // Reserve the chain first; entries can only shrink by doing so.
        let upper_bound = self.free.len() + txn.freed.len() + self.free_list_chain.len();
        let chain: Vec<ChunkAddress> = (0..self.chunks_for(8 + upper_bound * 8))
            .map(|_| self.allocate(&mut txn))
            .collect();

        let mut entries: BTreeSet<u64> = self.free.difference(&txn.taken).copied().collect();
        entries.extend(txn.freed.iter().copied());
        entries.extend(self.free_list_chain.iter().copied());
        for address in &chain {
            entries.remove(&address.0);
        }

        self.write_chain_into(&txn, FrameKind::FreeList, &encode_free_list(&entries), &chain)?;
        self.device.sync()?;

        let record = CommitRecord {
            generation: self.committed.generation + 1,
            root: root.0,
            free_list: chain[0].0,
            meta: meta.0,
            chunk_count: txn.next_new,
        };

        if let Err(e) = record
            .write(self.device.as_ref(), &self.metadata_key)
            .and_then(|_| self.device.sync())
        {
            warn!(generation = record.generation, "Commit slot write failed, store poisoned");
            self.poisoned = true;
            return Err(e);
        }

        info!(
            generation = record.generation,
            allocated = txn.taken.len(),
            released = txn.freed.len(),
            "Committed"
        );

        self.committed = record;
        self.free = entries;
        self.free_list_chain = chain.iter().map(|a| a.0).collect();
        Ok(())
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.poisoned {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "An earlier commit failed; reopen the vault",
            )
            .into());
        }
        Ok(())
    }

    fn key_for(&self, kind: FrameKind) -> &SubKey {
        match kind.purpose() {
            KeyPurpose::Content => &self.content_key,
            _ => &self.metadata_key,
        }
    }
}

fn chunk_aad(address: ChunkAddress) -> Vec<u8> {
    let mut aad = CHUNK_AAD.to_vec();
    aad.extend_from_slice(&address.0.to_le_bytes());
    aad
}

fn encode_free_list(entries: &BTreeSet<u64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 8);
    out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.to_le_bytes());
    }
    out
}

fn decode_free_list(payload: &[u8], chunk_count: u64) -> Result<BTreeSet<u64>> {
    let word = |i: usize| -> Option<u64> {
        let bytes = payload.get(i * 8..i * 8 + 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    };

    let count = word(0).ok_or_else(|| Error::corrupted("Free list is truncated"))?;
    let mut entries = BTreeSet::new();
    for i in 0..count as usize {
        let entry = word(i + 1).ok_or_else(|| Error::corrupted("Free list is truncated"))?;
        if entry >= chunk_count || !entries.insert(entry) {
            return Err(Error::corrupted("Free list holds an invalid entry"));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDevice;
    use openvault_common::ErrorCode;
    use openvault_crypto::{Compression, KdfParams, Salt};
    use proptest::prelude::*;

    fn master() -> MasterKey {
        MasterKey::from_bytes([7u8; 32])
    }

    fn header() -> BootHeader {
        BootHeader::new(
            4096,
            Compression::None,
            true,
            KdfParams::minimal(),
            &Salt::from_bytes([1u8; 32]),
            &[0u8; 74],
        )
    }

    /// A store with one committed record chain as root.
    fn fresh(device: &MemoryDevice) -> ChunkStore {
        let mut store = ChunkStore::create(Box::new(device.clone()), header(), &master()).unwrap();
        let mut txn = store.begin().unwrap();
        let root = store.write_chain(&mut txn, FrameKind::Record, b"root").unwrap();
        let meta = store.write_chain(&mut txn, FrameKind::Meta, b"meta").unwrap();
        store.commit(txn, root[0], meta[0]).unwrap();
        store
    }

    fn reopen(device: &MemoryDevice) -> ChunkStore {
        ChunkStore::open(Box::new(device.clone()), header(), &master()).unwrap()
    }

    #[test]
    fn test_fresh_store_reopens() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        assert_eq!(store.generation(), 1);

        let reopened = reopen(&device);
        assert_eq!(reopened.generation(), 1);
        let (root, _) = reopened
            .read_chain(reopened.root().unwrap(), FrameKind::Record)
            .unwrap();
        assert_eq!(root, b"root");
        let (meta, _) = reopened
            .read_chain(reopened.meta().unwrap(), FrameKind::Meta)
            .unwrap();
        assert_eq!(meta, b"meta");
    }

    #[test]
    fn test_multi_chunk_chain() {
        let device = MemoryDevice::new();
        let mut store = fresh(&device);
        let data: Vec<u8> = (0..store.capacity() * 3 + 17).map(|i| i as u8).collect();

        let mut txn = store.begin().unwrap();
        let chain = store.write_chain(&mut txn, FrameKind::Record, &data).unwrap();
        assert_eq!(chain.len(), 4);
        let meta = store.meta().unwrap();
        store.commit(txn, chain[0], meta).unwrap();

        let (read, addresses) = store.read_chain(chain[0], FrameKind::Record).unwrap();
        assert_eq!(read, data);
        assert_eq!(addresses, chain);
    }

    #[test]
    fn test_kind_mismatch_is_corruption() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let err = store.read(store.meta().unwrap(), FrameKind::Record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_out_of_bounds_read_is_io_error() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let err = store.read(ChunkAddress::new(1000), FrameKind::Record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
    }

    #[test]
    fn test_truncated_device_is_corruption() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let root = store.root().unwrap();
        device.tamper(|bytes| bytes.truncate(DATA_OFFSET as usize + 100));

        let err = store.read(root, FrameKind::Record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);

        let err = ChunkStore::open(Box::new(device.clone()), header(), &master())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_tampered_chunk_is_corruption() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let root = store.root().unwrap();
        let offset = chunk_offset(root.index(), 4096) as usize + 40;
        device.tamper(|bytes| bytes[offset] ^= 0x55);

        let err = store.read(root, FrameKind::Record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_chunks_are_bound_to_their_address() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let root = store.root().unwrap().index() as usize;
        let meta = store.meta().unwrap();

        // Copy the root chunk over the meta chunk.
        device.tamper(|bytes| {
            let src = DATA_OFFSET as usize + root * 4096;
            let dst = DATA_OFFSET as usize + meta.index() as usize * 4096;
            let chunk = bytes[src..src + 4096].to_vec();
            bytes[dst..dst + 4096].copy_from_slice(&chunk);
        });

        let err = store.read(meta, FrameKind::Record).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_write_requires_ownership() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let txn = store.begin().unwrap();
        let err = store
            .write(&txn, store.root().unwrap(), FrameKind::Record, b"x", None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_freed_chunks_are_reused_after_commit() {
        let device = MemoryDevice::new();
        let mut store = fresh(&device);
        let old_root = store.root().unwrap();
        let meta = store.meta().unwrap();

        let mut txn = store.begin().unwrap();
        let new_root = store.write_chain(&mut txn, FrameKind::Record, b"v2").unwrap();
        store.free(&mut txn, old_root).unwrap();
        assert_ne!(new_root[0], old_root);
        store.commit(txn, new_root[0], meta).unwrap();

        let mut txn = store.begin().unwrap();
        let reused = store.allocate(&mut txn);
        assert!(reused.index() < store.stats().unwrap().chunk_count);

        // The free list survives a reopen.
        let reopened = reopen(&device);
        assert_eq!(
            reopened.stats().unwrap().free_chunks,
            store.stats().unwrap().free_chunks
        );
    }

    #[test]
    fn test_double_free_is_rejected() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let root = store.root().unwrap();

        let mut txn = store.begin().unwrap();
        store.free(&mut txn, root).unwrap();
        let err = store.free(&mut txn, root).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedVault);
    }

    #[test]
    fn test_dropped_txn_changes_nothing() {
        let device = MemoryDevice::new();
        let store = fresh(&device);
        let before = store.stats().unwrap();

        let mut txn = store.begin().unwrap();
        store.write_chain(&mut txn, FrameKind::Record, b"abandoned").unwrap();
        drop(txn);

        let reopened = reopen(&device);
        assert_eq!(reopened.generation(), before.generation);
        assert_eq!(reopened.stats().unwrap().chunk_count, before.chunk_count);
    }

    #[test]
    fn test_failure_before_slot_keeps_old_state() {
        let device = MemoryDevice::new();
        let mut store = fresh(&device);
        let meta = store.meta().unwrap();

        device.fail_writes_after(1);
        let mut txn = store.begin().unwrap();
        let root = store.write_chain(&mut txn, FrameKind::Record, b"v2").unwrap();
        assert!(store.commit(txn, root[0], meta).is_err());
        assert!(!store.is_poisoned());
        assert_eq!(store.generation(), 1);

        device.heal();
        let reopened = reopen(&device);
        let (data, _) = reopened
            .read_chain(reopened.root().unwrap(), FrameKind::Record)
            .unwrap();
        assert_eq!(data, b"root");
    }

    #[test]
    fn test_slot_failure_poisons_store() {
        let device = MemoryDevice::new();
        let mut store = fresh(&device);
        let meta = store.meta().unwrap();

        let mut txn = store.begin().unwrap();
        let root = store.write_chain(&mut txn, FrameKind::Record, b"v2").unwrap();
        // The free-list chunk lands; the slot write does not.
        device.fail_writes_after(1);
        let err = store.commit(txn, root[0], meta).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(store.is_poisoned());
        assert_eq!(store.begin().unwrap_err().code(), ErrorCode::IoError);

        device.heal();
        let reopened = reopen(&device);
        assert!(!reopened.is_poisoned());
        assert_eq!(reopened.generation(), 1);
    }

    #[test]
    fn test_large_free_list_spans_chunks() {
        let device = MemoryDevice::new();
        let mut store = fresh(&device);
        let meta = store.meta().unwrap();
        let old_root = store.root().unwrap();

        // Enough chunks that freeing them overflows one free-list chunk.
        let count = store.capacity() / 8 + 10;
        let mut txn = store.begin().unwrap();
        let blob = vec![0xAB; store.capacity() * count];
        let chain = store.write_chain(&mut txn, FrameKind::Record, &blob).unwrap();
        store.free(&mut txn, old_root).unwrap();
        store.commit(txn, chain[0], meta).unwrap();

        let mut txn = store.begin().unwrap();
        let root = store.write_chain(&mut txn, FrameKind::Record, b"small").unwrap();
        store.free_all(&mut txn, &chain).unwrap();
        store.commit(txn, root[0], meta).unwrap();

        let reopened = reopen(&device);
        assert!(reopened.stats().unwrap().free_chunks >= count as u64);
        assert_eq!(reopened.free_list_chain, store.free_list_chain);
        assert!(reopened.free_list_chain.len() > 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_no_address_is_free_and_live(ops in proptest::collection::vec(1usize..6, 1..12)) {
            let device = MemoryDevice::new();
            let mut store = fresh(&device);
            let meta = store.meta().unwrap();
            let mut live: Vec<ChunkAddress> = vec![store.root().unwrap()];

            for size in ops {
                let mut txn = store.begin().unwrap();
                let chain = store
                    .write_chain(&mut txn, FrameKind::Record, &vec![1u8; store.capacity() * size])
                    .unwrap();
                store.free_all(&mut txn, &live).unwrap();
                store.commit(txn, chain[0], meta).unwrap();
                live = chain;

                let reopened = reopen(&device);
                for address in &live {
                    prop_assert!(!reopened.free.contains(&address.index()));
                }
                prop_assert!(!reopened.free.contains(&meta.index()));
                for address in &reopened.free_list_chain {
                    prop_assert!(!reopened.free.contains(address));
                }
            }
        }
    }
}
