//! Chunk storage for OpenVault.
//!
//! A vault is a single file holding a plaintext boot header, two sealed
//! commit slots and an area of fixed-size encrypted chunks. This crate
//! owns that layout: it allocates, seals, reads and frees chunks, keeps
//! the free list, and publishes each transaction with one commit-slot write.
//!
//! # Design Principles
//! - Copy-on-write: a committed chunk is never overwritten while referenced
//! - Single commit point: nothing a transaction wrote is visible before its slot write
//! - Device isolation: the store sees bytes through [`BlockDevice`] only

pub mod device;
pub mod file;
pub mod layout;
pub mod memory;
pub mod store;

pub use device::BlockDevice;
pub use file::FileDevice;
pub use layout::{BootHeader, FORMAT_VERSION};
pub use memory::MemoryDevice;
pub use store::{ChunkAddress, ChunkStore, FrameKind, StoreStats, Txn};
