//! Vault engine for OpenVault.
//!
//! This module provides:
//! - The hierarchy index: folders and files over the chunk store
//! - Vault creation, unlocking and offline compaction
//! - Sessions that serialize access to an open vault
//! - The command façade used by the desktop shell
//!
//! # Architecture
//! The vault module sits between the front ends and the chunk store.
//! Every mutation is a copy-on-write update published by a single commit,
//! so a failed or interrupted command leaves the vault as it was.

pub mod config;
pub mod contracts;
pub mod facade;
pub mod index;
pub mod manager;
pub mod operations;
pub mod session;
pub mod tree;

pub use config::{VaultMeta, VaultOptions, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN};
pub use contracts::{BrowseResult, Envelope, ErrorBody, FileItem, FolderItem};
pub use facade::CommandFacade;
pub use index::{FileSummary, FolderSummary, HierarchyIndex, IndexStats, Listing};
pub use manager::{create_index, open_index, CompactionReport, VaultManager};
pub use operations::VaultOperations;
pub use session::{SessionHandle, SessionState, VaultSession};
pub use tree::{FileNode, FolderNode, Node};
