//! Node model of the vault hierarchy and its persisted records.
//!
//! In memory every folder and file is a [`Node`] keyed by [`NodeId`]. On
//! disk each folder is one [`FolderRecord`] chain listing its direct
//! children; a child folder's entry points at that folder's own record
//! chain, so the whole tree hangs off the root record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MAX_NAME_LEN;
use openvault_common::{Error, ItemType, NodeId, Result};
use openvault_crypto::Compression;
use openvault_storage::ChunkAddress;

/// A folder in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub id: NodeId,
    /// `None` only for the root.
    pub parent: Option<NodeId>,
    pub name: String,
    /// Direct children, folders and files alike.
    pub children: Vec<NodeId>,
    /// Chunks currently holding this folder's record.
    pub record: Vec<ChunkAddress>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A file in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub id: NodeId,
    pub parent: NodeId,
    /// Base name without the extension.
    pub name: String,
    /// Extension without the leading dot; may be empty.
    pub extension: String,
    /// Plaintext size.
    pub size: u64,
    /// Size after compression, as stored in chunks.
    pub stored_size: u64,
    pub compression: Compression,
    /// Base64 BLAKE2b digest of the plaintext.
    pub digest: String,
    pub chunks: Vec<ChunkAddress>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileNode {
    /// Name as shown to users: `name.extension`, or just `name`.
    pub fn display_name(&self) -> String {
        display_name(&self.name, &self.extension)
    }
}

/// A node of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Folder(FolderNode),
    File(FileNode),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Folder(folder) => folder.id,
            Node::File(file) => file.id,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Folder(folder) => folder.parent,
            Node::File(file) => Some(file.parent),
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Node::Folder(_) => ItemType::Folder,
            Node::File(_) => ItemType::File,
        }
    }

    /// Name used for sibling uniqueness and path lookup.
    pub fn display_name(&self) -> String {
        match self {
            Node::Folder(folder) => folder.name.clone(),
            Node::File(file) => file.display_name(),
        }
    }

    pub fn as_folder(&self) -> Option<&FolderNode> {
        match self {
            Node::Folder(folder) => Some(folder),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(file) => Some(file),
            Node::Folder(_) => None,
        }
    }
}

/// Persisted form of one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: NodeId,
    pub folders: Vec<FolderEntry>,
    pub files: Vec<FileEntry>,
}

/// A child folder as listed in its parent's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub id: NodeId,
    pub name: String,
    /// Head of the child's own record chain.
    pub record: ChunkAddress,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A file as listed in its parent's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: NodeId,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub stored_size: u64,
    pub compression: Compression,
    pub digest: String,
    pub chunks: Vec<ChunkAddress>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileEntry {
    pub fn from_node(file: &FileNode) -> Self {
        Self {
            id: file.id,
            name: file.name.clone(),
            extension: file.extension.clone(),
            size: file.size,
            stored_size: file.stored_size,
            compression: file.compression,
            digest: file.digest.clone(),
            chunks: file.chunks.clone(),
            created_at: file.created_at,
            modified_at: file.modified_at,
        }
    }

    pub fn into_node(self, parent: NodeId) -> FileNode {
        FileNode {
            id: self.id,
            parent,
            name: self.name,
            extension: self.extension,
            size: self.size,
            stored_size: self.stored_size,
            compression: self.compression,
            digest: self.digest,
            chunks: self.chunks,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

impl FolderRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::corrupted(format!("Folder record is unreadable: {}", e)))
    }
}

/// Trim and check a folder name or file base name.
///
/// # Errors
/// - Validation error if the name is empty, `.` or `..`, contains a path
///   separator or NUL, or exceeds 255 bytes
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::Validation("Name cannot be empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::Validation(format!("Name {:?} is reserved", name)));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::Validation(format!(
            "Name {:?} contains a path separator or NUL",
            name
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "Name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Trim and check a file extension. An empty extension is allowed.
pub fn normalize_extension(raw: &str) -> Result<String> {
    let extension = raw.trim().trim_start_matches('.');
    if extension.contains(['/', '\\', '\0', '.']) {
        return Err(Error::Validation(format!(
            "Invalid extension {:?}",
            raw
        )));
    }
    Ok(extension.to_string())
}

pub fn display_name(name: &str, extension: &str) -> String {
    if extension.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, extension)
    }
}

/// Split a file name into base name and extension at the last dot.
///
/// A leading dot does not start an extension, so `.env` has none.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < file_name.len() => {
            (&file_name[..pos], &file_name[pos + 1..])
        }
        _ => (file_name, ""),
    }
}

/// Key under which a display name must be unique among its siblings.
pub fn name_key(display: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        display.to_string()
    } else {
        display.to_lowercase()
    }
}
