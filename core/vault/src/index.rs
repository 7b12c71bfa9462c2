//! Hierarchy index: the folder/file tree of an open vault.
//!
//! The full tree of folder records is loaded when the vault opens; file
//! content stays on disk until read. Every mutation is copy-on-write:
//! changes are staged against the live tree, new records are written for
//! the changed folder and each of its ancestors, superseded chunks are
//! released, and a single commit repoints the root. The in-memory tree is
//! updated only after that commit succeeds, so a failed mutation leaves
//! both the file and the index exactly as they were.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::config::{VaultMeta, MAX_NAME_LEN};
use crate::tree::{
    display_name, name_key, normalize_extension, normalize_name, split_extension, FileEntry,
    FileNode, FolderEntry, FolderNode, FolderRecord, Node,
};
use openvault_common::{Error, ItemType, NodeId, Result, VaultPath};
use openvault_crypto::{content_digest, Compression};
use openvault_storage::{ChunkAddress, ChunkStore, FrameKind, StoreStats, Txn};

/// A child folder as listed by [`HierarchyIndex::browse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub id: NodeId,
    pub name: String,
    /// Live count of direct children.
    pub item_count: usize,
}

/// A file as listed by [`HierarchyIndex::browse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: NodeId,
    /// Base name without the extension.
    pub name: String,
    pub size: u64,
    pub extension: String,
}

/// Direct children of a folder, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub folders: Vec<FolderSummary>,
    pub files: Vec<FileSummary>,
}

/// Counters for `info`-style reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Folders, not counting the root.
    pub folders: usize,
    pub files: usize,
    /// Plaintext bytes across all files.
    pub total_bytes: u64,
    /// Bytes actually stored after compression.
    pub stored_bytes: u64,
    pub store: StoreStats,
}

/// Read access to nodes, either live or staged.
trait NodeLookup {
    fn lookup(&self, id: NodeId) -> Option<&Node>;
}

impl NodeLookup for HashMap<NodeId, Node> {
    fn lookup(&self, id: NodeId) -> Option<&Node> {
        self.get(&id)
    }
}

/// Pending node changes layered over the live tree.
struct Staged<'a> {
    base: &'a HashMap<NodeId, Node>,
    changes: HashMap<NodeId, Option<Node>>,
}

impl<'a> Staged<'a> {
    fn new(base: &'a HashMap<NodeId, Node>) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if !self.changes.contains_key(&id) {
            let node = self.base.get(&id)?.clone();
            self.changes.insert(id, Some(node));
        }
        self.changes.get_mut(&id)?.as_mut()
    }

    fn folder_mut(&mut self, id: NodeId) -> Result<&mut FolderNode> {
        match self.get_mut(id) {
            Some(Node::Folder(folder)) => Ok(folder),
            _ => Err(Error::corrupted(format!("Staged folder {} is missing", id))),
        }
    }

    fn insert(&mut self, node: Node) {
        self.changes.insert(node.id(), Some(node));
    }

    fn remove(&mut self, id: NodeId) {
        self.changes.insert(id, None);
    }

    fn into_changes(self) -> HashMap<NodeId, Option<Node>> {
        self.changes
    }
}

impl NodeLookup for Staged<'_> {
    fn lookup(&self, id: NodeId) -> Option<&Node> {
        match self.changes.get(&id) {
            Some(change) => change.as_ref(),
            None => self.base.get(&id),
        }
    }
}

/// The open vault's hierarchy over its chunk store.
pub struct HierarchyIndex {
    store: ChunkStore,
    nodes: HashMap<NodeId, Node>,
    meta: VaultMeta,
}

impl HierarchyIndex {
    /// Initialize an empty hierarchy on a freshly created store.
    ///
    /// Writes the vault metadata and an empty root record in the first commit.
    pub fn create(mut store: ChunkStore, meta: VaultMeta) -> Result<Self> {
        let mut txn = store.begin()?;
        let meta_chain = store.write_chain(&mut txn, FrameKind::Meta, &meta.to_bytes()?)?;

        let root_record = FolderRecord {
            id: NodeId::ROOT,
            folders: Vec::new(),
            files: Vec::new(),
        };
        let root_chain = store.write_chain(&mut txn, FrameKind::Record, &root_record.to_bytes()?)?;
        store.commit(txn, root_chain[0], meta_chain[0])?;

        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::ROOT,
            Node::Folder(FolderNode {
                id: NodeId::ROOT,
                parent: None,
                name: String::new(),
                children: Vec::new(),
                record: root_chain,
                created_at: meta.created_at,
                modified_at: meta.created_at,
            }),
        );

        Ok(Self { store, nodes, meta })
    }

    /// Load the whole hierarchy from a store.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if any record fails to authenticate
    ///   or parse, or the records do not form a tree
    pub fn load(store: ChunkStore) -> Result<Self> {
        let root_head = store
            .root()
            .ok_or_else(|| Error::corrupted("Vault has no root record"))?;
        let meta_head = store
            .meta()
            .ok_or_else(|| Error::corrupted("Vault has no metadata record"))?;
        let meta = VaultMeta::from_bytes(&store.read_chain(meta_head, FrameKind::Meta)?.0)?;

        let mut nodes: HashMap<NodeId, Node> = HashMap::new();
        let mut pending = vec![(
            NodeId::ROOT,
            None,
            String::new(),
            root_head,
            meta.created_at,
            meta.created_at,
        )];

        while let Some((id, parent, name, head, created_at, modified_at)) = pending.pop() {
            if nodes.contains_key(&id) {
                return Err(Error::corrupted(format!("Folder {} is linked twice", id)));
            }

            let (bytes, record_chain) = store.read_chain(head, FrameKind::Record)?;
            let record = FolderRecord::from_bytes(&bytes)?;
            if record.id != id {
                return Err(Error::corrupted(format!(
                    "Record at {} belongs to {}, expected {}",
                    head, record.id, id
                )));
            }

            let mut children = Vec::with_capacity(record.folders.len() + record.files.len());
            for entry in record.folders {
                children.push(entry.id);
                pending.push((
                    entry.id,
                    Some(id),
                    entry.name,
                    entry.record,
                    entry.created_at,
                    entry.modified_at,
                ));
            }
            for entry in record.files {
                children.push(entry.id);
                let file = entry.into_node(id);
                if nodes.insert(file.id, Node::File(file)).is_some() {
                    return Err(Error::corrupted("File is linked twice"));
                }
            }

            nodes.insert(
                id,
                Node::Folder(FolderNode {
                    id,
                    parent,
                    name,
                    children,
                    record: record_chain,
                    created_at,
                    modified_at,
                }),
            );
        }

        let index = Self { store, nodes, meta };
        index.check_invariants()?;
        debug!(nodes = index.nodes.len(), "Loaded hierarchy");
        Ok(index)
    }

    pub fn meta(&self) -> &VaultMeta {
        &self.meta
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn case_sensitive(&self) -> bool {
        self.store.header().case_sensitive
    }

    fn compression(&self) -> Compression {
        self.store.header().compression
    }

    fn folder(&self, id: NodeId) -> Result<&FolderNode> {
        self.nodes
            .get(&id)
            .and_then(Node::as_folder)
            .ok_or_else(|| Error::NotFound(format!("Folder {} not found", id)))
    }

    fn node_of_type(&self, id: NodeId, item_type: ItemType) -> Result<&Node> {
        self.nodes
            .get(&id)
            .filter(|node| node.item_type() == item_type)
            .ok_or_else(|| Error::NotFound(format!("No {} with id {}", item_type, id)))
    }

    fn meta_head(&self) -> Result<ChunkAddress> {
        self.store
            .meta()
            .ok_or_else(|| Error::corrupted("Vault has no metadata record"))
    }

    /// Child of `parent` whose display name matches under the vault's case policy.
    pub fn find_child(&self, parent: NodeId, display: &str) -> Option<&Node> {
        let key = name_key(display, self.case_sensitive());
        let folder = self.nodes.get(&parent)?.as_folder()?;
        folder
            .children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .find(|node| name_key(&node.display_name(), self.case_sensitive()) == key)
    }

    fn ensure_name_free(&self, parent: NodeId, display: &str, exclude: Option<NodeId>) -> Result<()> {
        self.folder(parent)?;
        if display.len() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "Name exceeds {} bytes",
                MAX_NAME_LEN
            )));
        }
        match self.find_child(parent, display) {
            Some(existing) if Some(existing.id()) != exclude => Err(Error::Validation(format!(
                "An item named {:?} already exists here",
                display
            ))),
            _ => Ok(()),
        }
    }

    /// List the direct children of a folder.
    ///
    /// # Errors
    /// - Not found if `id` is unknown or names a file
    pub fn browse(&self, id: NodeId) -> Result<Listing> {
        let folder = self.folder(id)?;
        let mut listing = Listing::default();

        for child in &folder.children {
            match self.nodes.get(child) {
                Some(Node::Folder(sub)) => listing.folders.push(FolderSummary {
                    id: sub.id,
                    name: sub.name.clone(),
                    item_count: sub.children.len(),
                }),
                Some(Node::File(file)) => listing.files.push(FileSummary {
                    id: file.id,
                    name: file.name.clone(),
                    size: file.size,
                    extension: file.extension.clone(),
                }),
                None => return Err(Error::corrupted(format!("Child {} is missing", child))),
            }
        }

        listing
            .folders
            .sort_by(|a, b| sort_key(&a.name).cmp(&sort_key(&b.name)));
        listing.files.sort_by(|a, b| {
            sort_key(&display_name(&a.name, &a.extension))
                .cmp(&sort_key(&display_name(&b.name, &b.extension)))
        });
        Ok(listing)
    }

    /// Create an empty folder under `parent`.
    ///
    /// # Errors
    /// - Validation error for a bad name or a sibling with the same name
    /// - Not found if `parent` is not a folder
    pub fn create_folder(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let name = normalize_name(name)?;
        self.ensure_name_free(parent, &name, None)?;
        let meta_head = self.meta_head()?;

        let id = NodeId::generate();
        let now = Utc::now();
        debug!(%id, %parent, name = %name, "Creating folder");

        let mut staged = Staged::new(&self.nodes);
        staged.insert(Node::Folder(FolderNode {
            id,
            parent: Some(parent),
            name,
            children: Vec::new(),
            record: Vec::new(),
            created_at: now,
            modified_at: now,
        }));
        let parent_folder = staged.folder_mut(parent)?;
        parent_folder.children.push(id);
        parent_folder.modified_at = now;

        let txn = self.store.begin()?;
        persist(&mut self.store, txn, &mut staged, &[id, parent], meta_head)?;
        let changes = staged.into_changes();
        apply(&mut self.nodes, changes);

        info!(%id, "Folder created");
        Ok(id)
    }

    /// Store `content` as a new file under `parent`.
    ///
    /// # Errors
    /// - Validation error for a bad name or extension, or a sibling with
    ///   the same display name
    /// - Not found if `parent` is not a folder
    pub fn create_file(
        &mut self,
        parent: NodeId,
        name: &str,
        extension: &str,
        content: &[u8],
    ) -> Result<NodeId> {
        let name = normalize_name(name)?;
        let extension = normalize_extension(extension)?;
        self.ensure_name_free(parent, &display_name(&name, &extension), None)?;
        self.insert_file(parent, name, extension, content)
    }

    fn insert_file(
        &mut self,
        parent: NodeId,
        name: String,
        extension: String,
        content: &[u8],
    ) -> Result<NodeId> {
        let meta_head = self.meta_head()?;
        let compression = self.compression();
        let stored = compression.compress(content)?;

        let id = NodeId::generate();
        let now = Utc::now();
        debug!(%id, %parent, size = content.len(), stored = stored.len(), "Creating file");

        let mut txn = self.store.begin()?;
        let chunks = self.store.write_chain(&mut txn, FrameKind::Content, &stored)?;

        let mut staged = Staged::new(&self.nodes);
        staged.insert(Node::File(FileNode {
            id,
            parent,
            name,
            extension,
            size: content.len() as u64,
            stored_size: stored.len() as u64,
            compression,
            digest: digest_string(content),
            chunks,
            created_at: now,
            modified_at: now,
        }));
        let parent_folder = staged.folder_mut(parent)?;
        parent_folder.children.push(id);
        parent_folder.modified_at = now;

        persist(&mut self.store, txn, &mut staged, &[parent], meta_head)?;
        let changes = staged.into_changes();
        apply(&mut self.nodes, changes);

        info!(%id, size = content.len(), "File created");
        Ok(id)
    }

    /// Import an external file into `parent`.
    ///
    /// The file name is split into base name and extension. If a sibling
    /// with that name already holds identical content its id is returned
    /// and nothing is written, so a repeated upload is harmless. Otherwise
    /// a clashing name gets the first free ` (n)` suffix.
    ///
    /// # Errors
    /// - Not found if the source file or `parent` does not exist
    /// - I/O error if the source cannot be read
    pub fn upload(&mut self, parent: NodeId, source: &Path) -> Result<NodeId> {
        self.folder(parent)?;
        let content = std::fs::read(source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Source file not found: {}", source.display()))
            }
            _ => Error::Io(e),
        })?;

        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Validation("Source path has no usable file name".to_string()))?;
        let (stem, ext) = split_extension(file_name);
        let name = normalize_name(stem)?;
        let extension = normalize_extension(ext)?;

        if let Some(Node::File(existing)) =
            self.find_child(parent, &display_name(&name, &extension))
        {
            if existing.size == content.len() as u64 && existing.digest == digest_string(&content) {
                info!(id = %existing.id, "Identical file already present, upload skipped");
                return Ok(existing.id);
            }
        }

        let mut candidate = name.clone();
        let mut n = 1;
        while self
            .find_child(parent, &display_name(&candidate, &extension))
            .is_some()
        {
            candidate = format!("{} ({})", name, n);
            n += 1;
        }
        self.ensure_name_free(parent, &display_name(&candidate, &extension), None)?;

        self.insert_file(parent, candidate, extension, &content)
    }

    /// Rename a folder, or change a file's base name keeping its extension.
    ///
    /// Renaming to the current name is a no-op.
    ///
    /// # Errors
    /// - Validation error for the root, a bad name, or a sibling clash
    /// - Not found if no item of `item_type` has this id
    pub fn rename(&mut self, id: NodeId, item_type: ItemType, new_name: &str) -> Result<()> {
        if id.is_root() {
            return Err(Error::Validation(
                "The root folder cannot be renamed".to_string(),
            ));
        }
        let node = self.node_of_type(id, item_type)?;
        let name = normalize_name(new_name)?;
        let (current, display) = match node {
            Node::Folder(folder) => (folder.name.clone(), name.clone()),
            Node::File(file) => (file.name.clone(), display_name(&name, &file.extension)),
        };
        if current == name {
            return Ok(());
        }

        let parent = node
            .parent()
            .ok_or_else(|| Error::corrupted(format!("Node {} has no parent", id)))?;
        self.ensure_name_free(parent, &display, Some(id))?;
        let meta_head = self.meta_head()?;
        let now = Utc::now();
        debug!(%id, name = %name, "Renaming");

        let mut staged = Staged::new(&self.nodes);
        match staged.get_mut(id) {
            Some(Node::Folder(folder)) => {
                folder.name = name;
                folder.modified_at = now;
            }
            Some(Node::File(file)) => {
                file.name = name;
                file.modified_at = now;
            }
            None => return Err(Error::NotFound(format!("No {} with id {}", item_type, id))),
        }
        staged.folder_mut(parent)?.modified_at = now;

        let txn = self.store.begin()?;
        persist(&mut self.store, txn, &mut staged, &[parent], meta_head)?;
        let changes = staged.into_changes();
        apply(&mut self.nodes, changes);

        info!(%id, "Renamed");
        Ok(())
    }

    /// Delete a file, or a folder with everything below it.
    ///
    /// Chunks are released children first, so no released record is ever
    /// referenced by a surviving one.
    ///
    /// # Errors
    /// - Validation error for the root
    /// - Not found if no item of `item_type` has this id
    pub fn delete(&mut self, id: NodeId, item_type: ItemType) -> Result<()> {
        if id.is_root() {
            return Err(Error::Validation(
                "The root folder cannot be deleted".to_string(),
            ));
        }
        let parent = self
            .node_of_type(id, item_type)?
            .parent()
            .ok_or_else(|| Error::corrupted(format!("Node {} has no parent", id)))?;
        let meta_head = self.meta_head()?;
        let now = Utc::now();

        let mut txn = self.store.begin()?;
        let mut staged = Staged::new(&self.nodes);
        let doomed = post_order(&self.nodes, id);
        for node_id in &doomed {
            match self.nodes.get(node_id) {
                Some(Node::File(file)) => self.store.free_all(&mut txn, &file.chunks)?,
                Some(Node::Folder(folder)) => self.store.free_all(&mut txn, &folder.record)?,
                None => return Err(Error::corrupted(format!("Node {} is missing", node_id))),
            }
            staged.remove(*node_id);
        }

        let parent_folder = staged.folder_mut(parent)?;
        parent_folder.children.retain(|child| *child != id);
        parent_folder.modified_at = now;

        persist(&mut self.store, txn, &mut staged, &[parent], meta_head)?;
        let changes = staged.into_changes();
        apply(&mut self.nodes, changes);

        info!(%id, removed = doomed.len(), "Deleted");
        Ok(())
    }

    /// Decrypt a file's content.
    ///
    /// Returns `None` if `id` is not a file.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` if a chunk fails authentication or
    ///   the content does not match its recorded size and digest
    pub fn read_file_content(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        let Some(Node::File(file)) = self.nodes.get(&id) else {
            return Ok(None);
        };

        let stored = self.store.read_all(&file.chunks, FrameKind::Content)?;
        if stored.len() as u64 != file.stored_size {
            return Err(Error::corrupted(format!("File {} is truncated", id)));
        }

        let content = file.compression.decompress(&stored)?;
        if content.len() as u64 != file.size || digest_string(&content) != file.digest {
            return Err(Error::corrupted(format!(
                "File {} does not match its digest",
                id
            )));
        }

        debug!(%id, size = content.len(), "File read");
        Ok(Some(content))
    }

    /// Resolve a `/a/b/c.txt` path to a node.
    ///
    /// # Errors
    /// - Not found if any component is missing or a non-final one is a file
    pub fn resolve(&self, path: &VaultPath) -> Result<NodeId> {
        let mut current = NodeId::ROOT;
        for component in path.components() {
            current = self
                .find_child(current, component)
                .map(Node::id)
                .ok_or_else(|| Error::NotFound(format!("Path not found: {}", path)))?;
        }
        Ok(current)
    }

    /// Path of a node from the root.
    pub fn path_of(&self, id: NodeId) -> Result<VaultPath> {
        let mut names = Vec::new();
        let mut current = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {} not found", id)))?;

        while let Some(parent) = current.parent() {
            names.push(current.display_name());
            current = self
                .nodes
                .get(&parent)
                .ok_or_else(|| Error::corrupted(format!("Parent {} is missing", parent)))?;
            if names.len() > self.nodes.len() {
                return Err(Error::corrupted("Parent links form a cycle"));
            }
        }

        names
            .iter()
            .rev()
            .try_fold(VaultPath::root(), |path, name| path.join(name))
    }

    /// Verify the tree invariants.
    ///
    /// Checks that the root exists, every other node has exactly one parent
    /// that lists it, every node is reachable from the root exactly once,
    /// sibling names are unique, and no chunk is referenced twice.
    ///
    /// # Errors
    /// - Returns `Error::CorruptedVault` describing the first violation
    pub fn check_invariants(&self) -> Result<()> {
        match self.nodes.get(&NodeId::ROOT) {
            Some(Node::Folder(root)) if root.parent.is_none() => {}
            _ => return Err(Error::corrupted("Root folder is missing")),
        }

        let mut reached = HashSet::new();
        let mut chunks = HashSet::new();
        let mut queue = vec![NodeId::ROOT];

        while let Some(id) = queue.pop() {
            if !reached.insert(id) {
                return Err(Error::corrupted(format!("Node {} is reachable twice", id)));
            }
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| Error::corrupted(format!("Node {} is missing", id)))?;

            let owned = match node {
                Node::Folder(folder) => &folder.record,
                Node::File(file) => &file.chunks,
            };
            for address in owned {
                if !chunks.insert(*address) {
                    return Err(Error::corrupted(format!(
                        "Chunk {} is referenced twice",
                        address
                    )));
                }
            }

            if let Node::Folder(folder) = node {
                let mut names = HashSet::new();
                for child_id in &folder.children {
                    let child = self.nodes.get(child_id).ok_or_else(|| {
                        Error::corrupted(format!("Child {} is missing", child_id))
                    })?;
                    if child.parent() != Some(id) {
                        return Err(Error::corrupted(format!(
                            "Node {} is listed under the wrong parent",
                            child_id
                        )));
                    }
                    if !names.insert(name_key(&child.display_name(), self.case_sensitive())) {
                        return Err(Error::corrupted(format!(
                            "Duplicate name under folder {}",
                            id
                        )));
                    }
                    queue.push(*child_id);
                }
            }
        }

        if reached.len() != self.nodes.len() {
            return Err(Error::corrupted(format!(
                "{} nodes are unreachable",
                self.nodes.len() - reached.len()
            )));
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let mut stats = IndexStats {
            folders: 0,
            files: 0,
            total_bytes: 0,
            stored_bytes: 0,
            store: self.store.stats()?,
        };
        for node in self.nodes.values() {
            match node {
                Node::Folder(folder) if folder.parent.is_some() => stats.folders += 1,
                Node::Folder(_) => {}
                Node::File(file) => {
                    stats.files += 1;
                    stats.total_bytes += file.size;
                    stats.stored_bytes += file.stored_size;
                }
            }
        }
        Ok(stats)
    }

    /// Copy every live record and file into a fresh store.
    ///
    /// File content is copied as stored, without recompressing. The result
    /// is committed in a single transaction on `target`.
    pub fn copy_into(&self, mut target: ChunkStore) -> Result<HierarchyIndex> {
        let mut txn = target.begin()?;
        let meta_chain = target.write_chain(&mut txn, FrameKind::Meta, &self.meta.to_bytes()?)?;
        let mut nodes = self.nodes.clone();

        for id in post_order(&self.nodes, NodeId::ROOT) {
            match self.nodes.get(&id) {
                Some(Node::File(file)) => {
                    let stored = self.store.read_all(&file.chunks, FrameKind::Content)?;
                    let chunks = target.write_chain(&mut txn, FrameKind::Content, &stored)?;
                    if let Some(Node::File(copy)) = nodes.get_mut(&id) {
                        copy.chunks = chunks;
                    }
                }
                Some(Node::Folder(_)) => {
                    let record = build_record(&nodes, id)?;
                    let chain = target.write_chain(&mut txn, FrameKind::Record, &record.to_bytes()?)?;
                    if let Some(Node::Folder(copy)) = nodes.get_mut(&id) {
                        copy.record = chain;
                    }
                }
                None => return Err(Error::corrupted(format!("Node {} is missing", id))),
            }
        }

        let root_head = record_head(&nodes, NodeId::ROOT)?;
        target.commit(txn, root_head, meta_chain[0])?;

        Ok(HierarchyIndex {
            store: target,
            nodes,
            meta: self.meta.clone(),
        })
    }
}

/// Write new records for every changed folder and its ancestors, deepest
/// first, release the records they replace, and commit.
fn persist(
    store: &mut ChunkStore,
    mut txn: Txn,
    staged: &mut Staged<'_>,
    dirty: &[NodeId],
    meta_head: ChunkAddress,
) -> Result<()> {
    let mut folders: Vec<(usize, NodeId)> = Vec::new();
    let mut seen = HashSet::new();

    for &start in dirty {
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            folders.push((depth(staged, id)?, id));
            current = staged.lookup(id).and_then(Node::parent);
        }
    }
    folders.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, id) in folders {
        let record = build_record(staged, id)?;
        let chain = store.write_chain(&mut txn, FrameKind::Record, &record.to_bytes()?)?;
        let folder = staged.folder_mut(id)?;
        let replaced = std::mem::replace(&mut folder.record, chain);
        store.free_all(&mut txn, &replaced)?;
    }

    let root_head = record_head(staged, NodeId::ROOT)?;
    store.commit(txn, root_head, meta_head)
}

fn apply(nodes: &mut HashMap<NodeId, Node>, changes: HashMap<NodeId, Option<Node>>) {
    for (id, change) in changes {
        match change {
            Some(node) => {
                nodes.insert(id, node);
            }
            None => {
                nodes.remove(&id);
            }
        }
    }
}

fn depth(view: &impl NodeLookup, id: NodeId) -> Result<usize> {
    let mut depth = 0;
    let mut current = view.lookup(id).and_then(Node::parent);
    while let Some(parent) = current {
        depth += 1;
        if depth > 1 << 20 {
            return Err(Error::corrupted("Parent links form a cycle"));
        }
        current = view.lookup(parent).and_then(Node::parent);
    }
    Ok(depth)
}

fn record_head(view: &impl NodeLookup, id: NodeId) -> Result<ChunkAddress> {
    view.lookup(id)
        .and_then(Node::as_folder)
        .and_then(|folder| folder.record.first().copied())
        .ok_or_else(|| Error::corrupted(format!("Folder {} has no record", id)))
}

fn build_record(view: &impl NodeLookup, id: NodeId) -> Result<FolderRecord> {
    let folder = view
        .lookup(id)
        .and_then(Node::as_folder)
        .ok_or_else(|| Error::corrupted(format!("Folder {} is missing", id)))?;

    let mut record = FolderRecord {
        id,
        folders: Vec::new(),
        files: Vec::new(),
    };
    for child in &folder.children {
        match view.lookup(*child) {
            Some(Node::Folder(sub)) => record.folders.push(FolderEntry {
                id: sub.id,
                name: sub.name.clone(),
                record: record_head(view, sub.id)?,
                created_at: sub.created_at,
                modified_at: sub.modified_at,
            }),
            Some(Node::File(file)) => record.files.push(FileEntry::from_node(file)),
            None => return Err(Error::corrupted(format!("Child {} is missing", child))),
        }
    }
    Ok(record)
}

/// Ids of the subtree at `id`, children before their parent.
fn post_order(nodes: &HashMap<NodeId, Node>, id: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut stack = vec![(id, false)];
    while let Some((current, expanded)) = stack.pop() {
        if expanded {
            order.push(current);
            continue;
        }
        stack.push((current, true));
        if let Some(Node::Folder(folder)) = nodes.get(&current) {
            for child in &folder.children {
                stack.push((*child, false));
            }
        }
    }
    order
}

fn digest_string(content: &[u8]) -> String {
    BASE64.encode(content_digest(content))
}

fn sort_key(name: &str) -> (String, &str) {
    (name.to_lowercase(), name)
}
