//! Async vault operations over an open session.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::index::{IndexStats, Listing};
use crate::session::VaultSession;
use crate::tree::Node;
use openvault_common::{Error, ItemType, NodeId, Result, VaultPath};

/// Vault operations handler.
///
/// Every call is forwarded to the session, which serializes mutations and
/// runs them off the async runtime.
pub struct VaultOperations<'a> {
    session: &'a VaultSession,
}

impl<'a> VaultOperations<'a> {
    pub fn new(session: &'a VaultSession) -> Self {
        Self { session }
    }

    /// List the direct children of a folder.
    pub async fn browse(&self, folder: NodeId) -> Result<Listing> {
        self.session.read(move |index| index.browse(folder)).await
    }

    pub async fn create_folder(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let name = name.to_string();
        self.session
            .write(move |index| index.create_folder(parent, &name))
            .await
    }

    /// Store `content` as a new file.
    pub async fn create_file(
        &self,
        parent: NodeId,
        name: &str,
        extension: &str,
        content: Vec<u8>,
    ) -> Result<NodeId> {
        debug!(%parent, size = content.len(), "Creating file");
        let name = name.to_string();
        let extension = extension.to_string();
        self.session
            .write(move |index| index.create_file(parent, &name, &extension, &content))
            .await
    }

    /// Import a file from the local filesystem.
    pub async fn upload(&self, parent: NodeId, source: impl AsRef<Path>) -> Result<NodeId> {
        let source: PathBuf = source.as_ref().to_path_buf();
        self.session
            .write(move |index| index.upload(parent, &source))
            .await
    }

    pub async fn rename(&self, id: NodeId, item_type: ItemType, new_name: &str) -> Result<()> {
        let new_name = new_name.to_string();
        self.session
            .write(move |index| index.rename(id, item_type, &new_name))
            .await
    }

    /// Delete a file, or a folder recursively.
    pub async fn delete(&self, id: NodeId, item_type: ItemType) -> Result<()> {
        self.session
            .write(move |index| index.delete(id, item_type))
            .await
    }

    /// Decrypt a file's content; `None` if `id` is not a file.
    pub async fn read_file(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.session
            .read(move |index| index.read_file_content(id))
            .await
    }

    pub async fn resolve(&self, path: &VaultPath) -> Result<NodeId> {
        let path = path.clone();
        self.session.read(move |index| index.resolve(&path)).await
    }

    /// Whether `id` is a file or a folder.
    pub async fn item_type(&self, id: NodeId) -> Result<ItemType> {
        self.session
            .read(move |index| {
                index
                    .node(id)
                    .map(Node::item_type)
                    .ok_or_else(|| Error::NotFound(format!("Node {} not found", id)))
            })
            .await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.session.read(|index| index.stats()).await
    }

    /// Name given to the vault at creation.
    pub async fn vault_name(&self) -> Result<String> {
        self.session
            .read(|index| Ok(index.meta().name.clone()))
            .await
    }
}
