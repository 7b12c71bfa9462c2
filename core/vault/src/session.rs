//! Vault session management.
//!
//! A session owns the open vault's hierarchy index, and through it the
//! derived subkeys. Locking drops the index, which zeroizes the keys.
//!
//! All work on the index runs on the blocking pool while holding an owned
//! guard of the session lock. Mutations take the write side, so they are
//! serialized; reads share the read side. Because the task owns its guard,
//! a caller that stops waiting does not interrupt a mutation between its
//! chunk writes and its commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::index::HierarchyIndex;
use openvault_common::{Error, Result};

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The index and keys are resident.
    Active,
    /// Keys have been cleared; every operation fails.
    Locked,
}

/// An open vault.
///
/// Clones share the same underlying index and lock.
#[derive(Clone)]
pub struct VaultSession {
    handle: SessionHandle,
    path: PathBuf,
    index: Arc<RwLock<Option<HierarchyIndex>>>,
}

impl VaultSession {
    pub(crate) fn new(path: PathBuf, index: HierarchyIndex) -> Self {
        let session = Self {
            handle: SessionHandle::new(),
            path,
            index: Arc::new(RwLock::new(Some(index))),
        };
        info!(session = %session.handle.as_str(), path = %session.path.display(), "Vault session opened");
        session
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Path of the vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn state(&self) -> SessionState {
        if self.index.read().await.is_some() {
            SessionState::Active
        } else {
            SessionState::Locked
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == SessionState::Active
    }

    /// Run `f` against the index under the shared lock.
    ///
    /// # Errors
    /// - Returns `Error::VaultClosed` if the session is locked
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&HierarchyIndex) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.index.clone().read_owned().await;
        tokio::task::spawn_blocking(move || match guard.as_ref() {
            Some(index) => f(index),
            None => Err(Error::VaultClosed),
        })
        .await
        .map_err(join_error)?
    }

    /// Run `f` against the index under the exclusive lock.
    ///
    /// # Errors
    /// - Returns `Error::VaultClosed` if the session is locked
    pub async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut HierarchyIndex) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.index.clone().write_owned().await;
        tokio::task::spawn_blocking(move || match guard.as_mut() {
            Some(index) => f(index),
            None => Err(Error::VaultClosed),
        })
        .await
        .map_err(join_error)?
    }

    /// Lock the session, dropping the index and zeroizing its keys.
    ///
    /// Waits for any running operation to finish. Locking a locked session
    /// does nothing. Returns whether the session was active.
    pub async fn lock(&self) -> bool {
        let index = self.index.write().await.take();
        let was_active = index.is_some();
        drop(index);
        if was_active {
            info!(session = %self.handle.as_str(), "Vault session locked");
        }
        was_active
    }
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("Vault task failed: {}", e),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VaultMeta, VaultOptions};
    use openvault_common::{ErrorCode, NodeId};
    use openvault_crypto::{MasterKey, Salt};
    use openvault_storage::{BootHeader, ChunkStore, MemoryDevice};

    fn test_session() -> VaultSession {
        let options = VaultOptions::for_testing();
        let header = BootHeader::new(
            options.chunk_size,
            options.compression,
            options.case_sensitive,
            options.kdf,
            &Salt::from_bytes([2u8; 32]),
            &[0u8; 74],
        );
        let key = MasterKey::from_bytes([3u8; 32]);
        let store = ChunkStore::create(Box::new(MemoryDevice::new()), header, &key).unwrap();
        let index = HierarchyIndex::create(store, VaultMeta::new("Session").unwrap()).unwrap();
        VaultSession::new(PathBuf::from("memory"), index)
    }

    #[tokio::test]
    async fn test_session_read_and_write() {
        let session = test_session();
        assert!(session.is_active().await);

        let id = session
            .write(|index| index.create_folder(NodeId::ROOT, "Docs"))
            .await
            .unwrap();
        let listing = session.read(|index| index.browse(NodeId::ROOT)).await.unwrap();
        assert_eq!(listing.folders[0].id, id);
    }

    #[tokio::test]
    async fn test_session_lock() {
        let session = test_session();
        let other = session.clone();

        assert!(session.lock().await);
        assert!(!session.lock().await);
        assert_eq!(other.state().await, SessionState::Locked);

        let err = other
            .read(|index| index.browse(NodeId::ROOT))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VaultNotOpen);
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_serialized() {
        let session = test_session();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                session
                    .write(move |index| index.create_folder(NodeId::ROOT, &format!("f{}", i)))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let listing = session.read(|index| index.browse(NodeId::ROOT)).await.unwrap();
        assert_eq!(listing.folders.len(), 8);
        session.read(|index| index.check_invariants()).await.unwrap();
    }
}
