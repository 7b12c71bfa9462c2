//! Vault manager for creating, opening and compacting vaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::{VaultMeta, VaultOptions};
use crate::index::HierarchyIndex;
use crate::session::{join_error, VaultSession};
use openvault_common::{Error, Result};
use openvault_crypto::{derive_key, verification_tag, verify_password, MasterKey, Salt};
use openvault_storage::{BlockDevice, BootHeader, ChunkStore, FileDevice};

/// Initialize a new vault on an empty device.
///
/// Derives the master key from `password`, writes the boot header with its
/// verification tag, and commits an empty root.
///
/// # Errors
/// - Validation error for bad options, a blank name or an empty password
/// - Key derivation error if Argon2id rejects the parameters
/// - I/O error if the device cannot be written
pub fn create_index(
    device: Box<dyn BlockDevice>,
    name: &str,
    password: &[u8],
    options: &VaultOptions,
) -> Result<HierarchyIndex> {
    options.validate()?;
    let meta = VaultMeta::new(name)?;

    let salt = Salt::generate();
    let key = derive_key(password, &salt, &options.kdf)?;
    let mut header = BootHeader::new(
        options.chunk_size,
        options.compression,
        options.case_sensitive,
        options.kdf.clone(),
        &salt,
        &[],
    );
    header.set_verification_tag(&verification_tag(&key, &header.binding()?)?);

    let store = ChunkStore::create(device, header, &key)?;
    HierarchyIndex::create(store, meta)
}

/// Unlock a vault on `device`.
///
/// # Errors
/// - Returns `Error::NotAVault` if the header is missing or unsupported
/// - Returns `Error::WrongPassword` if the verification tag does not open,
///   or the password is empty
/// - Returns `Error::CorruptedVault` if the password is right but the
///   commit slots or records fail authentication
pub fn open_index(device: Box<dyn BlockDevice>, password: &[u8]) -> Result<HierarchyIndex> {
    unlock(device, password).map(|(index, _)| index)
}

fn unlock(device: Box<dyn BlockDevice>, password: &[u8]) -> Result<(HierarchyIndex, MasterKey)> {
    let header = BootHeader::read(device.as_ref())?;
    // create refuses empty passwords, so none can unlock a vault
    if password.is_empty() {
        return Err(Error::WrongPassword);
    }
    let key = derive_key(password, &header.salt()?, &header.kdf)?;
    if !verify_password(&key, &header.verification_tag()?, &header.binding()?) {
        return Err(Error::WrongPassword);
    }

    let store = ChunkStore::open(device, header, &key)?;
    let index = HierarchyIndex::load(store)?;
    Ok((index, key))
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub chunks_before: u64,
    pub chunks_after: u64,
}

/// Vault manager for creating and opening vault files.
///
/// Key derivation and all file I/O run on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct VaultManager;

impl VaultManager {
    pub fn new() -> Self {
        Self
    }

    /// Create a new vault file and open a session on it.
    ///
    /// Arguments are checked before anything touches the filesystem. If
    /// initialization fails after the file was created, the file is removed.
    ///
    /// # Errors
    /// - Path conflict if anything already exists at `path`
    /// - Validation error for bad options, a blank name or an empty password
    /// - I/O error if the file cannot be written
    pub async fn create_vault(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        password: &str,
        options: VaultOptions,
    ) -> Result<VaultSession> {
        let path = path.as_ref().to_path_buf();
        options.validate()?;
        VaultMeta::new(name)?;
        if password.is_empty() {
            return Err(Error::Validation("Password cannot be empty".to_string()));
        }

        let name = name.to_string();
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let target = path.clone();

        let index = tokio::task::spawn_blocking(move || {
            let device = FileDevice::create(&target)?;
            let result = create_index(Box::new(device), &name, &password, &options);
            if result.is_err() {
                if let Err(e) = std::fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %e, "Could not remove partial vault file");
                }
            }
            result
        })
        .await
        .map_err(join_error)??;

        info!(path = %path.display(), "Vault created");
        Ok(VaultSession::new(path, index))
    }

    /// Open an existing vault file.
    ///
    /// # Errors
    /// - Not found if nothing exists at `path`
    /// - Not a vault, wrong password or corrupted vault as for [`open_index`]
    pub async fn open_vault(&self, path: impl AsRef<Path>, password: &str) -> Result<VaultSession> {
        let path = path.as_ref().to_path_buf();
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let target = path.clone();

        let index = tokio::task::spawn_blocking(move || {
            let device = FileDevice::open(&target)?;
            open_index(Box::new(device), &password)
        })
        .await
        .map_err(join_error)??;

        info!(path = %path.display(), "Vault opened");
        Ok(VaultSession::new(path, index))
    }

    /// Check whether `path` names an existing regular file.
    pub async fn path_is_file(&self, path: impl AsRef<Path>) -> bool {
        tokio::fs::metadata(path.as_ref())
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    /// Rewrite a closed vault without its free chunks.
    ///
    /// Live records and file content are copied into a sibling file with
    /// the same header, which then replaces the original by rename. The
    /// vault must not be open elsewhere while this runs.
    pub async fn compact(&self, path: impl AsRef<Path>, password: &str) -> Result<CompactionReport> {
        let path = path.as_ref().to_path_buf();
        let password = Zeroizing::new(password.as_bytes().to_vec());

        tokio::task::spawn_blocking(move || compact_file(&path, &password))
            .await
            .map_err(join_error)?
    }
}

fn compact_file(path: &Path, password: &[u8]) -> Result<CompactionReport> {
    let (source, key) = unlock(Box::new(FileDevice::open(path)?), password)?;
    let bytes_before = std::fs::metadata(path)?.len();
    let chunks_before = source.store().stats()?.chunk_count;

    let temp = compaction_path(path)?;
    match std::fs::remove_file(&temp) {
        Ok(()) => warn!(path = %temp.display(), "Removed leftover compaction file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let copied = FileDevice::create(&temp).and_then(|device| {
        let store = ChunkStore::create(Box::new(device), source.store().header().clone(), &key)?;
        let copy = source.copy_into(store)?;
        copy.check_invariants()?;
        copy.store().stats().map(|stats| stats.chunk_count)
    });
    drop(source);

    let chunks_after = match copied {
        Ok(chunks) => chunks,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&temp) {
                warn!(path = %temp.display(), error = %cleanup, "Could not remove compaction file");
            }
            return Err(e);
        }
    };

    std::fs::rename(&temp, path)?;
    let bytes_after = std::fs::metadata(path)?.len();
    info!(bytes_before, bytes_after, "Vault compacted");

    Ok(CompactionReport {
        bytes_before,
        bytes_after,
        chunks_before,
        chunks_after,
    })
}

fn compaction_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Validation(format!("Invalid vault path: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.compact", file_name)))
}
