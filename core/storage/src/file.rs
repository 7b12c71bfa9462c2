//! Vault file on the local filesystem.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::device::BlockDevice;
use openvault_common::{Error, Result};

/// A single vault file accessed as a block device.
pub struct FileDevice {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileDevice {
    /// Create a new vault file.
    ///
    /// # Errors
    /// - Path conflict if anything already exists at `path`
    /// - I/O error if the parent directory is missing or not writable
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Error::PathConflict(path.display().to_string())
                }
                _ => Error::Io(e),
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Open an existing vault file for reading and writing.
    ///
    /// # Errors
    /// - Not found if nothing exists at `path`
    /// - I/O error for permission problems or a directory at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("Vault file not found: {}", path.display()))
                }
                _ => Error::Io(e),
            })?;

        if !file.metadata()?.is_file() {
            return Err(Error::NotAVault(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlockDevice for FileDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file().sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openvault_common::ErrorCode;
    use tempfile::TempDir;

    #[test]
    fn test_create_write_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("v.ov");

        let device = FileDevice::create(&path).unwrap();
        device.write_at(10, b"hello").unwrap();
        device.sync().unwrap();
        assert_eq!(device.len().unwrap(), 15);

        let mut buf = [0u8; 5];
        device.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let mut head = [0xFFu8; 10];
        device.read_at(0, &mut head).unwrap();
        assert_eq!(head, [0u8; 10]);
    }

    #[test]
    fn test_create_refuses_existing_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("v.ov");
        std::fs::write(&path, b"x").unwrap();

        let err = FileDevice::create(&path).err().unwrap();
        assert_eq!(err.code(), ErrorCode::PathConflict);
        assert_eq!(std::fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = FileDevice::open(temp.path().join("nope.ov")).err().unwrap();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_read_past_end_is_io_error() {
        let temp = TempDir::new().unwrap();
        let device = FileDevice::create(temp.path().join("v.ov")).unwrap();
        device.write_at(0, b"abc").unwrap();

        let mut buf = [0u8; 8];
        let err = device.read_at(0, &mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
    }
}
