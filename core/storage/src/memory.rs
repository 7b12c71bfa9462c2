//! In-memory block device for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::BlockDevice;
use openvault_common::Result;

const UNLIMITED: usize = usize::MAX;

/// In-memory block device.
///
/// Clones share the same buffer, so a test can "reopen" a vault from a
/// device the previous session wrote to. Writes can be made to fail after
/// a fixed number of successes to simulate a crash at any point.
#[derive(Clone)]
pub struct MemoryDevice {
    data: Arc<Mutex<Vec<u8>>>,
    writes_left: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl MemoryDevice {
    /// Create a new empty device.
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Create a device holding a copy of an image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes)),
            writes_left: Arc::new(AtomicUsize::new(UNLIMITED)),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Let `n` more writes succeed, then fail every write. Once a write
    /// has failed, every sync fails too.
    ///
    /// A failed write leaves the buffer untouched, as if the process died
    /// before issuing it.
    pub fn fail_writes_after(&self, n: usize) {
        self.crashed.store(false, Ordering::SeqCst);
        self.writes_left.store(n, Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.crashed.store(false, Ordering::SeqCst);
        self.writes_left.store(UNLIMITED, Ordering::SeqCst);
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data().clone()
    }

    /// Apply `f` to the raw bytes, bypassing failure injection.
    pub fn tamper(&self, f: impl FnOnce(&mut Vec<u8>)) {
        f(&mut self.data());
    }

    fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_write_permit(&self) -> Result<()> {
        let granted = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                UNLIMITED => Some(UNLIMITED),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok();

        if granted {
            Ok(())
        } else {
            self.crashed.store(true, Ordering::SeqCst);
            Err(injected_failure())
        }
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn injected_failure() -> openvault_common::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "injected write failure").into()
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of device",
            )
            .into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.take_write_permit()?;
        let mut data = self.data();
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_extends_and_reads_back() {
        let device = MemoryDevice::new();
        device.write_at(4, b"data").unwrap();
        assert_eq!(device.len().unwrap(), 8);

        let mut buf = [0u8; 4];
        device.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
        assert!(device.read_at(6, &mut buf).is_err());
    }

    #[test]
    fn test_clones_share_contents() {
        let device = MemoryDevice::new();
        let other = device.clone();
        device.write_at(0, b"x").unwrap();
        assert_eq!(other.snapshot(), b"x");
    }

    #[test]
    fn test_fail_writes_after() {
        let device = MemoryDevice::new();
        device.fail_writes_after(2);

        device.write_at(0, b"a").unwrap();
        device.write_at(1, b"b").unwrap();
        assert!(device.write_at(2, b"c").is_err());
        assert!(device.sync().is_err());
        assert_eq!(device.snapshot(), b"ab");

        device.heal();
        device.write_at(2, b"c").unwrap();
        device.sync().unwrap();
        assert_eq!(device.snapshot(), b"abc");
    }
}
