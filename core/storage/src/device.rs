//! Block device abstraction.

use openvault_common::Result;

/// Random-access byte storage backing a vault.
///
/// Implementations must make a completed `sync` durable: every write issued
/// before it survives a crash.
pub trait BlockDevice: Send + Sync {
    /// Fill `buf` from `offset`.
    ///
    /// # Errors
    /// - I/O error, including a short read past the end of the device
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, extending the device if needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush all previous writes to durable storage.
    fn sync(&self) -> Result<()>;

    /// Current length in bytes.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
