//! Block-aligned storage regions
//!
//! An [AlignedStorage] is a pre-erased region that can only be programmed in
//! whole blocks. Both the offset and the length of every write must be
//! multiples of [AlignedStorage::block_size].

pub use self::{file::FileStorage, ram::RamStorage};
use crate::error::StorageError;

mod file;
mod ram;

/// Value of every byte of a freshly erased region
pub const ERASED_BYTE: u8 = 0xff;

/// Operations for interacting with a block-aligned storage region.
pub trait AlignedStorage {
    /// Write granularity of the region, in bytes.
    fn block_size(&self) -> usize;

    /// Total number of bytes the region can hold.
    fn capacity(&self) -> u64;

    /// Erase the whole region, making every block writable again.
    fn erase(&mut self) -> Result<(), StorageError>;

    /// Program `data` at `offset`.
    ///
    /// Both `offset` and `data.len()` must be multiples of the block size.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError>;

    /// Read back `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Release the region. Calling this more than once is allowed.
    fn close(&mut self);

    /// Check that a write request is block aligned and lies inside the region.
    fn check_bounds(&self, offset: u64, len: usize) -> Result<(), StorageError> {
        let block_size = self.block_size();

        if offset % block_size as u64 != 0 || len % block_size != 0 {
            return Err(StorageError::AlignmentViolation {
                offset,
                len,
                block_size,
            });
        }

        match offset.checked_add(len as u64) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(StorageError::OutOfRange {
                offset,
                len,
                capacity: self.capacity(),
            }),
        }
    }
}

impl<S: AlignedStorage + ?Sized> AlignedStorage for &mut S {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn capacity(&self) -> u64 {
        (**self).capacity()
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        (**self).erase()
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(offset, data)
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(offset, buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
