use log::debug;

use crate::{
    error::StorageError,
    storage::{AlignedStorage, ERASED_BYTE},
};

/// A storage region held in host memory
///
/// Behaves like NOR flash: every block may be programmed at most once between
/// erases, so a duplicated write is reported instead of silently overwriting
/// data. Every accepted write is recorded for later inspection.
#[derive(Debug, Clone)]
pub struct RamStorage {
    block_size: usize,
    data: Vec<u8>,
    programmed: Vec<bool>,
    writes: Vec<(u64, usize)>,
    erased: bool,
    closed: bool,
    write_protected: bool,
    erase_count: usize,
}

impl RamStorage {
    /// Create a region of `capacity` bytes with a write granularity of
    /// `block_size`. The region must still be erased before it is written.
    pub fn new(block_size: usize, capacity: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");

        RamStorage {
            block_size,
            data: vec![ERASED_BYTE; capacity],
            programmed: vec![false; capacity.div_ceil(block_size)],
            writes: Vec::new(),
            erased: false,
            closed: false,
            write_protected: false,
            erase_count: 0,
        }
    }

    /// Mark the region as write-protected, making [AlignedStorage::erase] fail.
    pub fn write_protected(mut self) -> Self {
        self.write_protected = true;
        self
    }

    /// Raw contents of the region.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Every `(offset, len)` write accepted since the last erase.
    pub fn writes(&self) -> &[(u64, usize)] {
        &self.writes
    }

    /// Number of times the region has been erased.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AlignedStorage for RamStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// Erasing also re-opens a closed region.
    fn erase(&mut self) -> Result<(), StorageError> {
        if self.write_protected {
            return Err(StorageError::WriteProtected);
        }

        debug!("Erasing RAM region of {:#x}B", self.data.len());

        self.data.fill(ERASED_BYTE);
        self.programmed.fill(false);
        self.writes.clear();
        self.erased = true;
        self.closed = false;
        self.erase_count += 1;

        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        if !self.erased {
            return Err(StorageError::NotErased);
        }
        self.check_bounds(offset, data.len())?;

        let first = offset as usize / self.block_size;
        let count = data.len() / self.block_size;

        if let Some(block) = (first..first + count).find(|&block| self.programmed[block]) {
            return Err(StorageError::AlreadyProgrammed {
                offset: (block * self.block_size) as u64,
            });
        }

        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.programmed[first..first + count].fill(true);
        self.writes.push((offset, data.len()));

        Ok(())
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }

        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(StorageError::OutOfRange {
                offset,
                len: buf.len(),
                capacity: self.capacity(),
            })?;

        buf.copy_from_slice(&self.data[start..end]);

        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
