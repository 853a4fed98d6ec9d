use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    error::StorageError,
    storage::{AlignedStorage, ERASED_BYTE},
};

/// Bytes written per call while erasing a file-backed region
const ERASE_CHUNK: usize = 0x1000;

/// A storage region backed by a file on the host
///
/// The file is opened on [AlignedStorage::erase] and released on
/// [AlignedStorage::close], so a single `FileStorage` can serve several
/// download attempts in sequence.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    block_size: usize,
    capacity: u64,
    file: Option<File>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, block_size: usize, capacity: u64) -> Self {
        FileStorage {
            path: path.into(),
            block_size,
            capacity,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, StorageError> {
        self.file.as_mut().ok_or(StorageError::Closed)
    }
}

impl AlignedStorage for FileStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        debug!(
            "Erasing region of {:#x}B at '{}'",
            self.capacity,
            self.path.display()
        );

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::PermissionDenied => StorageError::WriteProtected,
                _ => StorageError::Io(err),
            })?;

        let erased = [ERASED_BYTE; ERASE_CHUNK];
        let mut remaining = self.capacity;
        while remaining > 0 {
            let len = remaining.min(ERASE_CHUNK as u64) as usize;
            file.write_all(&erased[..len])?;
            remaining -= len as u64;
        }
        file.flush()?;

        self.file = Some(file);

        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.check_bounds(offset, data.len())?;

        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(())
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if offset.saturating_add(buf.len() as u64) > self.capacity {
            return Err(StorageError::OutOfRange {
                offset,
                len: buf.len(),
                capacity: self.capacity,
            });
        }

        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_all() {
                warn!("Failed to sync region '{}': {}", self.path.display(), err);
            }
        }
    }
}
