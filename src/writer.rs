//! Turn an arbitrarily chunked byte stream into block-aligned writes
//!
//! Chunk boundaries chosen by the transport rarely line up with the write
//! granularity of the storage. The [StreamWriter] keeps the tail of each
//! chunk that does not fill a whole block in a carry buffer of less than one
//! block, completes it with the head of the next chunk, and writes everything
//! in between directly. Only on the final chunk is a leftover tail padded with
//! zeroes to a full block.

use log::{debug, error};
use md5::{Digest, Md5};

use crate::{error::StorageError, storage::AlignedStorage};

/// Byte used to complete the last, partial block of an image
const PAD_BYTE: u8 = 0x00;

/// Write state for a single download session
pub struct StreamWriter<'s, S: AlignedStorage + ?Sized> {
    storage: &'s mut S,
    block_size: usize,
    carry: Vec<u8>,
    total_read: u64,
    total_write: u64,
    blocks_written: u64,
    padding_written: usize,
    hasher: Md5,
}

impl<'s, S: AlignedStorage + ?Sized> StreamWriter<'s, S> {
    /// Start a fresh session writing to `storage` from offset 0.
    ///
    /// The storage must already be erased.
    pub fn new(storage: &'s mut S) -> Self {
        let block_size = storage.block_size();

        StreamWriter {
            storage,
            block_size,
            carry: Vec::with_capacity(block_size),
            total_read: 0,
            total_write: 0,
            blocks_written: 0,
            padding_written: 0,
            hasher: Md5::new(),
        }
    }

    /// Re-arm the writer for a new session on the same storage.
    pub fn reset(&mut self) {
        self.total_read = 0;
        self.total_write = 0;
        self.blocks_written = 0;
        self.padding_written = 0;
        self.hasher = Md5::new();
        self.begin();
    }

    fn begin(&mut self) {
        if self.total_read == 0 && !self.carry.is_empty() {
            debug!("Discarding {} stale carry bytes", self.carry.len());
            self.carry.clear();
        }
    }

    /// Feed the next chunk of the image.
    ///
    /// When `is_final` is set any residue is flushed as a zero-padded block,
    /// since no later chunk can complete it.
    pub fn write_chunk(&mut self, payload: &[u8], is_final: bool) -> Result<(), StorageError> {
        self.begin();

        let block_size = self.block_size;
        let mut rest = payload;
        self.total_read += payload.len() as u64;

        if !self.carry.is_empty() {
            let room = block_size - self.carry.len();

            if rest.len() < room {
                self.carry.extend_from_slice(rest);
                rest = &[];
            } else {
                let (head, tail) = rest.split_at(room);
                self.carry.extend_from_slice(head);
                rest = tail;
                self.flush_carry()?;
            }
        }

        if !rest.is_empty() {
            let aligned_len = rest.len() - rest.len() % block_size;
            let (middle, tail) = rest.split_at(aligned_len);

            if !middle.is_empty() {
                self.commit(middle, middle.len())?;
            }
            self.carry.extend_from_slice(tail);
        }

        debug!(
            "Chunk of {}B: read {}, written {}, carried {}",
            payload.len(),
            self.total_read,
            self.total_write,
            self.carry.len()
        );

        if is_final {
            self.finish()?;
        }

        Ok(())
    }

    /// Write any residue in the carry buffer as a zero-padded block.
    ///
    /// Only the genuine bytes count towards [StreamWriter::total_write].
    pub fn finish(&mut self) -> Result<(), StorageError> {
        if self.carry.is_empty() {
            return Ok(());
        }

        let genuine = self.carry.len();
        let padding = self.block_size - genuine;
        self.carry.resize(self.block_size, PAD_BYTE);

        debug!("Padding final block with {} bytes", padding);

        let block = std::mem::take(&mut self.carry);
        let res = self.commit(&block, genuine);
        self.carry = block;
        self.carry.clear();
        res?;

        self.padding_written += padding;

        Ok(())
    }

    fn flush_carry(&mut self) -> Result<(), StorageError> {
        let block = std::mem::take(&mut self.carry);
        let res = self.commit(&block, block.len());
        self.carry = block;
        self.carry.clear();
        res
    }

    /// Write whole blocks at the current write position, counting only the
    /// first `genuine` bytes as image data.
    fn commit(&mut self, blocks: &[u8], genuine: usize) -> Result<(), StorageError> {
        let offset = self.total_write;

        if let Err(err) = self.storage.write(offset, blocks) {
            error!(
                "Write of {}B at offset {:#x} failed: {}",
                blocks.len(),
                offset,
                err
            );
            return Err(err);
        }

        self.hasher.update(&blocks[..genuine]);
        self.total_write += genuine as u64;
        self.blocks_written += (blocks.len() / self.block_size) as u64;

        Ok(())
    }

    /// Bytes received so far, including any still held in the carry buffer.
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Genuine image bytes persisted so far, excluding padding.
    pub fn total_write(&self) -> u64 {
        self.total_write
    }

    /// Bytes received but not yet written.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    /// Number of whole blocks programmed so far.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Zero bytes written to complete the final block.
    pub fn padding_written(&self) -> usize {
        self.padding_written
    }

    /// MD5 digest of the genuine bytes written so far.
    pub fn digest(&self) -> [u8; 16] {
        self.hasher.clone().finalize().into()
    }
}
