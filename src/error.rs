//! Library and application errors

use std::io;

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by otaflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while talking to the image server")]
    #[diagnostic(transparent)]
    Connection(#[source] ConnectionError),

    #[error("Storage error while downloading image")]
    #[diagnostic(transparent)]
    Storage(#[source] StorageError),

    #[error(
        "Image length mismatch: received {read} bytes, wrote {written} bytes, server declared {expected} bytes"
    )]
    #[diagnostic(
        code(otaflash::length_mismatch),
        help("The transfer was truncated or corrupted; the stored image must not be activated")
    )]
    LengthMismatch { read: u64, written: u64, expected: u64 },

    #[error("Verification of stored image failed: expected MD5 {expected:02x?}, found {found:02x?}")]
    #[diagnostic(code(otaflash::verify_failed))]
    VerifyFailed { expected: [u8; 16], found: [u8; 16] },
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Errors reported by an [AlignedStorage](crate::storage::AlignedStorage)
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Unaligned write of {len} bytes at offset {offset:#x} (block size {block_size})")]
    #[diagnostic(
        code(otaflash::storage::alignment),
        help("This is a bug in the caller; writes must be block aligned in offset and length")
    )]
    AlignmentViolation {
        offset: u64,
        len: usize,
        block_size: usize,
    },

    #[error("Write of {len} bytes at offset {offset:#x} exceeds region capacity of {capacity} bytes")]
    #[diagnostic(
        code(otaflash::storage::out_of_range),
        help("The image does not fit the target region")
    )]
    OutOfRange { offset: u64, len: usize, capacity: u64 },

    #[error("Region was written before being erased")]
    #[diagnostic(code(otaflash::storage::not_erased))]
    NotErased,

    #[error("Block at offset {offset:#x} was already programmed since the last erase")]
    #[diagnostic(code(otaflash::storage::already_programmed))]
    AlreadyProgrammed { offset: u64 },

    #[error("Region handle is closed")]
    #[diagnostic(code(otaflash::storage::closed))]
    Closed,

    #[error("Region is write-protected")]
    #[diagnostic(code(otaflash::storage::write_protected))]
    WriteProtected,

    #[error("IO error while accessing region: {0}")]
    #[diagnostic(code(otaflash::storage::io))]
    Io(#[from] io::Error),
}

/// Errors reported by a [Transport](crate::transport::Transport)
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Invalid image path '{0}'")]
    #[diagnostic(
        code(otaflash::connection::invalid_path),
        help("Image paths are relative to the server root and may not contain `..`")
    )]
    InvalidPath(String),

    #[error("Image '{0}' not found on the server")]
    #[diagnostic(code(otaflash::connection::not_found))]
    NotFound(String),

    #[error("Timeout while waiting for the next chunk")]
    #[diagnostic(code(otaflash::connection::timeout))]
    Timeout,

    #[error("Transfer ended after {received} bytes without a final chunk")]
    #[diagnostic(code(otaflash::connection::unexpected_eof))]
    UnexpectedEof { received: u64 },

    #[error("Server never declared the total image length")]
    #[diagnostic(code(otaflash::connection::missing_length))]
    MissingLength,

    #[error("No request has been issued on this connection")]
    #[diagnostic(code(otaflash::connection::not_requested))]
    NotRequested,

    #[error("IO error on connection: {0}")]
    #[diagnostic(code(otaflash::connection::io))]
    Io(#[source] io::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionError::Timeout,
            io::ErrorKind::UnexpectedEof => ConnectionError::UnexpectedEof { received: 0 },
            _ => ConnectionError::Io(err),
        }
    }
}

pub(crate) trait ResultExt {
    /// Attach the number of bytes received so far to a truncated transfer
    fn received(self, received: u64) -> Self;
}

impl<T> ResultExt for Result<T, ConnectionError> {
    fn received(self, received: u64) -> Self {
        match self {
            Err(ConnectionError::UnexpectedEof { .. }) => {
                Err(ConnectionError::UnexpectedEof { received })
            }
            res => res,
        }
    }
}
