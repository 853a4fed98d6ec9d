//! Stream firmware images into block-aligned storage
//!
//! Images arrive from a [Transport](transport::Transport) as chunks of
//! arbitrary size, while the target [AlignedStorage](storage::AlignedStorage)
//! only accepts whole, block-aligned writes. The
//! [StreamWriter](writer::StreamWriter) bridges the two, and the
//! [DownloadOrchestrator](download::DownloadOrchestrator) drives a complete
//! download and validates the result.

pub use self::{
    download::{DownloadOrchestrator, DownloadSettings, DownloadState, ImageMetrics},
    error::Error,
};

#[cfg(feature = "cli")]
pub mod cli;
pub mod download;
pub mod error;
#[cfg(feature = "cli")]
pub mod logging;
pub mod storage;
pub mod transport;
pub mod writer;
