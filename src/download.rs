//! Drive a single firmware download end to end
//!
//! The [DownloadOrchestrator] erases the target region, requests the image
//! from the transport, streams every chunk through a [StreamWriter] and
//! finally cross-checks the bytes received, the bytes written and the length
//! declared by the server. Storage and transport are always closed before
//! [DownloadOrchestrator::start_download] returns, whatever the outcome.

use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use strum::Display;

use crate::{
    error::{ConnectionError, Error, ResultExt},
    storage::AlignedStorage,
    transport::Transport,
    writer::StreamWriter,
};

/// Block size used when reading back an image for verification
const VERIFY_READ_SIZE: usize = 0x1000;

/// Progress of a download attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum DownloadState {
    #[default]
    Idle,
    Erasing,
    Downloading,
    Validating,
    Complete,
    Failed,
}

/// Tallies of a completed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetrics {
    /// Bytes received from the transport
    pub bytes_read: u64,
    /// Genuine image bytes persisted, excluding padding
    pub bytes_written: u64,
    /// Whole blocks programmed
    pub blocks_written: u64,
    /// Zero bytes used to complete the final block
    pub padding: usize,
    /// MD5 digest of the persisted image
    pub md5: [u8; 16],
}

/// Behaviour switches for a download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Read the image back after writing and compare digests
    pub verify: bool,
}

/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Initialize some progress report
    fn init(&mut self, path: &str, expected: Option<u64>);
    /// Update some progress report
    fn update(&mut self, received: u64);
    /// Finish some progress report
    fn finish(&mut self, success: bool);
}

/// An empty implementation of [ProgressCallbacks] that does nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultProgressCallback;

impl ProgressCallbacks for DefaultProgressCallback {
    fn init(&mut self, _path: &str, _expected: Option<u64>) {}
    fn update(&mut self, _received: u64) {}
    fn finish(&mut self, _success: bool) {}
}

/// Downloads images from a [Transport] into an [AlignedStorage]
///
/// Attempts are serialized by construction: a download borrows the
/// orchestrator mutably until it has finished.
pub struct DownloadOrchestrator<S, T> {
    storage: S,
    transport: T,
    settings: DownloadSettings,
    state: DownloadState,
}

impl<S: AlignedStorage, T: Transport> DownloadOrchestrator<S, T> {
    pub fn new(storage: S, transport: T) -> Self {
        DownloadOrchestrator {
            storage,
            transport,
            settings: DownloadSettings::default(),
            state: DownloadState::Idle,
        }
    }

    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Hand back the storage and transport.
    pub fn into_parts(self) -> (S, T) {
        (self.storage, self.transport)
    }

    /// Download the image at `target_path` into the storage region.
    ///
    /// On any failure the stored image must be considered untrustworthy.
    pub fn start_download(
        &mut self,
        target_path: &str,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<ImageMetrics, Error> {
        info!("Downloading '{}'", target_path);

        let result = self.run(target_path, progress);

        self.transport.close();
        self.storage.close();

        match &result {
            Ok(metrics) => {
                self.transition(DownloadState::Complete);
                info!(
                    "Downloaded {} bytes in {} blocks",
                    metrics.bytes_written, metrics.blocks_written
                );
            }
            Err(err) => {
                self.transition(DownloadState::Failed);
                error!("Download of '{}' failed: {}", target_path, err);
            }
        }
        progress.finish(result.is_ok());

        result
    }

    fn run(
        &mut self,
        target_path: &str,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<ImageMetrics, Error> {
        self.transition(DownloadState::Erasing);
        self.storage.erase()?;

        self.transition(DownloadState::Downloading);
        self.transport.request(target_path)?;

        let mut writer = StreamWriter::new(&mut self.storage);
        let mut declared_len = None;
        let mut final_seen = false;

        for (i, chunk) in self.transport.chunks().enumerate() {
            let chunk = chunk.received(writer.total_read())?;

            if let Some(len) = chunk.declared_len {
                if let Some(previous) = declared_len.filter(|&previous| previous != len) {
                    warn!("Declared image length changed from {} to {}", previous, len);
                }
                declared_len = Some(len);
            }

            if i == 0 {
                progress.init(target_path, declared_len);
            }

            writer.write_chunk(&chunk.payload, chunk.is_final)?;
            progress.update(writer.total_read());

            final_seen = chunk.is_final;
        }

        if !final_seen {
            return Err(ConnectionError::UnexpectedEof {
                received: writer.total_read(),
            }
            .into());
        }

        let metrics = ImageMetrics {
            bytes_read: writer.total_read(),
            bytes_written: writer.total_write(),
            blocks_written: writer.blocks_written(),
            padding: writer.padding_written(),
            md5: writer.digest(),
        };

        self.transition(DownloadState::Validating);
        let expected = declared_len.ok_or(ConnectionError::MissingLength)?;
        validate(&metrics, expected)?;

        if self.settings.verify {
            self.verify(&metrics)?;
        }

        Ok(metrics)
    }

    fn verify(&mut self, metrics: &ImageMetrics) -> Result<(), Error> {
        debug!("Verifying {} bytes", metrics.bytes_written);

        let mut hasher = Md5::new();
        let mut buf = vec![0u8; VERIFY_READ_SIZE];
        let mut offset = 0;

        while offset < metrics.bytes_written {
            let len = (metrics.bytes_written - offset).min(VERIFY_READ_SIZE as u64) as usize;
            self.storage.read(offset, &mut buf[..len])?;
            hasher.update(&buf[..len]);
            offset += len as u64;
        }

        let found: [u8; 16] = hasher.finalize().into();
        if found != metrics.md5 {
            return Err(Error::VerifyFailed {
                expected: metrics.md5,
                found,
            });
        }

        Ok(())
    }

    fn transition(&mut self, state: DownloadState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
    }
}

/// Cross-check the tallies of a finished transfer against the declared length
fn validate(metrics: &ImageMetrics, expected: u64) -> Result<(), Error> {
    if metrics.bytes_read == expected && metrics.bytes_written == metrics.bytes_read {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            read: metrics.bytes_read,
            written: metrics.bytes_written,
            expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::StorageError,
        storage::RamStorage,
        transport::{Chunk, ScriptedTransport},
    };

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[derive(Default)]
    struct RecordingProgress {
        init: Option<Option<u64>>,
        updates: Vec<u64>,
        finished: Option<bool>,
    }

    impl ProgressCallbacks for RecordingProgress {
        fn init(&mut self, _path: &str, expected: Option<u64>) {
            self.init = Some(expected);
        }

        fn update(&mut self, received: u64) {
            self.updates.push(received);
        }

        fn finish(&mut self, success: bool) {
            self.finished = Some(success);
        }
    }

    #[test]
    fn straddling_chunks_complete() {
        let data = image(20);
        let transport = ScriptedTransport::from_image(&data, &[3, 10, 7], 20);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 64), transport);

        let mut progress = RecordingProgress::default();
        let metrics = orchestrator
            .start_download("/fw/app.bin", &mut progress)
            .unwrap();

        assert_eq!(metrics.bytes_read, 20);
        assert_eq!(metrics.bytes_written, 20);
        assert_eq!(metrics.blocks_written, 3);
        assert_eq!(metrics.padding, 4);
        assert_eq!(orchestrator.state(), DownloadState::Complete);

        assert_eq!(progress.init, Some(Some(20)));
        assert_eq!(progress.updates, vec![3, 13, 20]);
        assert_eq!(progress.finished, Some(true));

        let (storage, transport) = orchestrator.into_parts();
        assert!(storage.is_closed());
        assert!(transport.is_closed());
        assert_eq!(transport.requested(), Some("/fw/app.bin"));
        assert_eq!(storage.writes(), &[(0, 8), (8, 8), (16, 8)]);
        assert_eq!(&storage.data()[..20], data.as_slice());
    }

    #[test]
    fn short_delivery_is_a_length_mismatch() {
        let data = image(18);
        let transport = ScriptedTransport::from_image(&data, &[5, 5, 8], 20);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 64), transport);

        let err = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::LengthMismatch {
                read: 18,
                written: 18,
                expected: 20
            }
        ));
        assert_eq!(orchestrator.state(), DownloadState::Failed);
        assert!(orchestrator.storage().is_closed());
        assert!(orchestrator.transport().is_closed());
    }

    #[test]
    fn empty_image_completes_without_writes() {
        let transport = ScriptedTransport::new(vec![Chunk::new(vec![], true).with_declared_len(0)]);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 64), transport);

        let metrics = orchestrator
            .start_download("empty.bin", &mut DefaultProgressCallback)
            .unwrap();

        assert_eq!(metrics.bytes_read, 0);
        assert_eq!(metrics.bytes_written, 0);
        assert_eq!(orchestrator.state(), DownloadState::Complete);
        assert!(orchestrator.storage().writes().is_empty());
    }

    #[test]
    fn advisory_length_is_superseded_by_final_chunk() {
        let data = image(12);
        let transport = ScriptedTransport::new(vec![
            Chunk::new(data[..4].to_vec(), false).with_declared_len(4),
            Chunk::new(data[4..8].to_vec(), false),
            Chunk::new(data[8..].to_vec(), true).with_declared_len(12),
        ]);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(4, 64), transport);

        let metrics = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap();
        assert_eq!(metrics.bytes_read, 12);
    }

    #[test]
    fn last_advisory_length_is_used_when_final_has_none() {
        let data = image(6);
        let transport = ScriptedTransport::new(vec![
            Chunk::new(data[..4].to_vec(), false).with_declared_len(6),
            Chunk::new(data[4..].to_vec(), true),
        ]);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(4, 64), transport);

        assert!(orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .is_ok());
    }

    #[test]
    fn missing_length_fails() {
        let transport = ScriptedTransport::new(vec![Chunk::new(vec![1, 2, 3], true)]);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(4, 64), transport);

        let err = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::MissingLength)
        ));
    }

    #[test]
    fn transport_failure_closes_everything() {
        let data = image(10);
        let transport = ScriptedTransport::new(vec![Chunk::new(data[..6].to_vec(), false)])
            .failing_with(ConnectionError::Timeout);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(4, 64), transport);

        let mut progress = RecordingProgress::default();
        let err = orchestrator
            .start_download("fw.bin", &mut progress)
            .unwrap_err();

        assert!(matches!(err, Error::Connection(ConnectionError::Timeout)));
        assert_eq!(orchestrator.state(), DownloadState::Failed);
        assert!(orchestrator.storage().is_closed());
        assert!(orchestrator.transport().is_closed());
        assert_eq!(progress.finished, Some(false));
    }

    #[test]
    fn stream_ending_without_final_is_truncated() {
        let data = image(10);
        let transport = ScriptedTransport::new(vec![
            Chunk::new(data[..6].to_vec(), false).with_declared_len(10),
            Chunk::new(data[6..].to_vec(), false),
        ]);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(4, 64), transport);

        let err = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::UnexpectedEof { received: 10 })
        ));
    }

    #[test]
    fn erase_failure_skips_transport() {
        let transport = ScriptedTransport::from_image(&image(8), &[8], 8);
        let storage = RamStorage::new(4, 64).write_protected();
        let mut orchestrator = DownloadOrchestrator::new(storage, transport);

        let err = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Storage(StorageError::WriteProtected)
        ));
        assert_eq!(orchestrator.transport().requested(), None);
        assert_eq!(orchestrator.state(), DownloadState::Failed);
    }

    #[test]
    fn image_larger_than_region_fails() {
        let data = image(40);
        let transport = ScriptedTransport::from_image(&data, &[16, 24], 40);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 32), transport);

        let err = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::OutOfRange { .. })
        ));
    }

    #[test]
    fn verify_reads_back_the_image() {
        let data = image(21);
        let transport = ScriptedTransport::from_image(&data, &[7, 7, 7], 21);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 64), transport)
            .with_settings(DownloadSettings { verify: true });

        let metrics = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap();

        let expected: [u8; 16] = Md5::digest(&data).into();
        assert_eq!(metrics.md5, expected);
    }

    #[test]
    fn retry_after_failure_starts_from_scratch() {
        let data = image(12);
        let transport = ScriptedTransport::new(vec![Chunk::new(data[..5].to_vec(), false)])
            .failing_with(ConnectionError::Timeout);
        let mut orchestrator = DownloadOrchestrator::new(RamStorage::new(8, 32), transport);
        assert!(orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .is_err());

        let (storage, _) = orchestrator.into_parts();
        let transport = ScriptedTransport::from_image(&data, &[12], 12);
        let mut orchestrator = DownloadOrchestrator::new(storage, transport);

        let metrics = orchestrator
            .start_download("fw.bin", &mut DefaultProgressCallback)
            .unwrap();
        assert_eq!(metrics.bytes_written, 12);
        assert_eq!(orchestrator.storage().erase_count(), 2);
        assert_eq!(&orchestrator.storage().data()[..12], data.as_slice());
    }
}
