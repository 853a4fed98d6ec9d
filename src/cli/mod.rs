//! Command-line interface utilities
//!
//! No stability guaranties apply

use std::{num::ParseIntError, path::PathBuf};

use clap::Args;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use log::info;
use miette::{Result, WrapErr};

use self::config::{validate_geometry, Config};
use crate::{
    download::{DownloadOrchestrator, DownloadSettings, ImageMetrics, ProgressCallbacks},
    storage::{AlignedStorage, FileStorage},
    transport::DirTransport,
};

pub mod config;

/// Target region options
#[derive(Debug, Args)]
pub struct RegionArgs {
    /// File backing the target region
    #[arg(short = 'r', long, env = "OTAFLASH_REGION")]
    pub region: Option<PathBuf>,
    /// Write granularity of the region, in bytes
    #[arg(short = 'b', long, value_parser = parse_usize)]
    pub block_size: Option<usize>,
    /// Size of the region, in bytes
    #[arg(short = 'c', long, value_parser = parse_u64)]
    pub capacity: Option<u64>,
}

/// Download an image into the target region
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Path of the image, relative to the source directory
    pub path: String,
    /// Directory images are served from
    #[arg(short = 's', long, env = "OTAFLASH_SOURCE")]
    pub source: Option<PathBuf>,
    /// Maximum number of bytes per chunk
    #[arg(long, value_parser = parse_usize)]
    pub chunk_size: Option<usize>,
    /// Read the image back and compare digests after writing
    #[arg(long)]
    pub verify: bool,
    #[clap(flatten)]
    pub region_args: RegionArgs,
}

/// Erase the target region
#[derive(Debug, Args)]
pub struct EraseArgs {
    #[clap(flatten)]
    pub region_args: RegionArgs,
}

/// Progress bar for downloads
#[derive(Default)]
pub struct DownloadProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for DownloadProgress {
    fn init(&mut self, path: &str, expected: Option<u64>) {
        let pb = match expected {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40}] {bytes:>9}/{total_bytes:9} {msg}",
        )
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        pb.set_style(style);
        pb.set_message(path.to_owned());

        self.pb = Some(pb);
    }

    fn update(&mut self, received: u64) {
        if let Some(pb) = &self.pb {
            pb.set_position(received);
        }
    }

    fn finish(&mut self, success: bool) {
        if let Some(pb) = self.pb.take() {
            if success {
                pb.finish_with_message("done");
            } else {
                pb.abandon_with_message("failed");
            }
        }
    }
}

/// Build the file-backed region described by `args`, falling back to `config`.
pub fn region(args: &RegionArgs, config: &Config) -> Result<FileStorage> {
    let block_size = args.block_size.unwrap_or(config.block_size);
    let capacity = args.capacity.unwrap_or(config.capacity);
    validate_geometry(block_size, capacity)?;

    let path = args.region.clone().unwrap_or_else(|| config.region.clone());

    Ok(FileStorage::new(path, block_size, capacity))
}

/// Download an image into the configured region.
pub fn download(args: DownloadArgs, config: &Config) -> Result<ImageMetrics> {
    let storage = region(&args.region_args, config)?;
    let chunk_size = args.chunk_size.unwrap_or(config.chunk_size);
    let source = args.source.unwrap_or_else(|| config.source.clone());

    info!(
        "Serving images from '{}', writing to '{}'",
        source.display(),
        storage.path().display()
    );

    let transport = DirTransport::new(source, chunk_size);
    let settings = DownloadSettings {
        verify: args.verify || config.verify,
    };

    let mut orchestrator = DownloadOrchestrator::new(storage, transport).with_settings(settings);
    let metrics = orchestrator
        .start_download(&args.path, &mut DownloadProgress::default())
        .wrap_err_with(|| format!("Failed to download '{}'", args.path))?;

    print_metrics(&metrics);

    Ok(metrics)
}

/// Erase the configured region.
pub fn erase(args: EraseArgs, config: &Config) -> Result<()> {
    let mut storage = region(&args.region_args, config)?;

    storage
        .erase()
        .wrap_err_with(|| format!("Failed to erase '{}'", storage.path().display()))?;
    storage.close();

    println!(
        "Erased {} at '{}'",
        HumanBytes(storage.capacity()),
        storage.path().display()
    );

    Ok(())
}

/// Print a summary of a completed download.
pub fn print_metrics(metrics: &ImageMetrics) {
    let md5 = metrics
        .md5
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    println!("Bytes received:  {}", metrics.bytes_read);
    println!("Bytes written:   {}", metrics.bytes_written);
    println!(
        "Blocks written:  {} ({} bytes padding)",
        metrics.blocks_written, metrics.padding
    );
    println!("MD5:             {md5}");
}

/// Parse a decimal or `0x`-prefixed hexadecimal size.
pub fn parse_u64(input: &str) -> Result<u64, ParseIntError> {
    parse_int::parse(input)
}

/// Parse a decimal or `0x`-prefixed hexadecimal size.
pub fn parse_usize(input: &str) -> Result<usize, ParseIntError> {
    parse_int::parse(input)
}
