//! Command-line interface configuration
//!
//! Settings are read from `otaflash.toml` in the working directory, falling
//! back to the same file in the user's configuration directory. Every value
//! has a default, and command-line flags take precedence over both.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use miette::{Diagnostic, IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::DEFAULT_CHUNK_SIZE;

const CONFIG_FILE_NAME: &str = "otaflash.toml";

/// Configuration errors
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Block size must be non-zero")]
    #[diagnostic(code(otaflash::config::block_size))]
    ZeroBlockSize,

    #[error("Region capacity of {capacity} bytes is not a multiple of the block size {block_size}")]
    #[diagnostic(
        code(otaflash::config::capacity),
        help("Round the capacity to a whole number of blocks")
    )]
    UnalignedCapacity { capacity: u64, block_size: usize },

    #[error("Chunk size must be non-zero")]
    #[diagnostic(code(otaflash::config::chunk_size))]
    ZeroChunkSize,
}

/// Project configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Write granularity of the target region
    pub block_size: usize,
    /// Size of the target region
    #[serde(
        serialize_with = "serialize_u64_to_hex",
        deserialize_with = "deserialize_size"
    )]
    pub capacity: u64,
    /// Maximum number of bytes per transport chunk
    pub chunk_size: usize,
    /// Read the image back and compare digests after writing
    pub verify: bool,
    /// File backing the target region
    pub region: PathBuf,
    /// Directory images are served from
    pub source: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: 8,
            capacity: 0x10_0000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify: false,
            region: PathBuf::from("region.bin"),
            source: PathBuf::from("."),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Size {
    Int(u64),
    Hex(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Size::deserialize(deserializer)? {
        Size::Int(value) => Ok(value),
        Size::Hex(hex) => {
            let hex = hex.to_lowercase();
            let hex = hex.trim_start_matches("0x");

            u64::from_str_radix(hex, 16).map_err(serde::de::Error::custom)
        }
    }
}

fn serialize_u64_to_hex<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{value:#x}"))
}

impl Config {
    /// Load configuration from the configuration files.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        let path = if local.exists() {
            Some(local)
        } else {
            Self::global_config_path().filter(|path| path.exists())
        };

        let config = match path {
            Some(path) => Self::load_from(&path)?,
            None => Config::default(),
        };
        debug!("Config: {:#?}", &config);

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw_data = read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;

        let config: Config = toml::from_str(&raw_data)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;

        Ok(config)
    }

    /// Check that the configured values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_geometry(self.block_size, self.capacity)?;

        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("rs", "otaflash", "otaflash")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

/// Check a region geometry: non-zero blocks, whole number of blocks.
pub fn validate_geometry(block_size: usize, capacity: u64) -> Result<(), ConfigError> {
    if block_size == 0 {
        return Err(ConfigError::ZeroBlockSize);
    }
    if capacity % block_size as u64 != 0 {
        return Err(ConfigError::UnalignedCapacity {
            capacity,
            block_size,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config: Config = toml::from_str("verify = true").unwrap();

        assert!(config.verify);
        assert_eq!(config.block_size, 8);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.region, PathBuf::from("region.bin"));
    }

    #[test]
    fn capacity_accepts_integers_and_hex() {
        let config: Config = toml::from_str("capacity = 4096").unwrap();
        assert_eq!(config.capacity, 4096);

        let config: Config = toml::from_str(r#"capacity = "0x2000""#).unwrap();
        assert_eq!(config.capacity, 0x2000);

        let config: Config = toml::from_str(r#"capacity = "1F00""#).unwrap();
        assert_eq!(config.capacity, 0x1f00);

        let result: Result<Config, _> = toml::from_str(r#"capacity = "xyz""#);
        assert!(result.is_err());
    }

    #[test]
    fn capacity_serializes_as_hex() {
        let serialized = toml::to_string(&Config::default()).unwrap();
        assert!(serialized.contains(r#"capacity = "0x100000""#));

        let config: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn geometry_is_validated() {
        assert!(validate_geometry(8, 64).is_ok());
        assert!(matches!(
            validate_geometry(0, 64),
            Err(ConfigError::ZeroBlockSize)
        ));
        assert!(matches!(
            validate_geometry(8, 60),
            Err(ConfigError::UnalignedCapacity { .. })
        ));

        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroChunkSize)));
    }

    #[test]
    fn load_from_rejects_invalid_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "block_size = 8\ncapacity = 100\n").unwrap();

        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "block_size = 4\ncapacity = 100\n").unwrap();
        assert_eq!(Config::load_from(&path).unwrap().block_size, 4);
    }
}
