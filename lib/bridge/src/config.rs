//! Bridge configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::enumerate::ListingMode;

/// Largest file a single `load_file` call will bring into the guest.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;
/// Longest path string read from guest memory, terminator excluded.
pub const DEFAULT_MAX_PATH_LEN: u32 = 4096;
pub const DEFAULT_MEMORY_SIZE: u32 = 128 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub max_file_size: u64,
    /// Directory relative guest paths are resolved against. Defaults to the
    /// host working directory.
    pub base_dir: Option<PathBuf>,
    pub max_path_len: u32,
    pub listing: ListingMode,
    /// Size of the in-process guest memory built by the CLI.
    pub memory_size: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            base_dir: None,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            listing: ListingMode::default(),
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_listing(mut self, listing: ListingMode) -> Self {
        self.listing = listing;
        self
    }
}
