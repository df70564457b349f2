//! File storage and record store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_PUBLIC_BASE_URL, DEFAULT_STATE_PATH, DEFAULT_STORAGE_ROOT,
};
use crate::storage::{LocalFileStorage, StorageError};

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_ROOT)
}

fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

/// Where processed files are written and how input files are fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// URL prefix processed files are published under; URLs below it are
    /// read back from `root`
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            public_base_url: default_public_base_url(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn to_file_storage(&self) -> Result<LocalFileStorage, StorageError> {
        LocalFileStorage::new(
            self.root.clone(),
            &self.public_base_url,
            Duration::from_millis(self.fetch_timeout_ms),
        )
    }
}

/// Record store backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Records live for the life of the process
    Memory,
    /// Records are snapshotted to a JSON file after every write
    File {
        #[serde(default = "default_state_path")]
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: default_state_path(),
        }
    }
}
