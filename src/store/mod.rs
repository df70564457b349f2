//! Record repositories
//!
//! The pipeline never talks to a database directly. It is handed a
//! `TaskStore` and a `WatermarkContentStore`; the in-memory implementation
//! backs tests and short-lived runs, the JSON snapshot implementation keeps
//! state between CLI invocations.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::{MemoryContentStore, MemoryTaskStore};

use async_trait::async_trait;

use crate::model::{TaskRecord, TerminalOutcome, Transition, WatermarkContent};

/// Record store error types
#[derive(Debug)]
pub enum StoreError {
    /// No record with this id
    NotFound(String),
    /// A record with this id already exists
    Duplicate(String),
    /// I/O error (snapshot store)
    IoError(std::io::Error),
    /// Snapshot could not be (de)serialized
    SerializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Record not found: {}", id),
            StoreError::Duplicate(id) => write!(f, "Record already exists: {}", id),
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

/// Task record repository
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Get a record by local task id
    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// All records, oldest first
    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Update progress of a non-terminal record.
    /// Returns false when the record is terminal or the value is unchanged.
    async fn update_progress(&self, task_id: &str, progress: u8) -> Result<bool, StoreError>;

    /// Compare-and-set terminal write: applies only while the record is
    /// `Processing`, otherwise returns `Transition::AlreadyTerminal`.
    async fn finalize(
        &self,
        task_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Transition, StoreError>;
}

/// Watermark content repository
#[async_trait]
pub trait WatermarkContentStore: Send + Sync {
    /// Insert a new content record. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, content: WatermarkContent) -> Result<(), StoreError>;

    /// Remove a content record. Returns false if there was none.
    async fn remove(&self, watermark_id: &str) -> Result<bool, StoreError>;

    /// Get a content record by watermark id
    async fn get(&self, watermark_id: &str) -> Result<Option<WatermarkContent>, StoreError>;

    /// Oldest record whose id starts with `prefix`
    async fn find_by_id_prefix(&self, prefix: &str)
        -> Result<Option<WatermarkContent>, StoreError>;

    /// Oldest record whose original or watermarked file hash equals `hash`
    async fn find_by_file_hash(&self, hash: &str) -> Result<Option<WatermarkContent>, StoreError>;

    /// Set the post-embed file hash. Written once: returns false if already set.
    async fn set_watermark_file_hash(
        &self,
        watermark_id: &str,
        hash: &str,
    ) -> Result<bool, StoreError>;

    /// All records, oldest first
    async fn list(&self) -> Result<Vec<WatermarkContent>, StoreError>;
}

/// Pick the oldest matching content record (ties broken by id)
pub(crate) fn oldest_matching<'a, I, F>(contents: I, predicate: F) -> Option<WatermarkContent>
where
    I: Iterator<Item = &'a WatermarkContent>,
    F: Fn(&WatermarkContent) -> bool,
{
    contents
        .filter(|c| predicate(c))
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.watermark_id.cmp(&b.watermark_id))
        })
        .cloned()
}
