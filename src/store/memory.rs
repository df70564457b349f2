//! In-memory record stores

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{oldest_matching, StoreError, TaskStore, WatermarkContentStore};
use crate::model::{TaskRecord, TerminalOutcome, Transition, WatermarkContent};

/// Thread-safe in-memory task records
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    records: Arc<RwLock<HashMap<String, TaskRecord>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.task_id) {
            return Err(StoreError::Duplicate(record.task_id));
        }
        records.insert(record.task_id.clone(), record);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().get(task_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut all: Vec<TaskRecord> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update_progress(&self, task_id: &str, progress: u8) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        Ok(record.apply_progress(progress))
    }

    async fn finalize(
        &self,
        task_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Transition, StoreError> {
        // Check and write under one write lock
        let mut records = self.records.write();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        Ok(record.apply_terminal(outcome))
    }
}

/// Thread-safe in-memory watermark content records
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    contents: Arc<RwLock<HashMap<String, WatermarkContent>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.read().is_empty()
    }
}

#[async_trait]
impl WatermarkContentStore for MemoryContentStore {
    async fn insert(&self, content: WatermarkContent) -> Result<(), StoreError> {
        let mut contents = self.contents.write();
        if contents.contains_key(&content.watermark_id) {
            return Err(StoreError::Duplicate(content.watermark_id));
        }
        contents.insert(content.watermark_id.clone(), content);
        Ok(())
    }

    async fn remove(&self, watermark_id: &str) -> Result<bool, StoreError> {
        Ok(self.contents.write().remove(watermark_id).is_some())
    }

    async fn get(&self, watermark_id: &str) -> Result<Option<WatermarkContent>, StoreError> {
        Ok(self.contents.read().get(watermark_id).cloned())
    }

    async fn find_by_id_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<WatermarkContent>, StoreError> {
        let contents = self.contents.read();
        Ok(oldest_matching(contents.values(), |c| {
            c.watermark_id.starts_with(prefix)
        }))
    }

    async fn find_by_file_hash(&self, hash: &str) -> Result<Option<WatermarkContent>, StoreError> {
        let contents = self.contents.read();
        Ok(oldest_matching(contents.values(), |c| c.matches_hash(hash)))
    }

    async fn set_watermark_file_hash(
        &self,
        watermark_id: &str,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let mut contents = self.contents.write();
        let content = contents
            .get_mut(watermark_id)
            .ok_or_else(|| StoreError::NotFound(watermark_id.to_string()))?;
        if content.watermark_file_hash.is_some() {
            return Ok(false);
        }
        content.watermark_file_hash = Some(hash.to_string());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<WatermarkContent>, StoreError> {
        let mut all: Vec<WatermarkContent> = self.contents.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}
