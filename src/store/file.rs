//! JSON snapshot store
//!
//! Keeps every record in memory and rewrites a single JSON snapshot after
//! each mutation (write to a temp file, then rename). Mutations are
//! serialized by one async mutex, so the snapshot on disk always reflects
//! the latest write. A mutation whose snapshot write fails is undone, so
//! memory never holds state the file does not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{oldest_matching, StoreError, TaskStore, WatermarkContentStore};
use crate::model::{TaskRecord, TerminalOutcome, Transition, WatermarkContent};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    tasks: HashMap<String, TaskRecord>,
    #[serde(default)]
    contents: HashMap<String, WatermarkContent>,
}

/// File-backed store implementing both repositories
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if the file does not exist
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Snapshot::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            contents = snapshot.contents.len(),
            "Record snapshot loaded"
        );

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Persist `state`, applying `undo` to it if the write fails
    async fn persist_or_undo<F>(&self, state: &mut Snapshot, undo: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Snapshot) + Send,
    {
        match self.persist(state).await {
            Ok(()) => Ok(()),
            Err(err) => {
                undo(state);
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Snapshot write failed, change rolled back"
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&record.task_id) {
            return Err(StoreError::Duplicate(record.task_id));
        }
        let task_id = record.task_id.clone();
        state.tasks.insert(task_id.clone(), record);
        self.persist_or_undo(&mut state, move |s| {
            s.tasks.remove(&task_id);
        })
        .await
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.tasks.get(task_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut all: Vec<TaskRecord> = state.tasks.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update_progress(&self, task_id: &str, progress: u8) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        let previous = record.clone();
        if !record.apply_progress(progress) {
            return Ok(false);
        }
        self.persist_or_undo(&mut state, move |s| {
            s.tasks.insert(previous.task_id.clone(), previous);
        })
        .await?;
        Ok(true)
    }

    async fn finalize(
        &self,
        task_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        let previous = record.clone();
        let transition = record.apply_terminal(outcome);
        if transition.is_applied() {
            self.persist_or_undo(&mut state, move |s| {
                s.tasks.insert(previous.task_id.clone(), previous);
            })
            .await?;
        }
        Ok(transition)
    }
}

#[async_trait]
impl WatermarkContentStore for JsonFileStore {
    async fn insert(&self, content: WatermarkContent) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.contents.contains_key(&content.watermark_id) {
            return Err(StoreError::Duplicate(content.watermark_id));
        }
        let watermark_id = content.watermark_id.clone();
        state.contents.insert(watermark_id.clone(), content);
        self.persist_or_undo(&mut state, move |s| {
            s.contents.remove(&watermark_id);
        })
        .await
    }

    async fn remove(&self, watermark_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(removed) = state.contents.remove(watermark_id) else {
            return Ok(false);
        };
        self.persist_or_undo(&mut state, move |s| {
            s.contents.insert(removed.watermark_id.clone(), removed);
        })
        .await?;
        Ok(true)
    }

    async fn get(&self, watermark_id: &str) -> Result<Option<WatermarkContent>, StoreError> {
        Ok(self.state.lock().await.contents.get(watermark_id).cloned())
    }

    async fn find_by_id_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<WatermarkContent>, StoreError> {
        let state = self.state.lock().await;
        Ok(oldest_matching(state.contents.values(), |c| {
            c.watermark_id.starts_with(prefix)
        }))
    }

    async fn find_by_file_hash(&self, hash: &str) -> Result<Option<WatermarkContent>, StoreError> {
        let state = self.state.lock().await;
        Ok(oldest_matching(state.contents.values(), |c| {
            c.matches_hash(hash)
        }))
    }

    async fn set_watermark_file_hash(
        &self,
        watermark_id: &str,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let content = state
            .contents
            .get_mut(watermark_id)
            .ok_or_else(|| StoreError::NotFound(watermark_id.to_string()))?;
        if content.watermark_file_hash.is_some() {
            return Ok(false);
        }
        content.watermark_file_hash = Some(hash.to_string());
        let watermark_id = watermark_id.to_string();
        self.persist_or_undo(&mut state, move |s| {
            if let Some(content) = s.contents.get_mut(&watermark_id) {
                content.watermark_file_hash = None;
            }
        })
        .await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<WatermarkContent>, StoreError> {
        let state = self.state.lock().await;
        let mut all: Vec<WatermarkContent> = state.contents.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}
