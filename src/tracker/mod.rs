//! Task lifecycle tracking
//!
//! Records start in `processing`, take advisory progress updates while the
//! remote task runs, and move exactly once to `completed` or `failed`. The
//! once-only guard lives in the store (`TaskStore::finalize`), so concurrent
//! or duplicate continuations cannot overwrite a terminal record.

use serde::Serialize;
use std::sync::Arc;

use crate::client::RemoteTaskStatus;
use crate::constants::{PROGRESS_FINISHED, PROGRESS_PENDING, PROGRESS_PROCESSING};
use crate::metrics::Metrics;
use crate::model::{
    FailureKind, Operation, TaskRecord, TaskStatus, TerminalOutcome, Transition,
};
use crate::provenance::ProvenanceMatch;
use crate::store::{StoreError, TaskStore};

/// Progress to show for a remote status, given the current value
pub fn progress_for(status: &RemoteTaskStatus, current: u8) -> u8 {
    match status {
        RemoteTaskStatus::Pending => PROGRESS_PENDING,
        RemoteTaskStatus::Processing => PROGRESS_PROCESSING,
        RemoteTaskStatus::Finished => PROGRESS_FINISHED,
        RemoteTaskStatus::Failed | RemoteTaskStatus::Unknown(_) => current,
    }
}

/// Caller-facing view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub operation: Operation,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<String>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceMatch>,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            operation: record.operation,
            status: record.status,
            progress: record.progress,
            result: record.result.clone(),
            error_message: record.error_message.clone(),
            failure: record.failure,
            provenance: record.provenance.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TaskLifecycleTracker {
    store: Arc<dyn TaskStore>,
    metrics: Arc<Metrics>,
}

impl TaskLifecycleTracker {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::with_metrics(store, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(store: Arc<dyn TaskStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Persist a freshly submitted record
    pub async fn open(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        self.store.insert(record.clone()).await?;
        self.metrics
            .increment_tasks_submitted(record.operation.as_str());

        tracing::info!(
            task_id = %record.task_id,
            remote_task_id = %record.remote_task_id,
            operation = record.operation.as_str(),
            file_name = %record.file_name,
            "Task opened"
        );
        Ok(record)
    }

    /// Apply the progress implied by a remote status; returns the progress now stored
    pub async fn observe(
        &self,
        task_id: &str,
        remote: &RemoteTaskStatus,
    ) -> Result<u8, StoreError> {
        let record = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if record.is_terminal() {
            return Ok(record.progress);
        }

        let progress = progress_for(remote, record.progress);
        if self.store.update_progress(task_id, progress).await? {
            tracing::debug!(
                task_id = task_id,
                remote_status = %remote,
                progress,
                "Progress updated"
            );
        }
        Ok(progress)
    }

    pub async fn complete(
        &self,
        task_id: &str,
        result: String,
        provenance: Option<ProvenanceMatch>,
    ) -> Result<Transition, StoreError> {
        let transition = self
            .store
            .finalize(task_id, TerminalOutcome::Completed { result, provenance })
            .await?;

        match &transition {
            Transition::Applied(record) => {
                self.metrics
                    .increment_tasks_completed(record.operation.as_str());
                tracing::info!(
                    task_id = task_id,
                    operation = record.operation.as_str(),
                    "Task completed"
                );
            }
            Transition::AlreadyTerminal(status) => self.log_rejected(task_id, *status),
        }
        Ok(transition)
    }

    pub async fn fail(
        &self,
        task_id: &str,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Result<Transition, StoreError> {
        let message = message.into();
        let transition = self
            .store
            .finalize(
                task_id,
                TerminalOutcome::Failed {
                    kind,
                    message: message.clone(),
                },
            )
            .await?;

        match &transition {
            Transition::Applied(record) => {
                self.metrics
                    .increment_tasks_failed(record.operation.as_str(), kind.as_str());
                tracing::warn!(
                    task_id = task_id,
                    operation = record.operation.as_str(),
                    failure = kind.as_str(),
                    error = %message,
                    "Task failed"
                );
            }
            Transition::AlreadyTerminal(status) => self.log_rejected(task_id, *status),
        }
        Ok(transition)
    }

    fn log_rejected(&self, task_id: &str, status: TaskStatus) {
        self.metrics.increment_duplicate_terminal_writes();
        tracing::debug!(
            task_id = task_id,
            status = status.as_str(),
            "Terminal write ignored, task already terminal"
        );
    }

    pub async fn status(&self, task_id: &str) -> Result<Option<TaskStatusView>, StoreError> {
        Ok(self
            .store
            .get(task_id)
            .await?
            .map(|record| TaskStatusView::from(&record)))
    }

    pub async fn record(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(task_id).await
    }

    pub async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list().await
    }
}
