// Record types shared by the tracker, the resolver and the stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::provenance::ProvenanceMatch;

/// Kind of remote job a task record tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Embed,
    Extract,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Embed => "embed",
            Operation::Extract => "extract",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task record.
///
/// `Pending` exists for compatibility with the record layout; dispatch is
/// synchronous with record creation, so records start in `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote service error or an explicit remote `failed` status
    Remote,
    /// Local error after acceptance (file fetch, storage, record store)
    Processing,
    /// Client-initiated cancel
    Cancelled,
    /// Polling gave up before the remote task settled
    TimedOut,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Remote => "remote",
            FailureKind::Processing => "processing",
            FailureKind::Cancelled => "cancelled",
            FailureKind::TimedOut => "timed_out",
        }
    }
}

/// One embedding event: the hidden payload and the hashes around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkContent {
    pub watermark_id: String,
    pub content: String,
    pub biz_id: String,
    pub original_file_hash: String,
    /// Hash of the processed file, written once by the embed continuation
    pub watermark_file_hash: Option<String>,
    pub policy_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WatermarkContent {
    pub fn new(
        watermark_id: String,
        content: String,
        biz_id: String,
        original_file_hash: String,
        policy_id: Option<String>,
    ) -> Self {
        Self {
            watermark_id,
            content,
            biz_id,
            original_file_hash,
            watermark_file_hash: None,
            policy_id,
            created_at: Utc::now(),
        }
    }

    /// True if either recorded hash equals `hash`
    pub fn matches_hash(&self, hash: &str) -> bool {
        self.original_file_hash == hash || self.watermark_file_hash.as_deref() == Some(hash)
    }
}

/// Generate a watermark id: `namespace` followed by 32 lowercase hex chars
pub fn generate_watermark_id(namespace: &str) -> String {
    format!("{}{}", namespace, Uuid::new_v4().simple())
}

/// One submitted embed or extract operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub remote_task_id: String,
    pub operation: Operation,
    pub file_name: String,
    pub file_size: u64,
    pub original_file_hash: String,
    pub status: TaskStatus,
    pub progress: u8,
    /// Download URL (embed) or extracted text (extract); set on completion
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub failure: Option<FailureKind>,
    pub policy_id: Option<String>,
    pub watermark_id: Option<String>,
    pub provenance: Option<ProvenanceMatch>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// New record in `Processing` with progress 0
    pub fn processing(
        operation: Operation,
        remote_task_id: String,
        file_name: String,
        file_size: u64,
        original_file_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            remote_task_id,
            operation,
            file_name,
            file_size,
            original_file_hash,
            status: TaskStatus::Processing,
            progress: 0,
            result: None,
            error_message: None,
            failure: None,
            policy_id: None,
            watermark_id: None,
            provenance: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a progress update. Ignored (returns false) once terminal.
    pub fn apply_progress(&mut self, progress: u8) -> bool {
        if self.is_terminal() || self.progress == progress {
            return false;
        }
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
        true
    }

    /// Apply a terminal outcome if and only if the record is `Processing`.
    ///
    /// This is the single guard behind "at most one terminal transition";
    /// every store implementation routes terminal writes through it.
    pub fn apply_terminal(&mut self, outcome: TerminalOutcome) -> Transition {
        if self.status != TaskStatus::Processing {
            return Transition::AlreadyTerminal(self.status);
        }

        match outcome {
            TerminalOutcome::Completed { result, provenance } => {
                self.status = TaskStatus::Completed;
                self.progress = 100;
                self.result = Some(result);
                self.provenance = provenance;
            }
            TerminalOutcome::Failed { kind, message } => {
                // progress keeps its last observed value
                self.status = TaskStatus::Failed;
                self.failure = Some(kind);
                self.error_message = Some(message);
            }
        }
        self.updated_at = Utc::now();

        Transition::Applied(Box::new(self.clone()))
    }
}

/// Terminal write requested by a continuation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed {
        result: String,
        provenance: Option<ProvenanceMatch>,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Result of a terminal write
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The write happened; carries the record as stored
    Applied(Box<TaskRecord>),
    /// The record was not `Processing`; nothing changed
    AlreadyTerminal(TaskStatus),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}
