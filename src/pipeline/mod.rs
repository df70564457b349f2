// Watermark pipeline - the local-facing operations
//
// Submission (fetch, hash, policy selection, signed remote creation, record
// creation) runs on the caller's task. An error before the remote service
// accepts the task leaves nothing recorded. Everything after that runs as a
// worker pool continuation which owns the task's terminal write.

mod continuation;

use std::sync::Arc;
use std::time::Duration;

use crate::client::{RemoteServiceError, WatermarkService};
use crate::config::{Config, ConfigError, StoreConfig};
use crate::constants::{
    DEFAULT_FILENAME_CONFIDENCE, DEFAULT_HASH_CONFIDENCE, DEFAULT_MAX_CONCURRENT_TASKS,
    DEFAULT_SHUTDOWN_GRACE_MS,
};
use crate::error::PipelineError;
use crate::metrics::Metrics;
use crate::model::{generate_watermark_id, FailureKind, Operation, TaskRecord, WatermarkContent};
use crate::policy::{PolicyAdaptation, PolicyAdapter, Sensitivity};
use crate::provenance::{FilenameTag, ProvenanceMatch, ProvenanceResolver};
use crate::storage::{FetchedFile, FileStorage};
use crate::store::{
    JsonFileStore, MemoryContentStore, MemoryTaskStore, StoreError, TaskStore,
    WatermarkContentStore,
};
use crate::tracker::{TaskLifecycleTracker, TaskStatusView};
use crate::worker::{PollSchedule, TaskWorkerPool};

use continuation::{Job, JobKind};

/// How often `wait_for_terminal` re-reads the record
const WAIT_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub poll: PollSchedule,
    pub default_sensitivity: Sensitivity,
    pub shutdown_grace: Duration,
}

pub(crate) struct PipelineInner {
    pub service: Arc<dyn WatermarkService>,
    pub storage: Arc<dyn FileStorage>,
    pub contents: Arc<dyn WatermarkContentStore>,
    pub tracker: TaskLifecycleTracker,
    pub resolver: ProvenanceResolver,
    pub policies: PolicyAdapter,
    pub tag: FilenameTag,
    pub pool: TaskWorkerPool,
    pub metrics: Arc<Metrics>,
    pub settings: PipelineSettings,
}

impl PipelineInner {
    pub fn record_remote_call<T>(&self, result: &Result<T, RemoteServiceError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(RemoteServiceError::Status { .. }) => "status",
            Err(RemoteServiceError::Timeout { .. }) => "timeout",
            Err(RemoteServiceError::Transport(_)) => "transport",
            Err(RemoteServiceError::MissingTaskId(_)) => "missing_task_id",
            Err(_) => "error",
        };
        self.metrics.increment_remote_call(outcome);
    }

    pub async fn resolve(&self, file: &FetchedFile) -> Result<ProvenanceMatch, StoreError> {
        let found = self.resolver.resolve(file).await?;
        let strategy = found.strategy.map(|s| s.as_str()).unwrap_or("none");
        self.metrics.increment_provenance_resolution(strategy);
        Ok(found)
    }
}

/// Entry point for embedding, extracting, and resolving watermarks
#[derive(Clone)]
pub struct WatermarkPipeline {
    inner: Arc<PipelineInner>,
}

impl WatermarkPipeline {
    pub fn builder(
        service: Arc<dyn WatermarkService>,
        storage: Arc<dyn FileStorage>,
    ) -> WatermarkPipelineBuilder {
        WatermarkPipelineBuilder::new(service, storage)
    }

    /// Assemble a pipeline from a validated configuration
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let service = Arc::new(config.service.to_client()?);
        let storage = Arc::new(config.storage.to_file_storage()?);

        let (tasks, contents): (Arc<dyn TaskStore>, Arc<dyn WatermarkContentStore>) =
            match &config.store {
                StoreConfig::Memory => {
                    let tasks: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
                    let contents: Arc<dyn WatermarkContentStore> =
                        Arc::new(MemoryContentStore::new());
                    (tasks, contents)
                }
                StoreConfig::File { path } => {
                    let store = Arc::new(JsonFileStore::open(path).await?);
                    tracing::info!(path = %store.path().display(), "Opened record store");
                    let tasks: Arc<dyn TaskStore> = store.clone();
                    let contents: Arc<dyn WatermarkContentStore> = store;
                    (tasks, contents)
                }
            };

        let tag = config
            .provenance
            .to_filename_tag()
            .map_err(|e| ConfigError::Invalid(format!("provenance.filename_marker: {}", e)))?;
        let policies = config.policy.to_adapter();
        let default_sensitivity = config.policy.default_sensitivity(&policies);

        Self::builder(service, storage)
            .stores(tasks, contents)
            .policy_adapter(policies)
            .default_sensitivity(default_sensitivity)
            .filename_tag(tag)
            .confidences(
                config.provenance.filename_confidence,
                config.provenance.hash_confidence,
            )
            .poll_schedule(config.worker.to_poll_schedule())
            .max_concurrent_tasks(config.worker.max_concurrent_tasks)
            .shutdown_grace(config.worker.shutdown_grace())
            .build()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn policies(&self) -> &PolicyAdapter {
        &self.inner.policies
    }

    /// Submit an embed task and return its local task id
    ///
    /// Without `policy_id` the policy is adapted from the file's extension at
    /// the default sensitivity.
    pub async fn embed(
        &self,
        file_url: &str,
        content: &str,
        policy_id: Option<&str>,
    ) -> Result<String, PipelineError> {
        if file_url.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("file_url cannot be empty".into()));
        }
        if content.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "watermark content cannot be empty".into(),
            ));
        }

        let inner = &self.inner;
        let file = inner.storage.fetch(file_url).await?;
        let file_type = file.extension().ok_or_else(|| {
            PipelineError::InvalidRequest(format!("file '{}' has no extension", file.name))
        })?;
        let adaptation =
            inner
                .policies
                .for_embed(policy_id, &file_type, inner.settings.default_sensitivity)?;

        let watermark_id = generate_watermark_id(inner.tag.namespace());
        let original_hash = file.content_hash();

        let created = inner
            .service
            .create_embed_task(file_url, content, &watermark_id)
            .await;
        inner.record_remote_call(&created);
        let remote_task_id = created?;

        inner
            .contents
            .insert(WatermarkContent::new(
                watermark_id.clone(),
                content.to_string(),
                watermark_id.clone(),
                original_hash.clone(),
                Some(adaptation.policy_id.clone()),
            ))
            .await?;

        let mut record = TaskRecord::processing(
            Operation::Embed,
            remote_task_id.clone(),
            file.name.clone(),
            file.size(),
            original_hash,
        );
        record.policy_id = Some(adaptation.policy_id.clone());
        record.watermark_id = Some(watermark_id.clone());
        let record = match inner.tracker.open(record).await {
            Ok(record) => record,
            Err(err) => {
                // A content record without its task could never be completed
                if let Err(e) = inner.contents.remove(&watermark_id).await {
                    tracing::warn!(
                        watermark_id = %watermark_id,
                        error = %e,
                        "Failed to remove content record of unopened task"
                    );
                }
                return Err(err.into());
            }
        };

        tracing::info!(
            task_id = %record.task_id,
            watermark_id = %watermark_id,
            policy_id = %adaptation.policy_id,
            embed_depth = adaptation.embed_depth,
            "Embed task submitted"
        );

        self.spawn(Job {
            task_id: record.task_id.clone(),
            remote_task_id,
            kind: JobKind::Embed {
                watermark_id,
                file_name: file.name,
            },
        })
        .await?;
        Ok(record.task_id)
    }

    /// Submit an extract task and return its local task id
    pub async fn extract(&self, file_url: &str) -> Result<String, PipelineError> {
        if file_url.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("file_url cannot be empty".into()));
        }

        let inner = &self.inner;
        let file = inner.storage.fetch(file_url).await?;

        // The local id doubles as the remote biz_id, so the record is built first
        let mut record = TaskRecord::processing(
            Operation::Extract,
            String::new(),
            file.name.clone(),
            file.size(),
            file.content_hash(),
        );

        let created = inner
            .service
            .create_extract_task(file_url, &record.task_id)
            .await;
        inner.record_remote_call(&created);
        record.remote_task_id = created?;

        let record = inner.tracker.open(record).await?;
        tracing::info!(task_id = %record.task_id, "Extract task submitted");

        self.spawn(Job {
            task_id: record.task_id.clone(),
            remote_task_id: record.remote_task_id.clone(),
            kind: JobKind::Extract { file },
        })
        .await?;
        Ok(record.task_id)
    }

    async fn spawn(&self, job: Job) -> Result<(), PipelineError> {
        let task_id = job.task_id.clone();
        let inner = self.inner.clone();

        let submitted = self
            .inner
            .pool
            .submit(&task_id, move |token| continuation::run(inner, job, token));

        if let Err(err) = submitted {
            // Accepted remotely but never going to be followed up
            self.inner
                .tracker
                .fail(&task_id, FailureKind::Cancelled, err.to_string())
                .await?;
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn get_status(&self, task_id: &str) -> Result<TaskStatusView, PipelineError> {
        self.inner
            .tracker
            .status(task_id)
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))
    }

    pub async fn get_record(&self, task_id: &str) -> Result<TaskRecord, PipelineError> {
        self.inner
            .tracker
            .record(task_id)
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))
    }

    /// Which watermark, if any, `file` carries. No evidence is a
    /// zero-confidence answer, not an error.
    pub async fn resolve_provenance(
        &self,
        file: &FetchedFile,
    ) -> Result<ProvenanceMatch, PipelineError> {
        Ok(self.inner.resolve(file).await?)
    }

    pub async fn resolve_provenance_url(
        &self,
        file_url: &str,
    ) -> Result<ProvenanceMatch, PipelineError> {
        let file = self.inner.storage.fetch(file_url).await?;
        self.resolve_provenance(&file).await
    }

    /// Cancel a task and wait for its terminal write
    ///
    /// Returns true only if the task ended up failed as cancelled. A
    /// continuation that had already finished its work may still record
    /// completion, in which case this returns false. A task with no
    /// continuation in this process (e.g. loaded from a snapshot) is failed
    /// directly.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, PipelineError> {
        let record = self.get_record(task_id).await?;
        if record.is_terminal() {
            return Ok(false);
        }

        if self.inner.pool.cancel(task_id) {
            let view = self.wait_for_terminal(task_id).await?;
            return Ok(view.failure == Some(FailureKind::Cancelled));
        }

        let transition = self
            .inner
            .tracker
            .fail(task_id, FailureKind::Cancelled, "task was cancelled")
            .await?;
        Ok(transition.is_applied())
    }

    /// Wait until the task reaches a terminal state
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the task is not terminal and no continuation in
    /// this process will ever finish it.
    pub async fn wait_for_terminal(&self, task_id: &str) -> Result<TaskStatusView, PipelineError> {
        loop {
            let view = self.get_status(task_id).await?;
            if view.status.is_terminal() {
                return Ok(view);
            }

            if !self.inner.pool.is_running(task_id) {
                // The continuation may have finished between the two reads
                let view = self.get_status(task_id).await?;
                if view.status.is_terminal() {
                    return Ok(view);
                }
                return Err(PipelineError::InvalidRequest(format!(
                    "task {} has no running continuation",
                    task_id
                )));
            }

            tokio::time::sleep(WAIT_INTERVAL).await;
        }
    }

    pub fn adapt_policy(
        &self,
        file_type: &str,
        sensitivity: Sensitivity,
    ) -> Result<PolicyAdaptation, PipelineError> {
        Ok(self.inner.policies.adapt(file_type, sensitivity)?)
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, PipelineError> {
        Ok(self.inner.tracker.list().await?)
    }

    pub async fn list_contents(&self) -> Result<Vec<WatermarkContent>, PipelineError> {
        Ok(self.inner.contents.list().await?)
    }

    /// Cancel in-flight continuations and wait for them to record it
    ///
    /// Returns false if some were still running after the grace period.
    pub async fn shutdown(&self) -> bool {
        self.inner
            .pool
            .shutdown(self.inner.settings.shutdown_grace)
            .await
    }
}

/// Builder for WatermarkPipeline
pub struct WatermarkPipelineBuilder {
    service: Arc<dyn WatermarkService>,
    storage: Arc<dyn FileStorage>,
    tasks: Option<Arc<dyn TaskStore>>,
    contents: Option<Arc<dyn WatermarkContentStore>>,
    policies: PolicyAdapter,
    default_sensitivity: Option<Sensitivity>,
    tag: FilenameTag,
    filename_confidence: f64,
    hash_confidence: f64,
    poll: PollSchedule,
    max_concurrent_tasks: usize,
    shutdown_grace: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl WatermarkPipelineBuilder {
    pub fn new(service: Arc<dyn WatermarkService>, storage: Arc<dyn FileStorage>) -> Self {
        Self {
            service,
            storage,
            tasks: None,
            contents: None,
            policies: PolicyAdapter::default(),
            default_sensitivity: None,
            tag: FilenameTag::default(),
            filename_confidence: DEFAULT_FILENAME_CONFIDENCE,
            hash_confidence: DEFAULT_HASH_CONFIDENCE,
            poll: PollSchedule::default(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            metrics: None,
        }
    }

    /// Record stores; in-memory stores are used when not set
    pub fn stores(
        mut self,
        tasks: Arc<dyn TaskStore>,
        contents: Arc<dyn WatermarkContentStore>,
    ) -> Self {
        self.tasks = Some(tasks);
        self.contents = Some(contents);
        self
    }

    pub fn policy_adapter(mut self, policies: PolicyAdapter) -> Self {
        self.policies = policies;
        self
    }

    pub fn default_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.default_sensitivity = Some(sensitivity);
        self
    }

    pub fn filename_tag(mut self, tag: FilenameTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn confidences(mut self, filename: f64, hash: f64) -> Self {
        self.filename_confidence = filename;
        self.hash_confidence = hash;
        self
    }

    pub fn poll_schedule(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }

    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<WatermarkPipeline, PipelineError> {
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(Metrics::new()));
        let tasks: Arc<dyn TaskStore> = match self.tasks {
            Some(tasks) => tasks,
            None => Arc::new(MemoryTaskStore::new()),
        };
        let contents: Arc<dyn WatermarkContentStore> = match self.contents {
            Some(contents) => contents,
            None => Arc::new(MemoryContentStore::new()),
        };

        let pool = TaskWorkerPool::with_metrics(self.max_concurrent_tasks, metrics.clone())?;
        let tracker = TaskLifecycleTracker::with_metrics(tasks, metrics.clone());
        let resolver = ProvenanceResolver::new(
            contents.clone(),
            self.tag.clone(),
            self.filename_confidence,
            self.hash_confidence,
        );
        let default_sensitivity = self
            .default_sensitivity
            .unwrap_or_else(|| self.policies.default_sensitivity());

        Ok(WatermarkPipeline {
            inner: Arc::new(PipelineInner {
                service: self.service,
                storage: self.storage,
                contents,
                tracker,
                resolver,
                policies: self.policies,
                tag: self.tag,
                pool,
                metrics,
                settings: PipelineSettings {
                    poll: self.poll,
                    default_sensitivity,
                    shutdown_grace: self.shutdown_grace,
                },
            }),
        })
    }
}
