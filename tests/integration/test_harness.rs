// Test harness for integration tests
// Provides an in-process stand-in for the DLP service and a temp-dir file store

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use shirushi::client::{RemoteServiceError, RemoteTaskState, ResponseBody, WatermarkService};
use shirushi::pipeline::WatermarkPipeline;
use shirushi::storage::{FileStorage, LocalFileStorage};
use shirushi::worker::PollSchedule;

pub const PUBLIC_BASE_URL: &str = "http://files.test/wm";

/// Marker the fake service appends to "watermarked" files
const EMBED_MARKER: &str = "\n--wm:";

/// How the fake service answers status queries
#[derive(Debug, Clone)]
pub enum Behavior {
    /// `processing` for the given number of polls, then finished
    FinishAfter(usize),
    /// `processing` for the given number of polls, then failed with a message
    FailAfter(usize, String),
    /// Never settles
    Stall,
    /// Transient 503s for the given number of polls, then finished
    FlakyThenFinish(usize),
    /// Non-transient 400 on the first poll
    Reject,
}

struct RemoteTask {
    kind: RemoteKind,
    polls: usize,
}

enum RemoteKind {
    Embed { file_url: String, biz_id: String },
    Extract { file_url: String },
}

/// Fake watermark service that really "embeds" by appending a marker
pub struct FakeDlpService {
    storage: Arc<LocalFileStorage>,
    work_dir: PathBuf,
    behavior: Mutex<Behavior>,
    tasks: Mutex<HashMap<String, RemoteTask>>,
    contents: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
    pub queries: AtomicUsize,
}

impl FakeDlpService {
    fn new(storage: Arc<LocalFileStorage>, work_dir: PathBuf, behavior: Behavior) -> Self {
        Self {
            storage,
            work_dir,
            behavior: Mutex::new(behavior),
            tasks: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn created_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    fn register(&self, kind: RemoteKind) -> String {
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tasks
            .lock()
            .insert(id.clone(), RemoteTask { kind, polls: 0 });
        id
    }

    async fn finished(&self, task_id: &str) -> Result<RemoteTaskState, RemoteServiceError> {
        let kind = {
            let tasks = self.tasks.lock();
            match tasks.get(task_id).map(|t| &t.kind) {
                Some(RemoteKind::Embed { file_url, biz_id }) => {
                    (file_url.clone(), Some(biz_id.clone()))
                }
                Some(RemoteKind::Extract { file_url }) => (file_url.clone(), None),
                None => return Ok(state(json!({"code": 404, "message": "no such task"}))),
            }
        };

        let (file_url, biz_id) = kind;
        let file = self
            .storage
            .fetch(&file_url)
            .await
            .map_err(|e| RemoteServiceError::Transport(e.to_string()))?;

        match biz_id {
            Some(biz_id) => {
                let processed = self.work_dir.join(format!("{}-{}", task_id, file.name));
                let mut bytes = file.bytes.to_vec();
                bytes.extend_from_slice(format!("{}{}", EMBED_MARKER, biz_id).as_bytes());
                tokio::fs::write(&processed, bytes)
                    .await
                    .map_err(|e| RemoteServiceError::Transport(e.to_string()))?;

                Ok(state(json!({
                    "code": 0,
                    "data": {
                        "status": "finished",
                        "result": {"file_url": format!("file://{}", processed.display())}
                    }
                })))
            }
            None => {
                let text = String::from_utf8_lossy(&file.bytes).into_owned();
                let content = text
                    .rsplit_once(EMBED_MARKER)
                    .and_then(|(_, id)| self.contents.lock().get(id.trim()).cloned())
                    .unwrap_or_default();

                Ok(state(json!({
                    "code": 0,
                    "data": {"status": "finished", "result": {"content": content}}
                })))
            }
        }
    }
}

fn state(body: serde_json::Value) -> RemoteTaskState {
    RemoteTaskState::from_body(ResponseBody::Structured(body))
}

fn processing() -> RemoteTaskState {
    state(json!({"code": 0, "data": {"status": "processing"}}))
}

#[async_trait]
impl WatermarkService for FakeDlpService {
    async fn create_embed_task(
        &self,
        file_url: &str,
        content: &str,
        biz_id: &str,
    ) -> Result<String, RemoteServiceError> {
        self.contents
            .lock()
            .insert(biz_id.to_string(), content.to_string());
        Ok(self.register(RemoteKind::Embed {
            file_url: file_url.to_string(),
            biz_id: biz_id.to_string(),
        }))
    }

    async fn create_extract_task(
        &self,
        file_url: &str,
        _biz_id: &str,
    ) -> Result<String, RemoteServiceError> {
        Ok(self.register(RemoteKind::Extract {
            file_url: file_url.to_string(),
        }))
    }

    async fn query_task(&self, task_id: &str) -> Result<RemoteTaskState, RemoteServiceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let polls = {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(task_id) {
                Some(task) => {
                    task.polls += 1;
                    task.polls
                }
                None => 0,
            }
        };

        let behavior = self.behavior.lock().clone();
        match behavior {
            Behavior::FinishAfter(n) if polls > n => self.finished(task_id).await,
            Behavior::FinishAfter(_) => Ok(processing()),
            Behavior::FailAfter(n, message) if polls > n => Ok(state(json!({
                "code": 0,
                "data": {"status": "failed", "message": message}
            }))),
            Behavior::FailAfter(..) => Ok(processing()),
            Behavior::Stall => Ok(processing()),
            Behavior::FlakyThenFinish(n) if polls > n => self.finished(task_id).await,
            Behavior::FlakyThenFinish(_) => Err(RemoteServiceError::Status {
                status: 503,
                body: ResponseBody::Raw("upstream busy".to_string()),
            }),
            Behavior::Reject => Err(RemoteServiceError::Status {
                status: 400,
                body: ResponseBody::Structured(json!({"message": "bad signature"})),
            }),
        }
    }
}

/// Pipeline wired to a fake service over a temporary directory
pub struct PipelineHarness {
    pub dir: TempDir,
    pub service: Arc<FakeDlpService>,
    pub storage: Arc<LocalFileStorage>,
    pub pipeline: WatermarkPipeline,
}

impl PipelineHarness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_poll(behavior, fast_poll())
    }

    pub fn with_poll(behavior: Behavior, poll: PollSchedule) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let (storage, service) = Self::parts(&dir, behavior);
        let pipeline = WatermarkPipeline::builder(service.clone(), storage.clone())
            .poll_schedule(poll)
            .build()
            .expect("Failed to build pipeline");

        Self {
            dir,
            service,
            storage,
            pipeline,
        }
    }

    /// Storage and fake service rooted in `dir`
    pub fn parts(
        dir: &TempDir,
        behavior: Behavior,
    ) -> (Arc<LocalFileStorage>, Arc<FakeDlpService>) {
        let remote_dir = dir.path().join("remote");
        std::fs::create_dir_all(&remote_dir).expect("Failed to create remote dir");

        let storage = Arc::new(
            LocalFileStorage::with_default_timeout(dir.path().join("published"), PUBLIC_BASE_URL)
                .expect("Failed to create storage"),
        );
        let service = Arc::new(FakeDlpService::new(storage.clone(), remote_dir, behavior));
        (storage, service)
    }

    /// Write an input file and return its `file://` URL
    pub fn input_file(&self, name: &str, bytes: &[u8]) -> String {
        write_input(&self.dir, name, bytes)
    }
}

pub fn write_input(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).expect("Failed to create input dir");
    let path = inputs.join(name);
    std::fs::write(&path, bytes).expect("Failed to write input file");
    format!("file://{}", path.display())
}

pub fn fast_poll() -> PollSchedule {
    PollSchedule::new(1, 4, 50)
}
