// Constants module - centralized default values for configuration
//
// Defaults used by the config layer and by components constructed without
// a config file (tests, library users).

// =============================================================================
// Remote service defaults
// =============================================================================

/// Path of the embed task creation endpoint
pub const EMBED_TASK_PATH: &str = "/dlp/file_process/add_watermark_task";

/// Path of the extract task creation endpoint
pub const EXTRACT_TASK_PATH: &str = "/dlp/file_process/extract_watermark_task";

/// Path of the task status endpoint
pub const QUERY_TASK_PATH: &str = "/dlp/file_process/task";

/// Default timeout for remote service calls in milliseconds
pub const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 10_000;

// =============================================================================
// Worker defaults
// =============================================================================

/// Default number of continuations allowed to poll concurrently
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 16;

/// Default delay before the first status poll in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default cap on the poll delay in milliseconds
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 30_000;

/// Default number of status polls before giving up
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;

/// Default time shutdown waits for cancelled continuations in milliseconds
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

// =============================================================================
// Storage defaults
// =============================================================================

/// Default timeout for fetching remote files in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Default directory processed files are written to
pub const DEFAULT_STORAGE_ROOT: &str = "data/files";

/// Default base URL processed files are published under
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080/files";

/// Default location of the JSON state snapshot
pub const DEFAULT_STATE_PATH: &str = "data/state.json";

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Provenance defaults
// =============================================================================

/// Namespace token every watermark id starts with
pub const DEFAULT_WATERMARK_NAMESPACE: &str = "WM";

/// Token placed in processed file names ahead of the id fragment
pub const DEFAULT_FILENAME_MARKER: &str = "_WM";

/// Number of id characters carried in a processed file name
pub const FILENAME_FRAGMENT_LEN: usize = 8;

/// Confidence of a filename-fragment match
pub const DEFAULT_FILENAME_CONFIDENCE: f64 = 0.95;

/// Confidence of a content-hash match
pub const DEFAULT_HASH_CONFIDENCE: f64 = 0.88;

// =============================================================================
// Progress mapping
// =============================================================================

/// Advisory progress while the remote task is queued
pub const PROGRESS_PENDING: u8 = 5;

/// Advisory progress while the remote task runs
pub const PROGRESS_PROCESSING: u8 = 50;

/// Progress of a completed task
pub const PROGRESS_FINISHED: u8 = 100;
