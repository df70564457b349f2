// Metrics module - Prometheus-compatible counters for the pipeline
// Thread-safe via atomic operations and mutexes; shared as Arc<Metrics>

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Metrics struct tracks pipeline counters for Prometheus export
pub struct Metrics {
    // Submissions per operation (embed, extract)
    tasks_submitted: Mutex<BTreeMap<String, u64>>,

    // Terminal outcomes per operation
    tasks_completed: Mutex<BTreeMap<String, u64>>,

    // Failures keyed by "operation:failure_kind"
    tasks_failed: Mutex<BTreeMap<String, u64>>,

    // Terminal writes rejected because the record was already terminal
    duplicate_terminal_writes: AtomicU64,

    // Remote service calls keyed by outcome (success, status, timeout, transport)
    remote_calls: Mutex<BTreeMap<String, u64>>,

    status_polls: AtomicU64,

    // Provenance resolutions keyed by winning strategy ("none" when nothing matched)
    provenance_resolutions: Mutex<BTreeMap<String, u64>>,

    active_tasks: AtomicU64,
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: &str) {
    if let Ok(mut counts) = map.lock() {
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
}

fn read(map: &Mutex<BTreeMap<String, u64>>, key: &str) -> u64 {
    map.lock()
        .ok()
        .and_then(|counts| counts.get(key).copied())
        .unwrap_or(0)
}

fn export_labeled(
    output: &mut String,
    map: &Mutex<BTreeMap<String, u64>>,
    name: &str,
    help: &str,
    label: impl Fn(&str) -> String,
) {
    output.push_str(&format!("\n# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} counter\n", name));
    if let Ok(counts) = map.lock() {
        for (key, count) in counts.iter() {
            output.push_str(&format!("{}{{{}}} {}\n", name, label(key), count));
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            tasks_submitted: Mutex::new(BTreeMap::new()),
            tasks_completed: Mutex::new(BTreeMap::new()),
            tasks_failed: Mutex::new(BTreeMap::new()),
            duplicate_terminal_writes: AtomicU64::new(0),
            remote_calls: Mutex::new(BTreeMap::new()),
            status_polls: AtomicU64::new(0),
            provenance_resolutions: Mutex::new(BTreeMap::new()),
            active_tasks: AtomicU64::new(0),
        }
    }

    pub fn increment_tasks_submitted(&self, operation: &str) {
        bump(&self.tasks_submitted, operation);
    }

    pub fn increment_tasks_completed(&self, operation: &str) {
        bump(&self.tasks_completed, operation);
    }

    pub fn increment_tasks_failed(&self, operation: &str, kind: &str) {
        bump(&self.tasks_failed, &format!("{}:{}", operation, kind));
    }

    pub fn increment_duplicate_terminal_writes(&self) {
        self.duplicate_terminal_writes
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_remote_call(&self, outcome: &str) {
        bump(&self.remote_calls, outcome);
    }

    pub fn increment_status_polls(&self) {
        self.status_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_provenance_resolution(&self, strategy: &str) {
        bump(&self.provenance_resolutions, strategy);
    }

    pub fn increment_active_tasks(&self) {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_tasks(&self) {
        // Saturate at zero
        let _ = self
            .active_tasks
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn get_tasks_submitted(&self, operation: &str) -> u64 {
        read(&self.tasks_submitted, operation)
    }

    pub fn get_tasks_completed(&self, operation: &str) -> u64 {
        read(&self.tasks_completed, operation)
    }

    pub fn get_tasks_failed(&self, operation: &str, kind: &str) -> u64 {
        read(&self.tasks_failed, &format!("{}:{}", operation, kind))
    }

    pub fn get_duplicate_terminal_writes(&self) -> u64 {
        self.duplicate_terminal_writes.load(Ordering::Relaxed)
    }

    pub fn get_remote_calls(&self, outcome: &str) -> u64 {
        read(&self.remote_calls, outcome)
    }

    pub fn get_status_polls(&self) -> u64 {
        self.status_polls.load(Ordering::Relaxed)
    }

    pub fn get_provenance_resolutions(&self, strategy: &str) -> u64 {
        read(&self.provenance_resolutions, strategy)
    }

    pub fn get_active_tasks(&self) -> u64 {
        self.active_tasks.load(Ordering::Relaxed)
    }

    /// Export all metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        export_labeled(
            &mut output,
            &self.tasks_submitted,
            "watermark_tasks_submitted_total",
            "Tasks accepted by the pipeline",
            |op| format!("operation=\"{}\"", op),
        );
        export_labeled(
            &mut output,
            &self.tasks_completed,
            "watermark_tasks_completed_total",
            "Tasks finalized as completed",
            |op| format!("operation=\"{}\"", op),
        );
        export_labeled(
            &mut output,
            &self.tasks_failed,
            "watermark_tasks_failed_total",
            "Tasks finalized as failed",
            |key| {
                let (op, kind) = key.split_once(':').unwrap_or((key, ""));
                format!("operation=\"{}\",kind=\"{}\"", op, kind)
            },
        );

        output.push_str(
            "\n# HELP watermark_duplicate_terminal_writes_total \
             Terminal writes rejected on already terminal records\n",
        );
        output.push_str("# TYPE watermark_duplicate_terminal_writes_total counter\n");
        output.push_str(&format!(
            "watermark_duplicate_terminal_writes_total {}\n",
            self.duplicate_terminal_writes.load(Ordering::Relaxed)
        ));

        export_labeled(
            &mut output,
            &self.remote_calls,
            "watermark_remote_calls_total",
            "Calls to the remote watermark service by outcome",
            |outcome| format!("outcome=\"{}\"", outcome),
        );

        output.push_str("\n# HELP watermark_status_polls_total Remote status polls issued\n");
        output.push_str("# TYPE watermark_status_polls_total counter\n");
        output.push_str(&format!(
            "watermark_status_polls_total {}\n",
            self.status_polls.load(Ordering::Relaxed)
        ));

        export_labeled(
            &mut output,
            &self.provenance_resolutions,
            "watermark_provenance_resolutions_total",
            "Provenance resolutions by winning strategy",
            |strategy| format!("strategy=\"{}\"", strategy),
        );

        output.push_str("\n# HELP watermark_active_tasks Continuations currently running\n");
        output.push_str("# TYPE watermark_active_tasks gauge\n");
        output.push_str(&format!(
            "watermark_active_tasks {}\n",
            self.active_tasks.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
