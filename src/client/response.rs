//! Remote service responses
//!
//! The service answers with JSON most of the time, but gateways in front of
//! it do not. Bodies are kept as `ResponseBody::Structured` when they parse
//! and `ResponseBody::Raw` otherwise, so callers must handle both.

use serde_json::{json, Value};
use std::fmt;

/// Maximum number of raw body characters shown in error messages
const DISPLAY_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Structured(Value),
    Raw(String),
}

impl ResponseBody {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => ResponseBody::Structured(value),
            Err(_) => ResponseBody::Raw(text.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Structured(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    /// JSON view of the body; raw text is preserved under `raw`
    pub fn to_json(&self) -> Value {
        match self {
            ResponseBody::Structured(value) => value.clone(),
            ResponseBody::Raw(text) => json!({ "raw": text }),
        }
    }

    /// Look up `name` at the top level, then inside a `data` envelope
    pub fn field(&self, name: &str) -> Option<&Value> {
        let json = self.as_json()?;
        json.get(name)
            .filter(|v| !v.is_null())
            .or_else(|| json.get("data").and_then(|d| d.get(name)))
            .filter(|v| !v.is_null())
    }

    /// String or numeric field as text; empty strings count as absent
    pub fn text_field(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn task_id(&self) -> Option<String> {
        self.text_field("task_id")
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Structured(value) => write!(f, "{}", value),
            ResponseBody::Raw(text) if text.chars().count() > DISPLAY_LIMIT => {
                let truncated: String = text.chars().take(DISPLAY_LIMIT).collect();
                write!(f, "{}...", truncated)
            }
            ResponseBody::Raw(text) => f.write_str(text),
        }
    }
}

/// Coarse task status reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTaskStatus {
    Pending,
    Processing,
    Finished,
    Failed,
    /// Missing, unrecognized, or unparsable; treated as transient
    Unknown(String),
}

impl RemoteTaskStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => RemoteTaskStatus::Pending,
            "processing" => RemoteTaskStatus::Processing,
            "finished" => RemoteTaskStatus::Finished,
            "failed" => RemoteTaskStatus::Failed,
            _ => RemoteTaskStatus::Unknown(status.to_string()),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, RemoteTaskStatus::Finished | RemoteTaskStatus::Failed)
    }
}

impl fmt::Display for RemoteTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteTaskStatus::Pending => f.write_str("pending"),
            RemoteTaskStatus::Processing => f.write_str("processing"),
            RemoteTaskStatus::Finished => f.write_str("finished"),
            RemoteTaskStatus::Failed => f.write_str("failed"),
            RemoteTaskStatus::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// Parsed answer of a status query
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTaskState {
    pub status: RemoteTaskStatus,
    pub result: Option<Value>,
    pub message: Option<String>,
    pub body: ResponseBody,
}

impl RemoteTaskState {
    pub fn from_body(body: ResponseBody) -> Self {
        let status = match body.field("status") {
            Some(Value::String(s)) => RemoteTaskStatus::parse(s),
            Some(other) => RemoteTaskStatus::Unknown(other.to_string()),
            None if body.as_json().is_none() => {
                RemoteTaskStatus::Unknown("unparsable body".to_string())
            }
            None => RemoteTaskStatus::Unknown(String::new()),
        };
        let result = body.field("result").cloned();
        let message = ["message", "error", "msg"]
            .iter()
            .find_map(|name| body.text_field(name));

        Self {
            status,
            result,
            message,
            body,
        }
    }

    fn result_text(&self, keys: &[&str]) -> Option<String> {
        match self.result.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(obj) => keys
                .iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            _ => None,
        }
    }

    /// Download URL of the processed file (embed tasks)
    pub fn embed_result_url(&self) -> Option<String> {
        self.result_text(&["file_url", "download_url"])
    }

    /// Recovered payload text (extract tasks)
    pub fn extracted_text(&self) -> Option<String> {
        self.result_text(&["content"])
    }

    /// Human-readable reason for a remote failure
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "remote task reported failure".to_string())
    }
}
