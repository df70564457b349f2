// Remote watermark service client
//
// Every call is HMAC-signed (see `signing`) and carries a fresh `Date`
// header. Task creation returns the remote task id; status queries return
// the parsed `RemoteTaskState`.

pub mod response;

pub use response::{RemoteTaskState, RemoteTaskStatus, ResponseBody};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_SERVICE_TIMEOUT_MS, EMBED_TASK_PATH, EXTRACT_TASK_PATH, QUERY_TASK_PATH,
};
use crate::signing::{
    build_canonical_query, http_date, RequestSigner, SigningError, SIGNATURE_ALGORITHM,
};

pub const HEADER_DATE: &str = "Date";
pub const HEADER_ALGORITHM: &str = "X-HMAC-ALGORITHM";
pub const HEADER_ACCESS_KEY: &str = "X-HMAC-ACCESS-KEY";
pub const HEADER_SIGNATURE: &str = "X-HMAC-SIGNATURE";

#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Remote service returned HTTP {status}: {body}")]
    Status { status: u16, body: ResponseBody },

    #[error("Remote service request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("Remote service connection error: {0}")]
    Transport(String),

    #[error("Remote service response carries no task id: {0}")]
    MissingTaskId(ResponseBody),

    #[error("Invalid remote service configuration: {0}")]
    InvalidConfig(String),
}

impl RemoteServiceError {
    /// Worth another status poll; creation calls are never retried
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteServiceError::Timeout { .. } | RemoteServiceError::Transport(_) => true,
            RemoteServiceError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Operations of the remote watermark service
#[async_trait]
pub trait WatermarkService: Send + Sync {
    /// Ask the service to embed `content` into the file at `file_url`
    async fn create_embed_task(
        &self,
        file_url: &str,
        content: &str,
        biz_id: &str,
    ) -> Result<String, RemoteServiceError>;

    /// Ask the service to recover the watermark of the file at `file_url`
    async fn create_extract_task(
        &self,
        file_url: &str,
        biz_id: &str,
    ) -> Result<String, RemoteServiceError>;

    /// Current state of a remote task
    async fn query_task(&self, task_id: &str) -> Result<RemoteTaskState, RemoteServiceError>;
}

/// Signed HTTP client for the watermark service
#[derive(Debug, Clone)]
pub struct WatermarkServiceClient {
    endpoint: String,
    signer: RequestSigner,
    timeout: Duration,
    client: Client,
}

impl WatermarkServiceClient {
    /// Creates a client with the default timeout
    ///
    /// # Errors
    /// Returns `RemoteServiceError::InvalidConfig` if the endpoint is not an
    /// http(s) URL or the HTTP client cannot be created.
    pub fn new(endpoint: &str, signer: RequestSigner) -> Result<Self, RemoteServiceError> {
        Self::builder(endpoint, signer).build()
    }

    pub fn builder(endpoint: &str, signer: RequestSigner) -> WatermarkServiceClientBuilder {
        WatermarkServiceClientBuilder::new(endpoint, signer)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build a signed request without sending it
    ///
    /// The query string is the canonical form of `params`, so the URL that
    /// goes on the wire is exactly what was signed.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        params: &Map<String, Value>,
        body: Option<&Value>,
        date: &str,
    ) -> Result<reqwest::Request, RemoteServiceError> {
        let canonical_query = build_canonical_query(params);
        let signature = self
            .signer
            .sign(method.as_str(), path, &canonical_query, date)?;

        let mut url = format!("{}{}", self.endpoint, path);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(self.timeout)
            .header(HEADER_DATE, date)
            .header(HEADER_ALGORITHM, SIGNATURE_ALGORITHM)
            .header(HEADER_ACCESS_KEY, self.signer.access_key())
            .header(HEADER_SIGNATURE, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        builder.build().map_err(|e| {
            RemoteServiceError::InvalidConfig(format!("Failed to build request: {}", e))
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        params: &Map<String, Value>,
        body: Option<&Value>,
    ) -> Result<ResponseBody, RemoteServiceError> {
        let date = http_date(Utc::now());
        let request = self.build_request(method.clone(), path, params, body, &date)?;

        tracing::debug!(method = %method, path = path, "Calling watermark service");

        let response = self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                RemoteServiceError::Timeout {
                    path: path.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else if e.is_connect() {
                RemoteServiceError::Transport(format!("Failed to connect: {}", e))
            } else {
                RemoteServiceError::Transport(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteServiceError::Transport(format!("Failed to read response: {}", e)))?;
        let body = ResponseBody::parse(&text);

        if !status.is_success() {
            tracing::warn!(
                path = path,
                status = status.as_u16(),
                body = %body,
                "Watermark service returned an error status"
            );
            return Err(RemoteServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    async fn create_task(&self, path: &str, payload: Value) -> Result<String, RemoteServiceError> {
        let body = self.call(Method::POST, path, &Map::new(), Some(&payload)).await?;
        match body.task_id() {
            Some(task_id) => {
                tracing::info!(path = path, remote_task_id = %task_id, "Remote task created");
                Ok(task_id)
            }
            None => Err(RemoteServiceError::MissingTaskId(body)),
        }
    }
}

#[async_trait]
impl WatermarkService for WatermarkServiceClient {
    async fn create_embed_task(
        &self,
        file_url: &str,
        content: &str,
        biz_id: &str,
    ) -> Result<String, RemoteServiceError> {
        let payload = json!({
            "file_url": file_url,
            "content": content,
            "biz_id": biz_id,
        });
        self.create_task(EMBED_TASK_PATH, payload).await
    }

    async fn create_extract_task(
        &self,
        file_url: &str,
        biz_id: &str,
    ) -> Result<String, RemoteServiceError> {
        let payload = json!({
            "file_url": file_url,
            "biz_id": biz_id,
        });
        self.create_task(EXTRACT_TASK_PATH, payload).await
    }

    async fn query_task(&self, task_id: &str) -> Result<RemoteTaskState, RemoteServiceError> {
        let mut params = Map::new();
        params.insert("task_id".to_string(), Value::String(task_id.to_string()));

        let body = self.call(Method::GET, QUERY_TASK_PATH, &params, None).await?;
        Ok(RemoteTaskState::from_body(body))
    }
}

/// Builder for WatermarkServiceClient
#[derive(Debug, Clone)]
pub struct WatermarkServiceClientBuilder {
    endpoint: String,
    signer: RequestSigner,
    timeout_ms: u64,
}

impl WatermarkServiceClientBuilder {
    pub fn new(endpoint: &str, signer: RequestSigner) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            signer,
            timeout_ms: DEFAULT_SERVICE_TIMEOUT_MS,
        }
    }

    /// Sets the per-request timeout in milliseconds
    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = timeout;
        self
    }

    pub fn build(self) -> Result<WatermarkServiceClient, RemoteServiceError> {
        let endpoint = self.endpoint.trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(RemoteServiceError::InvalidConfig(
                "service endpoint cannot be empty".to_string(),
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(RemoteServiceError::InvalidConfig(format!(
                "service endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
        if self.timeout_ms == 0 {
            return Err(RemoteServiceError::InvalidConfig(
                "service timeout must be greater than zero".to_string(),
            ));
        }

        let timeout = Duration::from_millis(self.timeout_ms);
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            RemoteServiceError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(WatermarkServiceClient {
            endpoint,
            signer: self.signer,
            timeout,
            client,
        })
    }
}
