//! Remote service configuration.
//!
//! Endpoint, signing keys and the per-request timeout of the watermark
//! service. Keys are usually injected with `${VAR}` substitution.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::client::{RemoteServiceError, WatermarkServiceClient};
use crate::constants::DEFAULT_SERVICE_TIMEOUT_MS;
use crate::signing::RequestSigner;

fn default_timeout_ms() -> u64 {
    DEFAULT_SERVICE_TIMEOUT_MS
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://dlp.internal:8443`
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ServiceConfig {
    /// Build the signed client described by this section
    pub fn to_client(&self) -> Result<WatermarkServiceClient, RemoteServiceError> {
        let signer = RequestSigner::new(&self.access_key, &self.secret_key)?;
        WatermarkServiceClient::builder(&self.endpoint, signer)
            .timeout_ms(self.timeout_ms)
            .build()
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
