// Configuration module

pub mod policy;
pub mod provenance;
pub mod service;
pub mod storage;
pub mod worker;

pub use policy::PolicyConfig;
pub use provenance::ProvenanceConfig;
pub use service::ServiceConfig;
pub use storage::{StorageConfig, StoreConfig};
pub use worker::WorkerConfig;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::constants::DEFAULT_LOG_LEVEL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{0}' is referenced but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `shirushi=debug,reqwest=warn`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provenance: ProvenanceConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, ConfigError> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        // Every referenced variable must exist before substituting
        let mut values = HashMap::new();
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::MissingEnvVar(var_name.to_string()))?;
            values.insert(var_name.to_string(), value);
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        });

        Ok(serde_yaml::from_str(&substituted)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_with_env(&yaml)
    }

    /// Load, then validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sections().map_err(ConfigError::Invalid)
    }

    fn validate_sections(&self) -> Result<(), String> {
        let service = &self.service;
        if service.endpoint.trim().is_empty() {
            return Err("service.endpoint cannot be empty".to_string());
        }
        if !service.endpoint.starts_with("http://") && !service.endpoint.starts_with("https://") {
            return Err(format!(
                "service.endpoint '{}' must start with http:// or https://",
                service.endpoint
            ));
        }
        if service.access_key.is_empty() {
            return Err("service.access_key cannot be empty".to_string());
        }
        if service.secret_key.is_empty() {
            return Err("service.secret_key cannot be empty".to_string());
        }
        if service.timeout_ms == 0 {
            return Err("service.timeout_ms must be > 0".to_string());
        }

        let worker = &self.worker;
        if worker.max_concurrent_tasks == 0 {
            return Err("worker.max_concurrent_tasks must be > 0".to_string());
        }
        if worker.poll_interval_ms == 0 {
            return Err("worker.poll_interval_ms must be > 0".to_string());
        }
        if worker.max_poll_interval_ms < worker.poll_interval_ms {
            return Err(format!(
                "worker.max_poll_interval_ms ({}) must be >= poll_interval_ms ({})",
                worker.max_poll_interval_ms, worker.poll_interval_ms
            ));
        }
        if worker.max_poll_attempts == 0 {
            return Err("worker.max_poll_attempts must be > 0".to_string());
        }

        if self.storage.public_base_url.trim().is_empty() {
            return Err("storage.public_base_url cannot be empty".to_string());
        }
        if self.storage.fetch_timeout_ms == 0 {
            return Err("storage.fetch_timeout_ms must be > 0".to_string());
        }

        if let StoreConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("store.path cannot be empty".to_string());
            }
        }

        self.provenance.validate()?;
        self.policy.validate()?;

        if self.logging.level.trim().is_empty() {
            return Err("logging.level cannot be empty".to_string());
        }

        Ok(())
    }
}
