//! Provenance resolution configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{
    DEFAULT_FILENAME_CONFIDENCE, DEFAULT_FILENAME_MARKER, DEFAULT_HASH_CONFIDENCE,
    DEFAULT_WATERMARK_NAMESPACE,
};
use crate::provenance::{FilenameTag, ProvenanceResolver};
use crate::store::WatermarkContentStore;

fn default_namespace() -> String {
    DEFAULT_WATERMARK_NAMESPACE.to_string()
}

fn default_filename_marker() -> String {
    DEFAULT_FILENAME_MARKER.to_string()
}

fn default_filename_confidence() -> f64 {
    DEFAULT_FILENAME_CONFIDENCE
}

fn default_hash_confidence() -> f64 {
    DEFAULT_HASH_CONFIDENCE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceConfig {
    /// Token every generated watermark id starts with
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Token placed in processed file names ahead of the id fragment
    #[serde(default = "default_filename_marker")]
    pub filename_marker: String,
    #[serde(default = "default_filename_confidence")]
    pub filename_confidence: f64,
    #[serde(default = "default_hash_confidence")]
    pub hash_confidence: f64,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            filename_marker: default_filename_marker(),
            filename_confidence: default_filename_confidence(),
            hash_confidence: default_hash_confidence(),
        }
    }
}

impl ProvenanceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err("provenance.namespace cannot be empty".to_string());
        }
        if self.filename_marker.trim().is_empty() {
            return Err("provenance.filename_marker cannot be empty".to_string());
        }
        for (name, value) in [
            ("filename_confidence", self.filename_confidence),
            ("hash_confidence", self.hash_confidence),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!(
                    "provenance.{} must be in (0, 1], got {}",
                    name, value
                ));
            }
        }
        Ok(())
    }

    pub fn to_filename_tag(&self) -> Result<FilenameTag, regex::Error> {
        FilenameTag::new(&self.namespace, &self.filename_marker)
    }

    pub fn to_resolver(
        &self,
        store: Arc<dyn WatermarkContentStore>,
    ) -> Result<ProvenanceResolver, regex::Error> {
        Ok(ProvenanceResolver::new(
            store,
            self.to_filename_tag()?,
            self.filename_confidence,
            self.hash_confidence,
        ))
    }
}
