//! Provenance resolution
//!
//! Answers "which watermark, if any, does this file carry" from weak
//! evidence, using an ordered chain of strategies. The first strategy that
//! finds a record wins; results are never combined across strategies.
//!
//! 1. **Filename fragment** (`FilenameFragmentStrategy`): processed files are
//!    published as `{stem}_WM{8 hex}.{ext}`; the fragment is looked up as a
//!    watermark id prefix. Cheap, but only a heuristic: renaming the file
//!    defeats it, and a forged name can point at the wrong record.
//! 2. **Content hash** (`ContentHashStrategy`): SHA-256 of the bytes against
//!    the original and watermarked hashes of every record. A renamed but
//!    unmodified file still resolves here.
//!
//! No match is a normal answer (confidence 0), not an error. The resolver
//! only reads from the content store and holds no mutable state, so
//! concurrent resolutions need no coordination.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::constants::{
    DEFAULT_FILENAME_CONFIDENCE, DEFAULT_FILENAME_MARKER, DEFAULT_HASH_CONFIDENCE,
    DEFAULT_WATERMARK_NAMESPACE, FILENAME_FRAGMENT_LEN,
};
use crate::storage::FetchedFile;
use crate::store::{StoreError, WatermarkContentStore};

/// Which strategy produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    FilenameFragment,
    ContentHash,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::FilenameFragment => "filename_fragment",
            MatchStrategy::ContentHash => "content_hash",
        }
    }
}

/// Answer of a provenance resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMatch {
    pub watermark_id: Option<String>,
    pub content: Option<String>,
    /// In `[0, 1]`; 0 means no evidence was found
    pub confidence: f64,
    pub strategy: Option<MatchStrategy>,
}

impl ProvenanceMatch {
    pub fn none() -> Self {
        Self {
            watermark_id: None,
            content: None,
            confidence: 0.0,
            strategy: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.watermark_id.is_some()
    }
}

/// Naming convention linking processed file names to watermark ids
#[derive(Debug, Clone)]
pub struct FilenameTag {
    namespace: String,
    marker: String,
    pattern: Regex,
}

impl Default for FilenameTag {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK_NAMESPACE, DEFAULT_FILENAME_MARKER)
            .expect("escaped marker always forms a valid pattern")
    }
}

impl FilenameTag {
    pub fn new(namespace: &str, marker: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            "{}([0-9a-fA-F]{{{}}})",
            regex::escape(marker),
            FILENAME_FRAGMENT_LEN
        ))?;

        Ok(Self {
            namespace: namespace.to_string(),
            marker: marker.to_string(),
            pattern,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Name for the processed copy of `file_name` carrying `watermark_id`
    ///
    /// `report.docx` + `WM1a2b3c4d...` -> `report_WM1a2b3c4d.docx`
    pub fn tag(&self, file_name: &str, watermark_id: &str) -> String {
        let id_body = watermark_id
            .strip_prefix(self.namespace.as_str())
            .unwrap_or(watermark_id);
        let fragment: String = id_body.chars().take(FILENAME_FRAGMENT_LEN).collect();

        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());

        match path.extension() {
            Some(ext) => format!(
                "{}{}{}.{}",
                stem,
                self.marker,
                fragment,
                ext.to_string_lossy()
            ),
            None => format!("{}{}{}", stem, self.marker, fragment),
        }
    }

    /// The id fragment embedded in `file_name`, lowercased
    pub fn fragment(&self, file_name: &str) -> Option<String> {
        self.pattern
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
    }

    /// Watermark id prefix a fragment stands for
    pub fn id_prefix(&self, fragment: &str) -> String {
        format!("{}{}", self.namespace, fragment)
    }
}

/// One link of the resolution chain
#[async_trait]
pub trait ProvenanceStrategy: Send + Sync {
    fn kind(&self) -> MatchStrategy;

    /// Look for a record matching `file`. `Ok(None)` passes to the next link.
    async fn attempt(
        &self,
        file: &FetchedFile,
        store: &dyn WatermarkContentStore,
    ) -> Result<Option<ProvenanceMatch>, StoreError>;
}

/// Strategy 1: id fragment carried in the file name
pub struct FilenameFragmentStrategy {
    tag: FilenameTag,
    confidence: f64,
}

impl FilenameFragmentStrategy {
    pub fn new(tag: FilenameTag, confidence: f64) -> Self {
        Self { tag, confidence }
    }
}

#[async_trait]
impl ProvenanceStrategy for FilenameFragmentStrategy {
    fn kind(&self) -> MatchStrategy {
        MatchStrategy::FilenameFragment
    }

    async fn attempt(
        &self,
        file: &FetchedFile,
        store: &dyn WatermarkContentStore,
    ) -> Result<Option<ProvenanceMatch>, StoreError> {
        let Some(fragment) = self.tag.fragment(&file.name) else {
            return Ok(None);
        };

        let found = store.find_by_id_prefix(&self.tag.id_prefix(&fragment)).await?;
        if found.is_none() {
            tracing::debug!(
                file_name = %file.name,
                fragment = %fragment,
                "Filename fragment matches no watermark record"
            );
        }

        Ok(found.map(|content| ProvenanceMatch {
            watermark_id: Some(content.watermark_id),
            content: Some(content.content),
            confidence: self.confidence,
            strategy: Some(MatchStrategy::FilenameFragment),
        }))
    }
}

/// Strategy 2: exact content hash
pub struct ContentHashStrategy {
    confidence: f64,
}

impl ContentHashStrategy {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }
}

#[async_trait]
impl ProvenanceStrategy for ContentHashStrategy {
    fn kind(&self) -> MatchStrategy {
        MatchStrategy::ContentHash
    }

    async fn attempt(
        &self,
        file: &FetchedFile,
        store: &dyn WatermarkContentStore,
    ) -> Result<Option<ProvenanceMatch>, StoreError> {
        let hash = file.content_hash();
        let found = store.find_by_file_hash(&hash).await?;

        Ok(found.map(|content| ProvenanceMatch {
            watermark_id: Some(content.watermark_id),
            content: Some(content.content),
            confidence: self.confidence,
            strategy: Some(MatchStrategy::ContentHash),
        }))
    }
}

/// Ordered strategy chain over a content store
pub struct ProvenanceResolver {
    store: Arc<dyn WatermarkContentStore>,
    strategies: Vec<Box<dyn ProvenanceStrategy>>,
}

impl ProvenanceResolver {
    /// Filename fragment first, then content hash
    pub fn new(
        store: Arc<dyn WatermarkContentStore>,
        tag: FilenameTag,
        filename_confidence: f64,
        hash_confidence: f64,
    ) -> Self {
        Self::with_strategies(
            store,
            vec![
                Box::new(FilenameFragmentStrategy::new(tag, filename_confidence)),
                Box::new(ContentHashStrategy::new(hash_confidence)),
            ],
        )
    }

    pub fn with_defaults(store: Arc<dyn WatermarkContentStore>) -> Self {
        Self::new(
            store,
            FilenameTag::default(),
            DEFAULT_FILENAME_CONFIDENCE,
            DEFAULT_HASH_CONFIDENCE,
        )
    }

    pub fn with_strategies(
        store: Arc<dyn WatermarkContentStore>,
        strategies: Vec<Box<dyn ProvenanceStrategy>>,
    ) -> Self {
        Self { store, strategies }
    }

    /// Resolve the watermark carried by `file`.
    ///
    /// # Errors
    ///
    /// Only store failures are errors; "nothing found" is
    /// `ProvenanceMatch::none()`.
    pub async fn resolve(&self, file: &FetchedFile) -> Result<ProvenanceMatch, StoreError> {
        for strategy in &self.strategies {
            if let Some(found) = strategy.attempt(file, self.store.as_ref()).await? {
                tracing::info!(
                    file_name = %file.name,
                    strategy = strategy.kind().as_str(),
                    watermark_id = found.watermark_id.as_deref().unwrap_or(""),
                    confidence = found.confidence,
                    "Provenance resolved"
                );
                return Ok(found);
            }
        }

        tracing::info!(file_name = %file.name, "No provenance evidence found");
        Ok(ProvenanceMatch::none())
    }
}
