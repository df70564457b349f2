//! Watermark policy selection
//!
//! Picks embedding parameters for a file from two independent inputs:
//!
//! - the **file type** (extension), which has a preferred embed depth and
//!   compatibility tier, and
//! - the **sensitivity** classification, which has a minimum embed depth and
//!   a preferred compatibility tier.
//!
//! # Selection
//!
//! The file type's preferred policies are the catalog policies listing that
//! type; the sensitivity's preferred policies are the catalog policies with
//! that sensitivity. The first policy (catalog order = priority) in both sets
//! wins; if the sets do not intersect, the sensitivity's first policy is
//! used. Depth is the larger of the two depths and compatibility the stricter
//! of the two tiers.
//!
//! # Configuration Example
//!
//! ```yaml
//! policy:
//!   default_sensitivity: medium
//!   policies:
//!     - id: strict-office
//!       name: "Strict office documents"
//!       sensitivity: high
//!       embed_depth: 3
//!       file_types: [docx, xlsx, pptx]
//!   file_types:
//!     - extension: xlsx
//!       embed_depth: 1
//!       compatibility: basic
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Unknown watermark policy: {0}")]
    UnknownPolicy(String),

    #[error("Policy '{policy_id}' does not support file type '{file_type}'")]
    UnsupportedByPolicy { policy_id: String, file_type: String },

    #[error("No watermark policy available for sensitivity '{0}'")]
    NoPolicyAvailable(Sensitivity),

    #[error("Unknown sensitivity level: {0}")]
    UnknownSensitivity(String),
}

/// Sensitivity classification of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    Medium,
    Low,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::High => "high",
            Sensitivity::Medium => "medium",
            Sensitivity::Low => "low",
        }
    }

    /// Minimum embed depth this sensitivity requires
    pub fn min_embed_depth(&self) -> u32 {
        match self {
            Sensitivity::High => 3,
            Sensitivity::Medium => 2,
            Sensitivity::Low => 1,
        }
    }

    pub fn preferred_compatibility(&self) -> CompatibilityTier {
        match self {
            Sensitivity::High => CompatibilityTier::Strict,
            Sensitivity::Medium => CompatibilityTier::Standard,
            Sensitivity::Low => CompatibilityTier::Basic,
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Sensitivity::High),
            "medium" => Ok(Sensitivity::Medium),
            "low" => Ok(Sensitivity::Low),
            _ => Err(PolicyError::UnknownSensitivity(s.to_string())),
        }
    }
}

/// Compatibility tier, ordered by severity (`Basic < Standard < Strict`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityTier {
    Basic,
    Standard,
    Strict,
}

/// A named embedding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPolicy {
    pub id: String,
    pub name: String,
    pub sensitivity: Sensitivity,
    pub embed_depth: u32,
    pub file_types: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl WatermarkPolicy {
    pub fn supports(&self, file_type: &str) -> bool {
        self.file_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(file_type))
    }
}

/// Preferred embedding parameters of one file type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeProfile {
    pub extension: String,
    pub embed_depth: u32,
    pub compatibility: CompatibilityTier,
}

/// Selected policy and parameters for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAdaptation {
    pub policy_id: String,
    pub embed_depth: u32,
    pub compatibility: CompatibilityTier,
}

fn policy(
    id: &str,
    name: &str,
    sensitivity: Sensitivity,
    embed_depth: u32,
    file_types: &[&str],
    is_default: bool,
) -> WatermarkPolicy {
    WatermarkPolicy {
        id: id.to_string(),
        name: name.to_string(),
        sensitivity,
        embed_depth,
        file_types: file_types.iter().map(|t| t.to_string()).collect(),
        is_default,
    }
}

/// Built-in policy catalog, in priority order
pub fn default_policies() -> Vec<WatermarkPolicy> {
    vec![
        policy(
            "strict-office",
            "Strict office documents",
            Sensitivity::High,
            3,
            &["docx", "xlsx", "pptx"],
            false,
        ),
        policy(
            "strict-pdf",
            "Strict PDF",
            Sensitivity::High,
            3,
            &["pdf"],
            false,
        ),
        policy(
            "standard-office",
            "Standard office documents",
            Sensitivity::Medium,
            2,
            &["docx", "xlsx", "pptx", "pdf"],
            true,
        ),
        policy(
            "light-text",
            "Light text and tables",
            Sensitivity::Low,
            1,
            &["txt", "csv", "docx", "xlsx"],
            false,
        ),
    ]
}

/// Built-in file type profiles
pub fn default_file_types() -> Vec<FileTypeProfile> {
    [
        ("docx", 2, CompatibilityTier::Standard),
        ("xlsx", 1, CompatibilityTier::Basic),
        ("pptx", 2, CompatibilityTier::Standard),
        ("pdf", 2, CompatibilityTier::Strict),
        ("txt", 1, CompatibilityTier::Basic),
        ("csv", 1, CompatibilityTier::Basic),
    ]
    .into_iter()
    .map(|(extension, embed_depth, compatibility)| FileTypeProfile {
        extension: extension.to_string(),
        embed_depth,
        compatibility,
    })
    .collect()
}

fn normalize_file_type(file_type: &str) -> String {
    file_type.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Selects embedding parameters from a read-only policy catalog
#[derive(Debug, Clone)]
pub struct PolicyAdapter {
    policies: Vec<WatermarkPolicy>,
    file_types: Vec<FileTypeProfile>,
}

impl Default for PolicyAdapter {
    fn default() -> Self {
        Self::new(default_policies(), default_file_types())
    }
}

impl PolicyAdapter {
    /// `policies` must be in priority order
    pub fn new(policies: Vec<WatermarkPolicy>, file_types: Vec<FileTypeProfile>) -> Self {
        Self {
            policies,
            file_types,
        }
    }

    pub fn policies(&self) -> &[WatermarkPolicy] {
        &self.policies
    }

    pub fn policy(&self, policy_id: &str) -> Option<&WatermarkPolicy> {
        self.policies.iter().find(|p| p.id == policy_id)
    }

    pub fn default_policy(&self) -> Option<&WatermarkPolicy> {
        self.policies.iter().find(|p| p.is_default)
    }

    /// Sensitivity used when a caller names none: the default policy's,
    /// otherwise medium
    pub fn default_sensitivity(&self) -> Sensitivity {
        self.default_policy()
            .map(|p| p.sensitivity)
            .unwrap_or(Sensitivity::Medium)
    }

    fn profile(&self, file_type: &str) -> Result<&FileTypeProfile, PolicyError> {
        let normalized = normalize_file_type(file_type);
        self.file_types
            .iter()
            .find(|p| p.extension.eq_ignore_ascii_case(&normalized))
            .ok_or(PolicyError::UnsupportedFileType(normalized))
    }

    /// Select a policy and parameters for `file_type` at `sensitivity`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFileType` if the file type has no profile
    /// - `NoPolicyAvailable` if no catalog policy has this sensitivity
    pub fn adapt(
        &self,
        file_type: &str,
        sensitivity: Sensitivity,
    ) -> Result<PolicyAdaptation, PolicyError> {
        let profile = self.profile(file_type)?;

        let chosen = self
            .policies
            .iter()
            .find(|p| p.supports(&profile.extension) && p.sensitivity == sensitivity)
            .or_else(|| self.policies.iter().find(|p| p.sensitivity == sensitivity))
            .ok_or(PolicyError::NoPolicyAvailable(sensitivity))?;

        Ok(PolicyAdaptation {
            policy_id: chosen.id.clone(),
            embed_depth: profile.embed_depth.max(sensitivity.min_embed_depth()),
            compatibility: profile
                .compatibility
                .max(sensitivity.preferred_compatibility()),
        })
    }

    /// Parameters for an embed request.
    ///
    /// With an explicit policy, that policy must exist and list the file
    /// type; its own depth acts as an extra floor. Without one, the file type
    /// is adapted at `default_sensitivity`.
    pub fn for_embed(
        &self,
        policy_id: Option<&str>,
        file_type: &str,
        default_sensitivity: Sensitivity,
    ) -> Result<PolicyAdaptation, PolicyError> {
        let Some(policy_id) = policy_id else {
            return self.adapt(file_type, default_sensitivity);
        };

        let policy = self
            .policy(policy_id)
            .ok_or_else(|| PolicyError::UnknownPolicy(policy_id.to_string()))?;
        let profile = self.profile(file_type)?;
        if !policy.supports(&profile.extension) {
            return Err(PolicyError::UnsupportedByPolicy {
                policy_id: policy.id.clone(),
                file_type: profile.extension.clone(),
            });
        }

        Ok(PolicyAdaptation {
            policy_id: policy.id.clone(),
            embed_depth: profile
                .embed_depth
                .max(policy.sensitivity.min_embed_depth())
                .max(policy.embed_depth),
            compatibility: profile
                .compatibility
                .max(policy.sensitivity.preferred_compatibility()),
        })
    }
}
