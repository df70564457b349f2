//! Watermark policy catalog configuration.
//!
//! Both lists are optional; a missing list falls back to the built-in
//! catalog. Catalog order is priority order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::policy::{
    default_file_types, default_policies, FileTypeProfile, PolicyAdapter, Sensitivity,
    WatermarkPolicy,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Sensitivity used for embeds without an explicit policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sensitivity: Option<Sensitivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<WatermarkPolicy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_types: Option<Vec<FileTypeProfile>>,
}

impl PolicyConfig {
    pub fn to_adapter(&self) -> PolicyAdapter {
        PolicyAdapter::new(
            self.policies.clone().unwrap_or_else(default_policies),
            self.file_types.clone().unwrap_or_else(default_file_types),
        )
    }

    /// Configured default sensitivity, otherwise the catalog's
    pub fn default_sensitivity(&self, adapter: &PolicyAdapter) -> Sensitivity {
        self.default_sensitivity
            .unwrap_or_else(|| adapter.default_sensitivity())
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(policies) = &self.policies {
            if policies.is_empty() {
                return Err("policy.policies cannot be an empty list".to_string());
            }

            let mut seen_ids = HashSet::new();
            for policy in policies {
                if policy.id.trim().is_empty() {
                    return Err("Policy id cannot be empty".to_string());
                }
                if !seen_ids.insert(policy.id.as_str()) {
                    return Err(format!("Duplicate policy id '{}'", policy.id));
                }
                if policy.embed_depth == 0 {
                    return Err(format!(
                        "Policy '{}' has embed_depth 0. Depth must be >= 1.",
                        policy.id
                    ));
                }
                if policy.file_types.is_empty() {
                    return Err(format!("Policy '{}' lists no file types", policy.id));
                }
            }

            let defaults = policies.iter().filter(|p| p.is_default).count();
            if defaults > 1 {
                return Err(format!(
                    "At most one policy may be marked is_default, found {}",
                    defaults
                ));
            }
        }

        if let Some(file_types) = &self.file_types {
            let mut seen = HashSet::new();
            for profile in file_types {
                let extension = profile.extension.trim().trim_start_matches('.');
                if extension.is_empty() {
                    return Err("File type extension cannot be empty".to_string());
                }
                if !seen.insert(extension.to_ascii_lowercase()) {
                    return Err(format!("Duplicate file type '{}'", profile.extension));
                }
                if profile.embed_depth == 0 {
                    return Err(format!(
                        "File type '{}' has embed_depth 0. Depth must be >= 1.",
                        profile.extension
                    ));
                }
            }
        }

        Ok(())
    }
}
