//! Version types and data structures

use crate::templates::MessageTemplate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of a template at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVersion {
    /// `v{sequence}-{unix millis}`
    pub version_id: String,
    /// Per-template counter, strictly increasing
    pub sequence: u64,
    pub template: MessageTemplate,
    pub author: String,
    pub message: String,
    /// Version this one was derived from; may dangle after cleanup
    pub parent_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Contents of `versions/{template_id}.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionFile {
    pub template_id: String,
    pub versions: BTreeMap<String, TemplateVersion>,
    pub active_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl VersionFile {
    pub fn new(template_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            versions: BTreeMap::new(),
            active_version: None,
            updated_at: Utc::now(),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.versions.values().map(|v| v.sequence).max().unwrap_or(0) + 1
    }

    /// Versions newest first; equal timestamps fall back to the sequence
    pub fn sorted_newest_first(&self) -> Vec<&TemplateVersion> {
        let mut versions: Vec<&TemplateVersion> = self.versions.values().collect();
        versions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        versions
    }

    pub fn active(&self) -> Option<&TemplateVersion> {
        self.active_version
            .as_ref()
            .and_then(|id| self.versions.get(id))
    }
}

/// One compared field of `compare_versions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed: bool,
}

/// Flat field-by-field diff between two versions
#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub template_id: String,
    pub from_version: String,
    pub to_version: String,
    pub changes: Vec<FieldChange>,
}

impl VersionComparison {
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.changed)
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.changed)
            .map(|c| c.field.as_str())
            .collect()
    }
}

/// Summary of a template's version history
#[derive(Debug, Clone, Serialize)]
pub struct VersionStats {
    pub template_id: String,
    pub version_count: usize,
    pub active_version: Option<String>,
    pub authors: Vec<String>,
    pub first_created_at: Option<DateTime<Utc>>,
    pub last_created_at: Option<DateTime<Utc>>,
}
