//! Import/Export types
//!
//! Data structures for template export envelopes and import reports.

use crate::analytics::AnalyticsExport;
use crate::error::TemplateError;
use crate::templates::{MessageTemplate, TemplateCategory, TemplateMetadata};
use crate::versions::VersionFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Envelope version written by this crate
pub const EXPORT_FORMAT_VERSION: &str = "2.0";

/// Envelope versions accepted on import
pub const SUPPORTED_FORMAT_VERSIONS: [&str; 2] = ["1.0", "2.0"];

/// Header of an export file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub template_count: usize,
    #[serde(default)]
    pub includes_versions: bool,
    #[serde(default)]
    pub includes_analytics: bool,
}

/// Exported templates with their metadata, categories and optional history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub export_info: ExportInfo,
    pub templates: Vec<MessageTemplate>,
    /// Template id -> metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, TemplateMetadata>,
    #[serde(default)]
    pub categories: Vec<TemplateCategory>,
    /// Template id -> version file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<BTreeMap<String, VersionFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsExport>,
}

impl ExportEnvelope {
    /// Empty envelope in the current format
    pub fn new() -> Self {
        Self {
            export_info: ExportInfo {
                version: EXPORT_FORMAT_VERSION.to_string(),
                exported_at: Utc::now(),
                template_count: 0,
                includes_versions: false,
                includes_analytics: false,
            },
            templates: Vec::new(),
            metadata: BTreeMap::new(),
            categories: Vec::new(),
            versions: None,
            analytics: None,
        }
    }

    /// Sync the header flags with the body
    pub fn finalize(&mut self) {
        self.export_info.template_count = self.templates.len();
        self.export_info.includes_versions = self.versions.is_some();
        self.export_info.includes_analytics = self.analytics.is_some();
    }
}

impl Default for ExportEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

/// Conflict handling when importing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Validate and reject templates whose id already exists
    #[default]
    Strict,
    /// Validate and rename conflicting ids
    Lenient,
    /// No validation; conflicting ids are overwritten with a new version
    Skip,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Strict => "strict",
            ImportMode::Lenient => "lenient",
            ImportMode::Skip => "skip",
        }
    }

    /// Whether imported templates are validated before saving
    pub fn validates(&self) -> bool {
        !matches!(self, ImportMode::Skip)
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(ImportMode::Strict),
            "lenient" => Ok(ImportMode::Lenient),
            "skip" => Ok(ImportMode::Skip),
            other => Err(TemplateError::Import(format!("Unknown import mode: {}", other))),
        }
    }
}

/// What to put in a bulk export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Templates to export (None = all)
    pub template_ids: Option<Vec<String>>,
    /// Only templates in this category and its descendants
    pub category_id: Option<String>,
    #[serde(default)]
    pub include_versions: bool,
    #[serde(default)]
    pub include_analytics: bool,
}

/// Result of importing one template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    /// Id the template was stored under
    pub template_id: String,
    /// Id found in the file
    pub original_id: String,
    /// Existing template replaced (skip mode)
    pub overwritten: bool,
}

impl ImportOutcome {
    pub fn renamed(&self) -> bool {
        self.template_id != self.original_id
    }
}

/// Summary of a bulk import
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkImportReport {
    pub successful: usize,
    pub failed: usize,
    /// One line per template or file, in processing order
    pub messages: Vec<String>,
    pub imported: Vec<ImportOutcome>,
}

impl BulkImportReport {
    pub fn record_success(&mut self, source: &str, outcome: ImportOutcome) {
        let message = if outcome.renamed() {
            format!(
                "{}: imported {} as {}",
                source, outcome.original_id, outcome.template_id
            )
        } else if outcome.overwritten {
            format!("{}: overwrote {}", source, outcome.template_id)
        } else {
            format!("{}: imported {}", source, outcome.template_id)
        };
        self.successful += 1;
        self.messages.push(message);
        self.imported.push(outcome);
    }

    pub fn record_failure(&mut self, source: &str, error: &TemplateError) {
        self.failed += 1;
        self.messages.push(format!("{}: {}", source, error));
    }

    pub fn merge(&mut self, other: BulkImportReport) {
        self.successful += other.successful;
        self.failed += other.failed;
        self.messages.extend(other.messages);
        self.imported.extend(other.imported);
    }
}
