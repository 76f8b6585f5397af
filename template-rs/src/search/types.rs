//! Search types and data structures

use crate::templates::{Channel, MessageTemplate, TemplateMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query against the raw search index
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Whitespace separated terms; blank matches everything
    pub query: String,
    /// Match any of these categories (None = all)
    pub category_ids: Option<Vec<String>>,
    /// Template must carry every one of these tags
    pub tags: Vec<String>,
    /// Template must support at least one of these channels
    pub channels: Vec<Channel>,
    pub limit: usize,
}

/// Scored index match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub template_id: String,
    pub score: f64,
}

/// Manager-level filters for `search_templates`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchFilters {
    pub category_id: Option<String>,
    /// Include templates of descendant categories
    #[serde(default = "default_true")]
    pub include_subcategories: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    pub limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            category_id: None,
            include_subcategories: true,
            tags: Vec::new(),
            channels: Vec::new(),
            limit: None,
        }
    }
}

/// Search result entry with the loaded template
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub template: MessageTemplate,
    pub metadata: TemplateMetadata,
    /// Relevance score
    pub score: f64,
}

/// Index status
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Total indexed templates
    pub document_count: usize,
    pub tag_count: usize,
    pub category_count: usize,
    /// Last full rebuild
    pub last_rebuilt_at: Option<DateTime<Utc>>,
}
