//! Recommendation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form details recorded with a usage, e.g. recipient count or channel
pub type UsageContext = BTreeMap<String, serde_json::Value>;

/// One remembered usage context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: UsageContext,
}

/// Usage history of one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    /// Oldest first, bounded by the configured maximum
    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
}

/// Which signal produced a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationReason {
    /// Used about as often and as recently as the reference template
    SimilarUsage,
    /// Popular inside the requested category
    PopularInCategory,
    /// Used within the last week
    RecentlyUsed,
}

/// Scored template suggestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub template_id: String,
    pub score: f64,
    pub reason: RecommendationReason,
}
