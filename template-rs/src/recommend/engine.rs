//! Usage-based recommendation engine
//!
//! Blends three heuristic signals: usage similarity to a reference template,
//! popularity inside a category and plain recency. Each signal is scored on
//! its own scale; when a template is produced by more than one signal the
//! first one wins.

use crate::error::Result;
use crate::storage::json_store::{read_json, write_json_atomic};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

use super::types::*;

/// Similarity scores at or below this are not worth suggesting
const SIMILARITY_THRESHOLD: f64 = 0.3;
const SIMILARITY_USAGE_WEIGHT: f64 = 0.7;
const SIMILARITY_RECENCY_WEIGHT: f64 = 0.3;
const SIMILARITY_RECENCY_DAYS: f64 = 30.0;
/// Usage count at which category popularity saturates
const POPULARITY_SATURATION: f64 = 10.0;
const RECENT_DAYS: f64 = 7.0;

/// Recommendation engine
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    max_contexts: usize,
    usage_patterns: BTreeMap<String, UsagePattern>,
}

impl RecommendationEngine {
    /// Create an empty engine remembering at most `max_contexts` contexts per template
    pub fn new(max_contexts: usize) -> Self {
        Self {
            max_contexts,
            usage_patterns: BTreeMap::new(),
        }
    }

    /// Record one use of a template
    pub fn record_usage(&mut self, template_id: &str, context: Option<UsageContext>) {
        self.record_usage_at(template_id, context, Utc::now());
    }

    pub(crate) fn record_usage_at(
        &mut self,
        template_id: &str,
        context: Option<UsageContext>,
        now: DateTime<Utc>,
    ) {
        let pattern = self
            .usage_patterns
            .entry(template_id.to_string())
            .or_insert_with(|| UsagePattern {
                usage_count: 0,
                last_used: now,
                contexts: Vec::new(),
            });

        pattern.usage_count += 1;
        pattern.last_used = now;

        if let Some(context) = context {
            pattern.contexts.push(ContextEntry {
                timestamp: now,
                context,
            });
            if pattern.contexts.len() > self.max_contexts {
                let excess = pattern.contexts.len() - self.max_contexts;
                pattern.contexts.drain(..excess);
            }
        }

        debug!(
            "Recorded usage of {} (count {})",
            template_id, pattern.usage_count
        );
    }

    /// Usage history of a template
    pub fn usage_pattern(&self, template_id: &str) -> Option<&UsagePattern> {
        self.usage_patterns.get(template_id)
    }

    /// Forget a template
    pub fn remove_template(&mut self, template_id: &str) -> bool {
        self.usage_patterns.remove(template_id).is_some()
    }

    /// Drop histories of templates that no longer exist
    pub fn retain_templates(&mut self, known: &HashSet<String>) -> usize {
        let before = self.usage_patterns.len();
        self.usage_patterns.retain(|id, _| known.contains(id));
        before - self.usage_patterns.len()
    }

    pub fn len(&self) -> usize {
        self.usage_patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usage_patterns.is_empty()
    }

    /// Suggest templates
    ///
    /// `template_id` enables the similarity signal, `category_members` the
    /// category popularity signal. The recency signal always runs.
    pub fn get_recommendations(
        &self,
        template_id: Option<&str>,
        category_members: Option<&[String]>,
        limit: usize,
    ) -> Vec<Recommendation> {
        self.recommendations_at(template_id, category_members, limit, Utc::now())
    }

    pub(crate) fn recommendations_at(
        &self,
        template_id: Option<&str>,
        category_members: Option<&[String]>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let mut results: Vec<Recommendation> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(reference) = template_id {
            seen.insert(reference.to_string());
        }

        let mut push = |results: &mut Vec<Recommendation>,
                        id: &str,
                        score: f64,
                        reason: RecommendationReason| {
            if seen.insert(id.to_string()) {
                results.push(Recommendation {
                    template_id: id.to_string(),
                    score,
                    reason,
                });
            }
        };

        if let Some(reference) = template_id.and_then(|id| self.usage_patterns.get(id)) {
            for (id, pattern) in &self.usage_patterns {
                let score = similarity(reference, pattern, now);
                if score > SIMILARITY_THRESHOLD {
                    push(&mut results, id, score, RecommendationReason::SimilarUsage);
                }
            }
        }

        if let Some(members) = category_members {
            for id in members {
                if let Some(pattern) = self.usage_patterns.get(id) {
                    let score = (pattern.usage_count as f64 / POPULARITY_SATURATION).min(1.0);
                    if score > 0.0 {
                        push(&mut results, id, score, RecommendationReason::PopularInCategory);
                    }
                }
            }
        }

        for (id, pattern) in &self.usage_patterns {
            let days = days_since(pattern.last_used, now);
            if days < RECENT_DAYS {
                let score = 1.0 - days / RECENT_DAYS;
                push(&mut results, id, score, RecommendationReason::RecentlyUsed);
            }
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        results.truncate(limit);
        results
    }

    /// Persist usage patterns
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.usage_patterns).await
    }

    /// Load usage patterns, or start empty when the file is missing
    pub async fn load(path: &Path, max_contexts: usize) -> Result<Self> {
        let usage_patterns: BTreeMap<String, UsagePattern> =
            read_json(path).await?.unwrap_or_default();
        debug!("Loaded {} usage patterns", usage_patterns.len());
        Ok(Self {
            max_contexts,
            usage_patterns,
        })
    }
}

fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(then).max(Duration::zero());
    elapsed.num_seconds() as f64 / 86_400.0
}

fn similarity(reference: &UsagePattern, candidate: &UsagePattern, now: DateTime<Utc>) -> f64 {
    let low = reference.usage_count.min(candidate.usage_count) as f64;
    let high = reference.usage_count.max(candidate.usage_count) as f64;
    let usage_ratio = if high > 0.0 { low / high } else { 0.0 };

    let days = days_since(candidate.last_used, now);
    let recency = if days < SIMILARITY_RECENCY_DAYS {
        1.0 - days / SIMILARITY_RECENCY_DAYS
    } else {
        0.0
    };

    usage_ratio * SIMILARITY_USAGE_WEIGHT + recency * SIMILARITY_RECENCY_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn use_n(engine: &mut RecommendationEngine, id: &str, n: usize, at: DateTime<Utc>) {
        for _ in 0..n {
            engine.record_usage_at(id, None, at);
        }
    }

    #[test]
    fn test_context_list_is_capped() {
        let mut engine = RecommendationEngine::new(3);
        for i in 0..5 {
            let mut ctx = UsageContext::new();
            ctx.insert("n".to_string(), serde_json::json!(i));
            engine.record_usage("t1", Some(ctx));
        }

        let pattern = engine.usage_pattern("t1").unwrap();
        assert_eq!(pattern.usage_count, 5);
        assert_eq!(pattern.contexts.len(), 3);
        assert_eq!(pattern.contexts[0].context["n"], serde_json::json!(2));
    }

    #[test]
    fn test_similarity_excludes_reference() {
        let now = Utc::now();
        let mut engine = RecommendationEngine::new(50);
        use_n(&mut engine, "a", 10, now - Duration::days(20));
        use_n(&mut engine, "b", 9, now - Duration::days(20));
        use_n(&mut engine, "c", 1, now - Duration::days(60));

        let recs = engine.recommendations_at(Some("a"), None, 10, now);
        let ids: Vec<_> = recs.iter().map(|r| r.template_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(recs[0].reason, RecommendationReason::SimilarUsage);
    }

    #[test]
    fn test_category_popularity_capped() {
        let now = Utc::now();
        let mut engine = RecommendationEngine::new(50);
        use_n(&mut engine, "a", 25, now - Duration::days(40));
        use_n(&mut engine, "b", 4, now - Duration::days(40));
        use_n(&mut engine, "outside", 30, now - Duration::days(40));

        let members = vec!["a".to_string(), "b".to_string()];
        let recs = engine.recommendations_at(None, Some(&members), 10, now);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].template_id, "a");
        assert_eq!(recs[0].score, 1.0);
        assert!((recs[1].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_first_source_wins_and_limit() {
        let now = Utc::now();
        let mut engine = RecommendationEngine::new(50);
        use_n(&mut engine, "a", 2, now);
        use_n(&mut engine, "b", 2, now - Duration::days(1));
        use_n(&mut engine, "c", 1, now - Duration::days(3));

        let members = vec!["b".to_string(), "c".to_string()];
        let recs = engine.recommendations_at(None, Some(&members), 10, now);
        // Category signal reaches b and c first; only a comes from recency
        let b = recs.iter().find(|r| r.template_id == "b").unwrap();
        assert_eq!(b.reason, RecommendationReason::PopularInCategory);
        let a = recs.iter().find(|r| r.template_id == "a").unwrap();
        assert_eq!(a.reason, RecommendationReason::RecentlyUsed);
        assert_eq!(recs[0].template_id, "a");

        let limited = engine.recommendations_at(None, Some(&members), 1, now);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_more_usage_never_scores_lower() {
        let now = Utc::now();
        let mut engine = RecommendationEngine::new(50);
        use_n(&mut engine, "low", 1, now - Duration::days(40));
        use_n(&mut engine, "high", 8, now - Duration::days(40));

        let members = vec!["low".to_string(), "high".to_string()];
        let recs = engine.recommendations_at(None, Some(&members), 10, now);
        assert_eq!(recs[0].template_id, "high");
        assert!(recs[0].score >= recs[1].score);
    }

    #[test]
    fn test_retain_drops_unknown_templates() {
        let mut engine = RecommendationEngine::new(50);
        for id in ["a", "b", "c"] {
            engine.record_usage(id, None);
        }

        let known: HashSet<String> = ["a", "c", "z"].iter().map(|s| s.to_string()).collect();
        assert_eq!(engine.retain_templates(&known), 1);
        assert_eq!(engine.len(), 2);
        assert!(engine.usage_pattern("b").is_none());
        assert_eq!(engine.retain_templates(&known), 0);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recommendations.json");

        let mut engine = RecommendationEngine::new(50);
        engine.record_usage("t1", None);
        engine.record_usage("t1", None);
        engine.save(&path).await.unwrap();

        let loaded = RecommendationEngine::load(&path, 50).await.unwrap();
        assert_eq!(loaded.usage_pattern("t1").unwrap().usage_count, 2);

        let missing = RecommendationEngine::load(&dir.path().join("none.json"), 50)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
