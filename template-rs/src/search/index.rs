//! In-memory template search index
//!
//! Maps template ids to a lowercase blob of their searchable text, with
//! secondary tag, category and channel sets used as filters and a usage
//! counter used as a relevance boost.

use crate::error::Result;
use crate::storage::json_store::write_json_atomic;
use crate::templates::{MessageTemplate, TemplateMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use super::types::{IndexStatus, SearchHit, SearchQuery};

/// Characters at the start of a document that earn a position bonus
const LEADING_WINDOW: usize = 100;
const TERM_WEIGHT: f64 = 2.0;
const LEADING_BONUS: f64 = 1.0;
const USAGE_WEIGHT: f64 = 0.1;
const MAX_USAGE_BOOST: f64 = 2.0;

/// Serializable search index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchIndex {
    index: BTreeMap<String, String>,
    tag_index: BTreeMap<String, BTreeSet<String>>,
    category_index: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    channel_index: BTreeMap<String, BTreeSet<String>>,
    usage_index: BTreeMap<String, u64>,
    #[serde(default)]
    last_rebuilt_at: Option<DateTime<Utc>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh index from the metadata store contents
    pub fn rebuild<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a MessageTemplate, &'a TemplateMetadata)>,
    {
        let mut index = Self::new();
        for (template, metadata) in entries {
            index.add_template(template, metadata);
        }
        index.last_rebuilt_at = Some(Utc::now());
        index
    }

    /// Index a template, replacing any previous entry for the same id
    pub fn add_template(&mut self, template: &MessageTemplate, metadata: &TemplateMetadata) {
        self.remove_template(&template.id);

        let id = template.id.clone();
        self.index.insert(id.clone(), searchable_text(template, metadata));

        for tag in &metadata.tags {
            self.tag_index
                .entry(tag.to_lowercase())
                .or_default()
                .insert(id.clone());
        }

        self.category_index
            .entry(metadata.category_id.clone())
            .or_default()
            .insert(id.clone());

        for channel in &template.channels {
            self.channel_index
                .entry(channel.as_str().to_string())
                .or_default()
                .insert(id.clone());
        }

        self.usage_index.insert(id, metadata.usage_count);
    }

    /// Drop a template from every index; returns whether it was present
    pub fn remove_template(&mut self, template_id: &str) -> bool {
        let existed = self.index.remove(template_id).is_some();
        self.usage_index.remove(template_id);

        for sets in [
            &mut self.tag_index,
            &mut self.category_index,
            &mut self.channel_index,
        ] {
            sets.retain(|_, ids| {
                ids.remove(template_id);
                !ids.is_empty()
            });
        }

        existed
    }

    pub fn update_usage(&mut self, template_id: &str, usage_count: u64) {
        if self.index.contains_key(template_id) {
            self.usage_index.insert(template_id.to_string(), usage_count);
        }
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.index.contains_key(template_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ids carrying a tag (case-insensitive)
    pub fn templates_with_tag(&self, tag: &str) -> Vec<String> {
        self.tag_index
            .get(&tag.to_lowercase())
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run a query
    ///
    /// A blank query returns every candidate with score 1.0. Otherwise each
    /// term scores twice its occurrence count plus a bonus when it appears in
    /// the first 100 characters; non-matching candidates are dropped and the
    /// remaining ones get a usage boost capped at 2.0. Ties are ordered by id.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let candidates = self.candidates(query);
        let terms: Vec<String> = query
            .query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut hits: Vec<SearchHit> = if terms.is_empty() {
            candidates
                .into_iter()
                .map(|id| SearchHit {
                    template_id: id,
                    score: 1.0,
                })
                .collect()
        } else {
            candidates
                .into_iter()
                .filter_map(|id| {
                    let text = self.index.get(&id)?;
                    let text_score = score_text(text, &terms);
                    if text_score <= 0.0 {
                        return None;
                    }
                    let usage = self.usage_index.get(&id).copied().unwrap_or(0);
                    let boost = (usage as f64 * USAGE_WEIGHT).min(MAX_USAGE_BOOST);
                    Some(SearchHit {
                        template_id: id,
                        score: text_score + boost,
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        hits.truncate(query.limit);

        debug!("Search {:?} matched {} template(s)", query.query, hits.len());
        hits
    }

    fn candidates(&self, query: &SearchQuery) -> BTreeSet<String> {
        let mut candidates: BTreeSet<String> = self.index.keys().cloned().collect();

        if let Some(category_ids) = &query.category_ids {
            let in_categories: BTreeSet<String> = category_ids
                .iter()
                .filter_map(|c| self.category_index.get(c))
                .flatten()
                .cloned()
                .collect();
            candidates = &candidates & &in_categories;
        }

        for tag in &query.tags {
            let tagged = self
                .tag_index
                .get(&tag.to_lowercase())
                .cloned()
                .unwrap_or_default();
            candidates = &candidates & &tagged;
        }

        if !query.channels.is_empty() {
            let on_channels: BTreeSet<String> = query
                .channels
                .iter()
                .filter_map(|c| self.channel_index.get(c.as_str()))
                .flatten()
                .cloned()
                .collect();
            candidates = &candidates & &on_channels;
        }

        candidates
    }

    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            document_count: self.index.len(),
            tag_count: self.tag_index.len(),
            category_count: self.category_index.len(),
            last_rebuilt_at: self.last_rebuilt_at,
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).await
    }

    #[cfg(test)]
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        crate::storage::json_store::read_json(path).await
    }
}

/// Lowercase concatenation of everything a user might search for
fn searchable_text(template: &MessageTemplate, metadata: &TemplateMetadata) -> String {
    let mut parts: Vec<&str> = vec![
        template.name.as_str(),
        template.subject.as_str(),
        template.content.as_str(),
        template.whatsapp_content.as_str(),
        metadata.description.as_str(),
    ];
    parts.extend(template.variables.iter().map(String::as_str));
    parts.extend(template.channels.iter().map(|c| c.as_str()));
    parts.extend(metadata.tags.iter().map(String::as_str));

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn score_text(text: &str, terms: &[String]) -> f64 {
    let leading: String = text.chars().take(LEADING_WINDOW).collect();

    terms
        .iter()
        .map(|term| {
            let count = text.matches(term.as_str()).count();
            if count == 0 {
                return 0.0;
            }
            let bonus = if leading.contains(term.as_str()) {
                LEADING_BONUS
            } else {
                0.0
            };
            count as f64 * TERM_WEIGHT + bonus
        })
        .sum()
}
