//! Template files, `index.json` and `categories.json`

use crate::config::Config;
use crate::error::Result;
use crate::storage::json_store::{json_file_stems, read_json, remove_if_exists, write_json_atomic};
use crate::templates::types::{
    MessageTemplate, TemplateCategory, TemplateMetadata, DEFAULT_CATEGORY_ID,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info};

/// Contents of `index.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateIndex {
    pub templates: BTreeMap<String, TemplateMetadata>,
    pub updated_at: DateTime<Utc>,
}

impl Default for TemplateIndex {
    fn default() -> Self {
        Self {
            templates: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Owns the per-template JSON files plus the shared index and category list
pub struct MetadataStore {
    templates_dir: PathBuf,
    index_file: PathBuf,
    categories_file: PathBuf,
    index: TemplateIndex,
    categories: HashMap<String, TemplateCategory>,
}

impl MetadataStore {
    /// Open the store, creating directories and the default category as needed
    pub async fn open(config: &Config) -> Result<Self> {
        let templates_dir = config.templates_dir();
        tokio::fs::create_dir_all(&templates_dir).await?;

        let index_file = config.index_file();
        let categories_file = config.categories_file();

        let index: TemplateIndex = read_json(&index_file).await?.unwrap_or_default();
        let category_list: Vec<TemplateCategory> =
            read_json(&categories_file).await?.unwrap_or_default();

        let mut store = Self {
            templates_dir,
            index_file,
            categories_file,
            index,
            categories: category_list
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
        };

        if !store.categories.contains_key(DEFAULT_CATEGORY_ID) {
            store
                .categories
                .insert(DEFAULT_CATEGORY_ID.to_string(), TemplateCategory::general());
            store.save_categories().await?;
        }

        info!(
            "Metadata store opened: {} templates, {} categories",
            store.index.templates.len(),
            store.categories.len()
        );

        Ok(store)
    }

    pub fn template_path(&self, template_id: &str) -> PathBuf {
        self.templates_dir.join(format!("{}.json", template_id))
    }

    pub async fn write_template(&self, template: &MessageTemplate) -> Result<()> {
        write_json_atomic(&self.template_path(&template.id), template).await?;
        debug!("Wrote template file for {}", template.id);
        Ok(())
    }

    pub async fn read_template(&self, template_id: &str) -> Result<Option<MessageTemplate>> {
        read_json(&self.template_path(template_id)).await
    }

    pub async fn delete_template_file(&self, template_id: &str) -> Result<bool> {
        remove_if_exists(&self.template_path(template_id)).await
    }

    /// Ids of every template file on disk
    pub async fn template_file_ids(&self) -> Result<Vec<String>> {
        json_file_stems(&self.templates_dir).await
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.index.templates.contains_key(template_id)
    }

    pub fn metadata(&self, template_id: &str) -> Option<&TemplateMetadata> {
        self.index.templates.get(template_id)
    }

    pub fn metadata_mut(&mut self, template_id: &str) -> Option<&mut TemplateMetadata> {
        self.index.templates.get_mut(template_id)
    }

    pub fn all_metadata(&self) -> &BTreeMap<String, TemplateMetadata> {
        &self.index.templates
    }

    pub fn template_ids(&self) -> Vec<String> {
        self.index.templates.keys().cloned().collect()
    }

    pub fn upsert_metadata(&mut self, template_id: &str, metadata: TemplateMetadata) {
        self.index.templates.insert(template_id.to_string(), metadata);
    }

    pub fn remove_metadata(&mut self, template_id: &str) -> Option<TemplateMetadata> {
        self.index.templates.remove(template_id)
    }

    /// Persist `index.json`
    pub async fn save_index(&mut self) -> Result<()> {
        self.index.updated_at = Utc::now();
        write_json_atomic(&self.index_file, &self.index).await
    }

    pub fn category(&self, category_id: &str) -> Option<&TemplateCategory> {
        self.categories.get(category_id)
    }

    pub fn category_mut(&mut self, category_id: &str) -> Option<&mut TemplateCategory> {
        self.categories.get_mut(category_id)
    }

    pub fn category_map(&self) -> &HashMap<String, TemplateCategory> {
        &self.categories
    }

    /// Categories ordered by sort order, then name
    pub fn categories(&self) -> Vec<TemplateCategory> {
        let mut list: Vec<TemplateCategory> = self.categories.values().cloned().collect();
        list.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn insert_category(&mut self, category: TemplateCategory) {
        self.categories.insert(category.id.clone(), category);
    }

    pub fn remove_category(&mut self, category_id: &str) -> Option<TemplateCategory> {
        self.categories.remove(category_id)
    }

    /// Direct children of a category
    pub fn child_category_ids(&self, category_id: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .categories
            .values()
            .filter(|c| c.parent_id.as_deref() == Some(category_id))
            .map(|c| c.id.clone())
            .collect();
        children.sort();
        children
    }

    /// The category itself followed by all of its descendants
    pub fn descendant_category_ids(&self, category_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([category_id.to_string()]);

        while let Some(id) = queue.pop_front() {
            if result.contains(&id) {
                continue;
            }
            queue.extend(self.child_category_ids(&id));
            result.push(id);
        }

        result
    }

    /// Persist `categories.json`
    pub async fn save_categories(&self) -> Result<()> {
        write_json_atomic(&self.categories_file, &self.categories()).await
    }

    /// Recompute the cached template and usage counts of every category
    pub fn recount_categories(&mut self) {
        for category in self.categories.values_mut() {
            category.template_count = 0;
            category.usage_count = 0;
        }
        for metadata in self.index.templates.values() {
            if let Some(category) = self.categories.get_mut(&metadata.category_id) {
                category.template_count += 1;
                category.usage_count += metadata.usage_count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_general_category() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());

        let store = MetadataStore::open(&config).await.unwrap();
        assert!(store.category(DEFAULT_CATEGORY_ID).is_some());
        assert!(config.categories_file().exists());
        assert!(config.templates_dir().is_dir());
    }

    #[tokio::test]
    async fn test_descendants_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let mut store = MetadataStore::open(&config).await.unwrap();

        let mut promo = TemplateCategory::new("promo", "Promo");
        promo.parent_id = None;
        let mut summer = TemplateCategory::new("summer", "Summer");
        summer.parent_id = Some("promo".to_string());
        store.insert_category(promo);
        store.insert_category(summer);

        assert_eq!(store.descendant_category_ids("promo"), vec!["promo", "summer"]);

        let metadata = TemplateMetadata {
            category_id: "summer".to_string(),
            usage_count: 4,
            ..Default::default()
        };
        store.upsert_metadata("t1", metadata);
        store.recount_categories();

        assert_eq!(store.category("summer").unwrap().template_count, 1);
        assert_eq!(store.category("summer").unwrap().usage_count, 4);
        assert_eq!(store.category("promo").unwrap().template_count, 0);
    }

    #[tokio::test]
    async fn test_index_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());

        {
            let mut store = MetadataStore::open(&config).await.unwrap();
            store.upsert_metadata("t1", TemplateMetadata::default());
            store.save_index().await.unwrap();
        }

        let store = MetadataStore::open(&config).await.unwrap();
        assert!(store.contains("t1"));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(config.index_file()).unwrap()).unwrap();
        assert!(raw["templates"]["t1"].is_object());
        assert!(raw["updated_at"].is_string());
    }
}
