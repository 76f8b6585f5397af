//! Category and tag operations of the template manager

use crate::error::{Result, TemplateError};
use crate::templates::manager::{normalize_tags, TemplateManager};
use crate::templates::types::*;
use crate::templates::validation::{validate_category_parent, validate_id};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Category id derived from a display name, e.g. "Black Friday!" -> "black_friday"
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

impl TemplateManager {
    pub fn get_category(&self, category_id: &str) -> Option<TemplateCategory> {
        self.store.category(category_id).cloned()
    }

    /// All categories ordered by sort order, then name
    pub fn get_categories(&self) -> Vec<TemplateCategory> {
        self.store.categories()
    }

    pub async fn create_category(
        &mut self,
        request: CreateCategoryRequest,
    ) -> Result<TemplateCategory> {
        if request.name.trim().is_empty() {
            return Err(TemplateError::validation("Category name cannot be empty"));
        }

        let id = request.id.clone().unwrap_or_else(|| slugify(&request.name));
        validate_id("category", &id)?;
        if self.store.category(&id).is_some() {
            return Err(TemplateError::Conflict(format!(
                "Category already exists: {}",
                id
            )));
        }
        validate_category_parent(&id, request.parent_id.as_deref(), self.store.category_map())?;

        let mut category = TemplateCategory::new(id, request.name.trim());
        if let Some(description) = request.description {
            category.description = description;
        }
        if let Some(color) = request.color {
            category.color = color;
        }
        category.parent_id = request.parent_id;
        category.sort_order = request.sort_order.unwrap_or(0);

        self.store.insert_category(category.clone());
        self.store.save_categories().await?;

        info!("Created category {}", category.id);
        Ok(category)
    }

    /// Update a category; `Ok(None)` when it does not exist
    pub async fn update_category(
        &mut self,
        category_id: &str,
        request: UpdateCategoryRequest,
    ) -> Result<Option<TemplateCategory>> {
        if self.store.category(category_id).is_none() {
            return Ok(None);
        }

        if let Some(parent_id) = &request.parent_id {
            validate_category_parent(category_id, parent_id.as_deref(), self.store.category_map())?;
        }
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(TemplateError::validation("Category name cannot be empty"));
            }
        }

        let Some(category) = self.store.category_mut(category_id) else {
            return Ok(None);
        };
        if let Some(name) = request.name {
            category.name = name.trim().to_string();
        }
        if let Some(description) = request.description {
            category.description = description;
        }
        if let Some(color) = request.color {
            category.color = color;
        }
        if let Some(parent_id) = request.parent_id {
            category.parent_id = parent_id;
        }
        if let Some(sort_order) = request.sort_order {
            category.sort_order = sort_order;
        }
        let updated = category.clone();

        self.store.save_categories().await?;
        debug!("Updated category {}", category_id);
        Ok(Some(updated))
    }

    /// Delete a category
    ///
    /// Its templates move to the parent category (or the default one) and
    /// its child categories are re-parented. The default category cannot be
    /// deleted.
    pub async fn delete_category(&mut self, category_id: &str) -> Result<bool> {
        if category_id == DEFAULT_CATEGORY_ID {
            return Err(TemplateError::validation(format!(
                "The {} category cannot be deleted",
                DEFAULT_CATEGORY_ID
            )));
        }
        let Some(category) = self.store.category(category_id).cloned() else {
            return Ok(false);
        };

        let target = category
            .parent_id
            .clone()
            .filter(|p| self.store.category(p).is_some())
            .unwrap_or_else(|| DEFAULT_CATEGORY_ID.to_string());

        let moved: Vec<String> = self
            .store
            .all_metadata()
            .iter()
            .filter(|(_, m)| m.category_id == category_id)
            .map(|(id, _)| id.clone())
            .collect();

        for template_id in &moved {
            if let Some(metadata) = self.store.metadata_mut(template_id) {
                metadata.category_id = target.clone();
            }
        }
        if !moved.is_empty() {
            self.store.save_index().await?;
            self.reindex_templates(&moved).await?;
        }

        for child_id in self.store.child_category_ids(category_id) {
            if let Some(child) = self.store.category_mut(&child_id) {
                child.parent_id = category.parent_id.clone();
            }
        }

        self.store.remove_category(category_id);
        self.store.recount_categories();
        self.store.save_categories().await?;

        info!(
            "Deleted category {}, moved {} templates to {}",
            category_id,
            moved.len(),
            target
        );
        Ok(true)
    }

    /// Categories as a forest, children in category order
    pub fn get_category_tree(&self) -> Vec<CategoryNode> {
        let categories = self.store.categories();
        let mut children: HashMap<Option<String>, Vec<TemplateCategory>> = HashMap::new();

        for category in categories {
            let parent = category
                .parent_id
                .clone()
                .filter(|p| self.store.category(p).is_some());
            children.entry(parent).or_default().push(category);
        }

        fn build(
            parent: Option<String>,
            children: &mut HashMap<Option<String>, Vec<TemplateCategory>>,
        ) -> Vec<CategoryNode> {
            children
                .remove(&parent)
                .unwrap_or_default()
                .into_iter()
                .map(|category| {
                    let nested = build(Some(category.id.clone()), children);
                    CategoryNode {
                        category,
                        children: nested,
                    }
                })
                .collect()
        }

        build(None, &mut children)
    }

    /// Recompute and persist cached category counts
    pub async fn update_category_counts(&mut self) -> Result<()> {
        self.store.recount_categories();
        self.store.save_categories().await
    }

    /// Add tags to a template; `Ok(false)` when it does not exist
    pub async fn add_tags(&mut self, template_id: &str, tags: &[String]) -> Result<bool> {
        let tags = normalize_tags(tags);
        let Some(metadata) = self.store.metadata_mut(template_id) else {
            return Ok(false);
        };
        metadata.tags.extend(tags);

        self.store.save_index().await?;
        self.reindex_templates(&[template_id.to_string()]).await?;
        Ok(true)
    }

    /// Remove tags from a template; `Ok(false)` when it does not exist
    pub async fn remove_tags(&mut self, template_id: &str, tags: &[String]) -> Result<bool> {
        let tags = normalize_tags(tags);
        let Some(metadata) = self.store.metadata_mut(template_id) else {
            return Ok(false);
        };
        metadata.tags.retain(|t| !tags.contains(t));

        self.store.save_index().await?;
        self.reindex_templates(&[template_id.to_string()]).await?;
        Ok(true)
    }

    /// Every tag in use with the number of templates carrying it
    pub fn get_all_tags(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for metadata in self.store.all_metadata().values() {
            for tag in &metadata.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Templates carrying a tag (case-insensitive), ordered by id
    pub async fn get_templates_by_tag(&self, tag: &str) -> Result<Vec<MessageTemplate>> {
        let ids = self.search.templates_with_tag(tag.trim());
        self.load_templates(ids).await
    }

    /// Refresh search entries after a metadata-only change
    async fn reindex_templates(&mut self, template_ids: &[String]) -> Result<()> {
        for template_id in template_ids {
            let Some(metadata) = self.store.metadata(template_id).cloned() else {
                continue;
            };
            if let Some(template) = self.store.read_template(template_id).await? {
                self.search.add_template(&template, &metadata);
            }
        }
        self.search.save(&self.config.search_index_file()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Black Friday!"), "black_friday");
        assert_eq!(slugify("  Promo  "), "promo");
        assert_eq!(slugify("a--b"), "a_b");
    }
}
