//! Template manager
//!
//! Owns every store and keeps them consistent. Template mutations are
//! journaled before any file is touched and committed once the template
//! file, `index.json`, the search index and the version history agree.
//! Uncommitted operations are replayed on the next `open`.

use crate::analytics::{AnalyticsStore, TemplateUsageStats};
use crate::config::Config;
use crate::error::{Result, TemplateError};
use crate::recommend::{Recommendation, RecommendationEngine, UsageContext};
use crate::search::{SearchFilters, SearchIndex, SearchQuery, SearchResult};
use crate::storage::{Journal, JournalEvent, MetadataStore, PendingOperation};
use crate::templates::renderer::{RenderedMessage, TemplateRenderer};
use crate::templates::types::*;
use crate::templates::validation::{validate_id, validate_template, MAX_ID_LEN};
use crate::versions::{TemplateVersion, VersionComparison, VersionManager, VersionStats};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// How `apply_save` records the version of a write
#[derive(Debug, Clone, Copy)]
pub(crate) enum VersionStep {
    Create,
    /// Keep the active version when it already holds the same content
    ReuseMatching,
    /// Keep the active version when it holds the same content and was
    /// created at or after the given instant
    ReuseSince(DateTime<Utc>),
}

/// Single-writer facade over the template stores
pub struct TemplateManager {
    pub(crate) config: Config,
    pub(crate) store: MetadataStore,
    pub(crate) versions: VersionManager,
    pub(crate) search: SearchIndex,
    pub(crate) recommendations: RecommendationEngine,
    pub(crate) analytics: AnalyticsStore,
    pub(crate) journal: Journal,
}

impl TemplateManager {
    /// Open all stores under `config.storage.data_dir`
    ///
    /// Replays uncommitted journal operations, repairs index entries that
    /// lost their file (and files that lost their entry), then rebuilds the
    /// search index and category counts from the metadata store.
    pub async fn open(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let store = MetadataStore::open(&config).await?;

        let versions = VersionManager::new(config.versions_dir(), config.versions.preserve_lineage);
        versions.init().await?;

        let recommendations = RecommendationEngine::load(
            &config.recommendations_file(),
            config.recommendations.max_contexts,
        )
        .await?;

        let analytics = AnalyticsStore::connect(&config.storage.analytics_database_url).await?;

        let (journal, pending) = Journal::open(&config.journal_file()).await?;

        let mut manager = Self {
            config,
            store,
            versions,
            search: SearchIndex::new(),
            recommendations,
            analytics,
            journal,
        };

        manager.replay(pending).await?;
        manager.repair().await?;
        manager.prune_recommendations().await?;
        manager.rebuild_search_index().await?;
        manager.store.recount_categories();
        manager.store.save_categories().await?;

        info!(
            "Template manager ready: {} templates in {:?}",
            manager.store.all_metadata().len(),
            manager.config.storage.data_dir
        );

        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the analytics database
    pub fn analytics(&self) -> &AnalyticsStore {
        &self.analytics
    }

    pub fn search_index(&self) -> &SearchIndex {
        &self.search
    }

    async fn replay(&mut self, pending: Vec<PendingOperation>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        for operation in pending {
            info!(
                "Replaying journal operation {} for template {} (recorded {})",
                operation.op,
                operation.event.template_id(),
                operation.recorded_at
            );
            match operation.event {
                JournalEvent::TemplateSaved {
                    template,
                    metadata,
                    author,
                    message,
                } => {
                    let step = VersionStep::ReuseSince(operation.recorded_at);
                    self.apply_save(&template, metadata, &author, &message, step)
                        .await?;
                }
                JournalEvent::TemplateDeleted { template_id } => {
                    self.apply_delete(&template_id).await?;
                }
            }
        }

        self.journal.checkpoint().await
    }

    /// Reconcile `index.json` with the template files on disk
    async fn repair(&mut self) -> Result<()> {
        let mut changed = false;
        let files: HashSet<String> = self.store.template_file_ids().await?.into_iter().collect();

        for template_id in self.store.template_ids() {
            if !files.contains(&template_id) {
                warn!("Dropping index entry {} with no template file", template_id);
                self.store.remove_metadata(&template_id);
                changed = true;
            }
        }

        for template_id in &files {
            if self.store.contains(template_id) {
                continue;
            }
            match self.store.read_template(template_id).await {
                Ok(Some(template)) if template.id == *template_id => {
                    warn!("Adopting unindexed template file {}", template_id);
                    let metadata = TemplateMetadata {
                        created_at: template.created_at,
                        updated_at: template.updated_at,
                        current_version: self
                            .versions
                            .get_active_version(template_id)
                            .await?
                            .map(|v| v.version_id),
                        ..Default::default()
                    };
                    self.store.upsert_metadata(template_id, metadata);
                    changed = true;
                }
                Ok(_) => warn!("Ignoring template file {} with mismatched id", template_id),
                Err(e) => warn!("Ignoring unreadable template file {}: {}", template_id, e),
            }
        }

        let known: HashSet<String> = self.store.category_map().keys().cloned().collect();
        for template_id in self.store.template_ids() {
            if let Some(metadata) = self.store.metadata_mut(&template_id) {
                if !known.contains(&metadata.category_id) {
                    warn!(
                        "Template {} referenced missing category {}, moved to {}",
                        template_id, metadata.category_id, DEFAULT_CATEGORY_ID
                    );
                    metadata.category_id = DEFAULT_CATEGORY_ID.to_string();
                    changed = true;
                }
            }
        }

        if changed {
            self.store.save_index().await?;
        }
        Ok(())
    }

    /// Forget usage patterns of templates that are gone
    async fn prune_recommendations(&mut self) -> Result<()> {
        let known: HashSet<String> = self.store.template_ids().into_iter().collect();
        let dropped = self.recommendations.retain_templates(&known);
        if dropped > 0 {
            info!("Dropped {} stale usage patterns", dropped);
            self.recommendations
                .save(&self.config.recommendations_file())
                .await?;
        }
        Ok(())
    }

    /// Recompute the search index from the metadata store and persist it
    pub async fn rebuild_search_index(&mut self) -> Result<()> {
        let mut templates = Vec::new();
        for template_id in self.store.template_ids() {
            if let Some(template) = self.store.read_template(&template_id).await? {
                templates.push(template);
            }
        }

        let store = &self.store;
        self.search = SearchIndex::rebuild(
            templates
                .iter()
                .filter_map(|t| store.metadata(&t.id).map(|m| (t, m))),
        );
        self.search.save(&self.config.search_index_file()).await?;

        let status = self.search.status();
        debug!(
            "Search index rebuilt: {} templates, {} tags, {} categories",
            status.document_count, status.tag_count, status.category_count
        );
        Ok(())
    }

    /// Steps shared by every template write: file, index, search, version
    pub(crate) async fn apply_save(
        &mut self,
        template: &MessageTemplate,
        mut metadata: TemplateMetadata,
        author: &str,
        message: &str,
        step: VersionStep,
    ) -> Result<String> {
        self.store.write_template(template).await?;

        self.store.upsert_metadata(&template.id, metadata.clone());
        self.store.save_index().await?;

        self.search.add_template(template, &metadata);
        self.search.save(&self.config.search_index_file()).await?;

        let since = match step {
            VersionStep::Create => None,
            VersionStep::ReuseMatching => Some(DateTime::<Utc>::MIN_UTC),
            VersionStep::ReuseSince(since) => Some(since),
        };
        let reusable = match since {
            Some(since) => self
                .versions
                .get_active_version(&template.id)
                .await?
                .filter(|active| {
                    active.created_at >= since && active.template.same_content(template)
                }),
            None => None,
        };
        let version_id = match reusable {
            Some(active) => {
                debug!(
                    "Template {} already recorded as {}, no new version",
                    template.id, active.version_id
                );
                active.version_id
            }
            None => {
                self.versions
                    .create_version(template, author, message, None)
                    .await?
            }
        };

        if metadata.current_version.as_deref() != Some(version_id.as_str()) {
            metadata.current_version = Some(version_id.clone());
            self.store.upsert_metadata(&template.id, metadata);
            self.store.save_index().await?;
        }

        self.store.recount_categories();
        Ok(version_id)
    }

    async fn apply_delete(&mut self, template_id: &str) -> Result<()> {
        self.store.remove_metadata(template_id);
        self.store.save_index().await?;

        self.store.delete_template_file(template_id).await?;

        self.search.remove_template(template_id);
        self.search.save(&self.config.search_index_file()).await?;

        if self.recommendations.remove_template(template_id) {
            self.recommendations
                .save(&self.config.recommendations_file())
                .await?;
        }

        self.store.recount_categories();
        Ok(())
    }

    /// Journal, apply and commit a template write
    pub(crate) async fn commit_save(
        &mut self,
        template: MessageTemplate,
        metadata: TemplateMetadata,
        author: &str,
        message: &str,
        step: VersionStep,
    ) -> Result<String> {
        let op = self
            .journal
            .begin(JournalEvent::TemplateSaved {
                template: template.clone(),
                metadata: metadata.clone(),
                author: author.to_string(),
                message: message.to_string(),
            })
            .await?;

        let applied = self
            .apply_save(&template, metadata, author, message, step)
            .await;
        match applied {
            Ok(version_id) => {
                self.journal.commit(op).await?;
                Ok(version_id)
            }
            Err(e) => {
                error!(
                    "Saving template {} failed, left open in the journal: {}",
                    template.id, e
                );
                Err(e)
            }
        }
    }

    fn author_or_default<'a>(&'a self, author: Option<&'a str>) -> &'a str {
        author.unwrap_or(&self.config.versions.default_author)
    }

    /// Metadata for a save: existing entry (or defaults) overlaid with `options`
    fn merged_metadata(
        &self,
        template_id: &str,
        options: &SaveOptions,
    ) -> Result<TemplateMetadata> {
        let mut metadata = self.store.metadata(template_id).cloned().unwrap_or_default();

        if let Some(category_id) = &options.category_id {
            metadata.category_id = category_id.clone();
        }
        if self.store.category(&metadata.category_id).is_none() {
            return Err(TemplateError::validation(format!(
                "Category not found: {}",
                metadata.category_id
            )));
        }
        if let Some(description) = &options.description {
            metadata.description = description.clone();
        }
        if let Some(tags) = &options.tags {
            metadata.tags = normalize_tags(tags);
        }
        metadata.updated_at = Utc::now();
        Ok(metadata)
    }

    /// Create or replace a template
    ///
    /// The id is kept, `created_at` of an existing template is preserved and
    /// `updated_at` never moves backwards. Variables are derived from the
    /// content when the template lists none. Returns the active version id.
    pub async fn save_template(
        &mut self,
        mut template: MessageTemplate,
        options: SaveOptions,
    ) -> Result<String> {
        if template.variables.is_empty() {
            template.variables = TemplateRenderer::template_variables(&template);
        }
        validate_template(&template)?;

        let existing = self.store.read_template(&template.id).await?;
        let now = Utc::now();
        match &existing {
            Some(previous) => {
                template.created_at = previous.created_at;
                template.updated_at = now.max(previous.updated_at).max(template.created_at);
            }
            None => {
                template.updated_at = now.max(template.created_at);
            }
        }

        let metadata = self.merged_metadata(&template.id, &options)?;

        let author = self.author_or_default(options.author.as_deref()).to_string();
        let message = options.message.clone().unwrap_or_else(|| {
            if existing.is_some() {
                "Updated template".to_string()
            } else {
                "Initial version".to_string()
            }
        });

        let template_id = template.id.clone();
        let version_id = self
            .commit_save(template, metadata, &author, &message, VersionStep::Create)
            .await?;

        info!("Saved template {} as version {}", template_id, version_id);
        Ok(version_id)
    }

    /// Apply a partial update to an existing template
    pub async fn update_template(
        &mut self,
        template_id: &str,
        request: UpdateTemplateRequest,
        author: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(mut template) = self.store.read_template(template_id).await? else {
            return Ok(None);
        };

        let content_changed = request.subject.is_some()
            || request.content.is_some()
            || request.whatsapp_content.is_some();
        request.apply(&mut template);
        if content_changed && request.variables.is_none() {
            template.variables = TemplateRenderer::template_variables(&template);
        }

        let options = SaveOptions {
            author: author.map(str::to_string),
            message: Some(
                request
                    .message
                    .clone()
                    .unwrap_or_else(|| "Updated template".to_string()),
            ),
            ..Default::default()
        };

        self.save_template(template, options).await.map(Some)
    }

    pub async fn get_template(&self, template_id: &str) -> Result<Option<MessageTemplate>> {
        if !self.store.contains(template_id) {
            return Ok(None);
        }
        self.store.read_template(template_id).await
    }

    pub fn get_template_metadata(&self, template_id: &str) -> Option<TemplateMetadata> {
        self.store.metadata(template_id).cloned()
    }

    /// Every template, ordered by id
    pub async fn list_templates(&self) -> Result<Vec<MessageTemplate>> {
        self.load_templates(self.store.template_ids()).await
    }

    /// Templates of a category and all of its descendants, ordered by id
    pub async fn get_templates(&self, category_id: &str) -> Result<Vec<MessageTemplate>> {
        let ids = self.template_ids_in_category(category_id);
        self.load_templates(ids).await
    }

    pub(crate) fn template_ids_in_category(&self, category_id: &str) -> Vec<String> {
        let categories: HashSet<String> = self
            .store
            .descendant_category_ids(category_id)
            .into_iter()
            .collect();

        self.store
            .all_metadata()
            .iter()
            .filter(|(_, m)| categories.contains(&m.category_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) async fn load_templates(&self, ids: Vec<String>) -> Result<Vec<MessageTemplate>> {
        let mut templates = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.read_template(&id).await? {
                Some(template) => templates.push(template),
                None => warn!("Template {} is indexed but has no file", id),
            }
        }
        Ok(templates)
    }

    /// Remove a template; its version history is kept
    pub async fn delete_template(&mut self, template_id: &str) -> Result<bool> {
        let has_file = self.store.template_path(template_id).exists();
        if !self.store.contains(template_id) && !has_file {
            return Ok(false);
        }

        let op = self
            .journal
            .begin(JournalEvent::TemplateDeleted {
                template_id: template_id.to_string(),
            })
            .await?;
        self.apply_delete(template_id).await?;
        self.journal.commit(op).await?;

        info!("Deleted template {}", template_id);
        Ok(true)
    }

    /// Copy a template under a new id
    ///
    /// Defaults to `{id}_copy` (then `{id}_copy_2`, ...) and "{name} (Copy)".
    pub async fn duplicate_template(
        &mut self,
        template_id: &str,
        new_id: Option<&str>,
        new_name: Option<&str>,
    ) -> Result<Option<MessageTemplate>> {
        let Some(source) = self.get_template(template_id).await? else {
            return Ok(None);
        };

        let copy_id = match new_id {
            Some(id) => {
                if self.id_taken(id) {
                    return Err(TemplateError::Conflict(format!(
                        "Template already exists: {}",
                        id
                    )));
                }
                id.to_string()
            }
            None => self.unique_id(template_id, "copy"),
        };
        validate_id("template", &copy_id)?;

        let now = Utc::now();
        let mut copy = source.clone();
        copy.id = copy_id.clone();
        copy.name = new_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} (Copy)", source.name));
        copy.created_at = now;
        copy.updated_at = now;

        let source_metadata = self.store.metadata(template_id).cloned().unwrap_or_default();
        let options = SaveOptions {
            category_id: Some(source_metadata.category_id),
            description: Some(source_metadata.description),
            tags: Some(source_metadata.tags),
            author: None,
            message: Some(format!("Duplicated from {}", template_id)),
        };

        self.save_template(copy, options).await?;
        self.get_template(&copy_id).await
    }

    pub(crate) fn id_taken(&self, template_id: &str) -> bool {
        self.store.contains(template_id) || self.store.template_path(template_id).exists()
    }

    /// First free id of the form `{base}_{suffix}`, `{base}_{suffix}_2`, ...
    ///
    /// `base` is shortened as needed to keep the id within `MAX_ID_LEN`.
    pub(crate) fn unique_id(&self, base: &str, suffix: &str) -> String {
        let first = with_suffix(base, &format!("_{}", suffix));
        if !self.id_taken(&first) {
            return first;
        }
        (2u32..)
            .map(|n| with_suffix(base, &format!("_{}_{}", suffix, n)))
            .find(|candidate| !self.id_taken(candidate))
            .unwrap_or(first)
    }

    /// Full-text search with category, tag and channel filters
    pub async fn search_templates(
        &self,
        query: &str,
        filters: SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let category_ids = filters.category_id.as_deref().map(|id| {
            if filters.include_subcategories {
                self.store.descendant_category_ids(id)
            } else {
                vec![id.to_string()]
            }
        });

        let hits = self.search.search(&SearchQuery {
            query: query.to_string(),
            category_ids,
            tags: filters.tags,
            channels: filters.channels,
            limit: filters.limit.unwrap_or(self.config.search.default_limit),
        });

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(metadata) = self.store.metadata(&hit.template_id).cloned() else {
                continue;
            };
            match self.store.read_template(&hit.template_id).await? {
                Some(template) => results.push(SearchResult {
                    template,
                    metadata,
                    score: hit.score,
                }),
                None => warn!("Search hit {} has no template file", hit.template_id),
            }
        }

        debug!("Search {:?} returned {} results", query, results.len());
        Ok(results)
    }

    // Versions

    pub async fn get_version_history(&self, template_id: &str) -> Result<Vec<TemplateVersion>> {
        self.versions.get_version_history(template_id).await
    }

    pub async fn get_version(
        &self,
        template_id: &str,
        version_id: &str,
    ) -> Result<Option<TemplateVersion>> {
        self.versions.get_version(template_id, version_id).await
    }

    pub async fn get_active_version(&self, template_id: &str) -> Result<Option<TemplateVersion>> {
        self.versions.get_active_version(template_id).await
    }

    pub async fn compare_versions(
        &self,
        template_id: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<VersionComparison> {
        self.versions
            .compare_versions(template_id, from_version, to_version)
            .await
    }

    pub async fn delete_version(&self, template_id: &str, version_id: &str) -> Result<bool> {
        self.versions.delete_version(template_id, version_id).await
    }

    pub async fn version_stats(&self, template_id: &str) -> Result<VersionStats> {
        self.versions.version_stats(template_id).await
    }

    /// Restore the content of an earlier version as a new active version
    ///
    /// Also rewrites the template file and indexes. A deleted template whose
    /// history survived is brought back into the default category.
    pub async fn rollback_template(
        &mut self,
        template_id: &str,
        version_id: &str,
        author: Option<&str>,
    ) -> Result<TemplateVersion> {
        let author = self.author_or_default(author).to_string();
        let target = self
            .versions
            .get_version(template_id, version_id)
            .await?
            .ok_or_else(|| {
                TemplateError::NotFound(format!(
                    "Version {} of template {}",
                    version_id, template_id
                ))
            })?;

        let mut snapshot = target.template;
        if let Some(current) = self.store.read_template(template_id).await? {
            snapshot.created_at = current.created_at;
        }
        snapshot.updated_at = Utc::now().max(snapshot.created_at);

        let mut metadata = self.store.metadata(template_id).cloned().unwrap_or_default();
        metadata.updated_at = Utc::now();
        let message = format!("Rollback to version {}", version_id);

        let started = Utc::now();
        let op = self
            .journal
            .begin(JournalEvent::TemplateSaved {
                template: snapshot.clone(),
                metadata: metadata.clone(),
                author: author.clone(),
                message: message.clone(),
            })
            .await?;

        let version = self
            .versions
            .rollback_to_version(template_id, version_id, &author)
            .await?;
        // Picks up the rollback version instead of recording a second one
        let step = VersionStep::ReuseSince(started);
        self.apply_save(&snapshot, metadata, &author, &message, step)
            .await?;
        self.journal.commit(op).await?;

        Ok(version)
    }

    /// Prune old versions of one template; `keep_count` defaults to the configured value
    pub async fn cleanup_old_versions(
        &self,
        template_id: &str,
        keep_count: Option<usize>,
    ) -> Result<usize> {
        let keep = keep_count.unwrap_or(self.config.versions.keep_count);
        self.versions.cleanup_old_versions(template_id, keep).await
    }

    /// Remove version files of templates that no longer exist
    pub async fn cleanup_orphaned_versions(&self) -> Result<usize> {
        let mut removed = 0;
        for template_id in self.versions.versioned_template_ids().await? {
            if !self.store.contains(&template_id)
                && self.versions.delete_all_versions(&template_id).await?
            {
                debug!("Removed orphaned history of {}", template_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} orphaned version files", removed);
        }
        Ok(removed)
    }

    // Usage and recommendations

    /// Count a use of a template across metadata, search, recommendations and analytics
    pub async fn record_template_usage(
        &mut self,
        template_id: &str,
        channel: Option<Channel>,
        context: Option<UsageContext>,
    ) -> Result<bool> {
        let usage_count = match self.store.metadata_mut(template_id) {
            Some(metadata) => {
                metadata.usage_count += 1;
                metadata.last_used = Some(Utc::now());
                metadata.usage_count
            }
            None => return Ok(false),
        };
        self.store.save_index().await?;
        self.store.recount_categories();

        self.search.update_usage(template_id, usage_count);
        self.search.save(&self.config.search_index_file()).await?;

        let details = context
            .as_ref()
            .map(|ctx| serde_json::Value::Object(ctx.clone().into_iter().collect()))
            .unwrap_or_else(|| serde_json::json!({}));

        self.recommendations.record_usage(template_id, context);
        self.recommendations
            .save(&self.config.recommendations_file())
            .await?;

        self.analytics
            .record_template_usage(template_id, channel.as_ref().map(Channel::as_str), &details)
            .await?;

        debug!("Template {} used ({} total)", template_id, usage_count);
        Ok(true)
    }

    /// Suggested templates, optionally relative to a template and/or within a category
    pub fn get_recommendations(
        &self,
        template_id: Option<&str>,
        category_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<Recommendation> {
        let members = category_id.map(|id| self.template_ids_in_category(id));
        let limit = limit.unwrap_or(self.config.recommendations.default_limit);

        // Over-fetch so stale entries can be dropped without shrinking the result
        let mut recommendations = self.recommendations.get_recommendations(
            template_id,
            members.as_deref(),
            limit.saturating_add(self.recommendations.len()),
        );
        recommendations.retain(|r| self.store.contains(&r.template_id));
        recommendations.truncate(limit);
        recommendations
    }

    pub async fn template_stats(&self, template_id: &str) -> Result<TemplateUsageStats> {
        self.analytics.template_stats(template_id).await
    }

    // Variables

    /// Placeholders in `text` that are neither default nor system variables
    pub fn validate_template_variables(&self, text: &str) -> Vec<String> {
        TemplateRenderer::unknown_variables(text, &self.config.variables.default_variables)
    }

    /// Preview a template with the given values
    pub async fn render_template(
        &self,
        template_id: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Option<RenderedMessage>> {
        Ok(self
            .get_template(template_id)
            .await?
            .map(|template| TemplateRenderer::render(&template, vars)))
    }
}

fn with_suffix(base: &str, tail: &str) -> String {
    let mut end = base.len().min(MAX_ID_LEN.saturating_sub(tail.len()));
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &base[..end], tail)
}

/// Trimmed, non-empty tags
pub(crate) fn normalize_tags<'a, I>(tags: I) -> std::collections::BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
