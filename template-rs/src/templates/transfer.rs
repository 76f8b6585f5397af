//! Import and export operations of the template manager

use crate::error::{Result, TemplateError};
use crate::import_export::{
    read_envelope, write_envelope, BulkImportReport, ExportEnvelope, ExportOptions, ImportMode,
    ImportOutcome,
};
use crate::templates::manager::{TemplateManager, VersionStep};
use crate::templates::types::*;
use crate::templates::validation::{validate_category_parent, validate_id, validate_template};
use crate::versions::VersionFile;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

const IMPORT_AUTHOR: &str = "import";

impl TemplateManager {
    /// Write one template with its metadata and category chain to `path`
    ///
    /// Returns `Ok(false)` when the template does not exist.
    pub async fn export_template(&self, template_id: &str, path: &Path) -> Result<bool> {
        let Some(template) = self.get_template(template_id).await? else {
            return Ok(false);
        };

        let mut envelope = ExportEnvelope::new();
        if let Some(metadata) = self.store.metadata(template_id) {
            envelope.categories = self.category_chain(&metadata.category_id);
            envelope
                .metadata
                .insert(template_id.to_string(), metadata.clone());
        }
        envelope.templates.push(template);
        envelope.finalize();

        write_envelope(path, &envelope).await?;
        info!("Exported template {} to {:?}", template_id, path);
        Ok(true)
    }

    /// Write a selection of templates to `path`, returning how many were exported
    pub async fn export_templates(&self, path: &Path, options: &ExportOptions) -> Result<usize> {
        let mut ids: Vec<String> = match &options.template_ids {
            Some(ids) => ids
                .iter()
                .filter(|id| self.store.contains(id))
                .cloned()
                .collect(),
            None => self.store.template_ids(),
        };
        if let Some(category_id) = &options.category_id {
            let in_category: HashSet<String> =
                self.template_ids_in_category(category_id).into_iter().collect();
            ids.retain(|id| in_category.contains(id));
        }

        let mut envelope = ExportEnvelope::new();
        envelope.templates = self.load_templates(ids).await?;
        envelope.categories = self.store.categories();
        for template in &envelope.templates {
            if let Some(metadata) = self.store.metadata(&template.id) {
                envelope
                    .metadata
                    .insert(template.id.clone(), metadata.clone());
            }
        }

        if options.include_versions {
            let mut versions = BTreeMap::new();
            for template in &envelope.templates {
                if let Some(file) = self.versions.load(&template.id).await? {
                    versions.insert(template.id.clone(), file);
                }
            }
            envelope.versions = Some(versions);
        }

        if options.include_analytics {
            let selected: HashSet<&str> =
                envelope.templates.iter().map(|t| t.id.as_str()).collect();
            let mut usage = self.analytics.export_usage().await?;
            usage
                .template_stats
                .retain(|id, _| selected.contains(id.as_str()));
            envelope.analytics = Some(usage);
        }

        envelope.finalize();
        write_envelope(path, &envelope).await?;

        info!(
            "Exported {} templates to {:?}",
            envelope.templates.len(),
            path
        );
        Ok(envelope.templates.len())
    }

    /// Import a file holding exactly one template
    pub async fn import_template(
        &mut self,
        path: &Path,
        mode: ImportMode,
    ) -> Result<ImportOutcome> {
        let envelope = read_envelope(path).await?;
        if envelope.templates.len() != 1 {
            return Err(TemplateError::Import(format!(
                "{:?} holds {} templates, use a bulk import",
                path,
                envelope.templates.len()
            )));
        }

        let mut report = self.import_envelope(envelope, mode, &path.display().to_string()).await?;
        match report.imported.pop() {
            Some(outcome) => Ok(outcome),
            None => Err(TemplateError::Import(
                report
                    .messages
                    .pop()
                    .unwrap_or_else(|| "Import failed".to_string()),
            )),
        }
    }

    /// Import every template of every file, collecting per-template results
    pub async fn bulk_import_templates<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        mode: ImportMode,
    ) -> Result<BulkImportReport> {
        let mut report = BulkImportReport::default();

        for path in paths {
            let path = path.as_ref();
            let source = path.display().to_string();
            match read_envelope(path).await {
                Ok(envelope) => {
                    let file_report = self.import_envelope(envelope, mode, &source).await?;
                    report.merge(file_report);
                }
                Err(e) => {
                    warn!("Could not read import file {}: {}", source, e);
                    report.record_failure(&source, &e);
                }
            }
        }

        info!(
            "Bulk import ({}) finished: {} succeeded, {} failed",
            mode, report.successful, report.failed
        );
        Ok(report)
    }

    /// Import the contents of an already parsed envelope
    ///
    /// Per-template failures land in the report; only storage failures that
    /// leave the stores in doubt are returned as errors.
    pub async fn import_envelope(
        &mut self,
        envelope: ExportEnvelope,
        mode: ImportMode,
        source: &str,
    ) -> Result<BulkImportReport> {
        let mut report = BulkImportReport::default();

        self.import_categories(&envelope.categories).await?;

        let ExportEnvelope {
            templates,
            mut metadata,
            mut versions,
            analytics,
            ..
        } = envelope;
        let usage = analytics.map(|a| a.template_stats).unwrap_or_default();

        for template in templates {
            let original_id = template.id.clone();
            let mut template_metadata = match metadata.remove(&original_id) {
                Some(m) => m,
                None => TemplateMetadata {
                    usage_count: usage.get(&original_id).copied().unwrap_or(0),
                    ..Default::default()
                },
            };
            if self.store.category(&template_metadata.category_id).is_none() {
                template_metadata.category_id = DEFAULT_CATEGORY_ID.to_string();
            }
            let history = versions.as_mut().and_then(|v| v.remove(&original_id));

            match self
                .import_one(template, template_metadata, history, mode)
                .await
            {
                Ok(outcome) => report.record_success(source, outcome),
                Err(e) if e.is_validation() || matches!(e, TemplateError::Import(_)) => {
                    debug!("Rejected {} from {}: {}", original_id, source, e);
                    report.record_failure(&format!("{} ({})", source, original_id), &e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn import_one(
        &mut self,
        mut template: MessageTemplate,
        mut metadata: TemplateMetadata,
        history: Option<VersionFile>,
        mode: ImportMode,
    ) -> Result<ImportOutcome> {
        let original_id = template.id.clone();
        // Ids become file names, so they are checked even when validation is skipped
        validate_id("template", &original_id)?;
        if mode.validates() {
            validate_template(&template)?;
        }

        let mut overwritten = false;
        if self.id_taken(&original_id) {
            match mode {
                ImportMode::Strict => {
                    return Err(TemplateError::Conflict(format!(
                        "Template already exists: {}",
                        original_id
                    )));
                }
                ImportMode::Lenient => {
                    template.id = self.unique_id(&original_id, "imported");
                    validate_id("template", &template.id)?;
                }
                ImportMode::Skip => {
                    overwritten = true;
                    if let Some(existing) = self.store.metadata(&original_id) {
                        metadata.usage_count = metadata.usage_count.max(existing.usage_count);
                        metadata.created_at = existing.created_at;
                    }
                }
            }
        }

        if template.updated_at < template.created_at {
            template.updated_at = template.created_at;
        }
        metadata.current_version = None;
        metadata.updated_at = Utc::now();

        // The imported active version stands in for a fresh one
        let mut step = VersionStep::Create;
        if !overwritten {
            if let Some(file) = history {
                if self.versions.import_history(&template.id, file).await? {
                    debug!("Imported version history for {}", template.id);
                    step = VersionStep::ReuseMatching;
                }
            }
        }

        let message = if overwritten {
            "Overwritten by import".to_string()
        } else if template.id != original_id {
            format!("Imported as copy of {}", original_id)
        } else {
            "Imported template".to_string()
        };

        let template_id = template.id.clone();
        self.commit_save(template, metadata, IMPORT_AUTHOR, &message, step)
            .await?;

        Ok(ImportOutcome {
            template_id,
            original_id,
            overwritten,
        })
    }

    /// Add categories missing locally; existing ones are left untouched
    async fn import_categories(&mut self, categories: &[TemplateCategory]) -> Result<()> {
        let mut added = Vec::new();
        for category in categories {
            if self.store.category(&category.id).is_some()
                || validate_id("category", &category.id).is_err()
            {
                continue;
            }
            let mut category = category.clone();
            category.template_count = 0;
            category.usage_count = 0;
            added.push(category.id.clone());
            self.store.insert_category(category);
        }

        if added.is_empty() {
            return Ok(());
        }

        // Parents may arrive after their children, so links are checked once all are in
        for category_id in &added {
            let parent = self
                .store
                .category(category_id)
                .and_then(|c| c.parent_id.clone());
            if validate_category_parent(category_id, parent.as_deref(), self.store.category_map())
                .is_err()
            {
                warn!(
                    "Imported category {} has an invalid parent, moved to top level",
                    category_id
                );
                if let Some(category) = self.store.category_mut(category_id) {
                    category.parent_id = None;
                }
            }
        }

        self.store.save_categories().await?;
        info!("Imported {} categories", added.len());
        Ok(())
    }

    /// A category followed by its ancestors
    fn category_chain(&self, category_id: &str) -> Vec<TemplateCategory> {
        let mut chain = Vec::new();
        let mut current = Some(category_id.to_string());
        while let Some(id) = current {
            let Some(category) = self.store.category(&id) else {
                break;
            };
            if chain.iter().any(|c: &TemplateCategory| c.id == category.id) {
                break;
            }
            current = category.parent_id.clone();
            chain.push(category.clone());
        }
        chain
    }
}
