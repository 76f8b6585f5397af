//! Version manager
//!
//! Keeps an append-only history per template in `versions/{template_id}.json`
//! with exactly one active version.

use crate::error::{Result, TemplateError};
use crate::storage::json_store::{json_file_stems, read_json, remove_if_exists, write_json_atomic};
use crate::templates::MessageTemplate;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::types::*;

/// Manages template version files
pub struct VersionManager {
    versions_dir: PathBuf,
    preserve_lineage: bool,
}

impl VersionManager {
    /// Create a version manager rooted at `versions_dir`
    pub fn new(versions_dir: PathBuf, preserve_lineage: bool) -> Self {
        Self {
            versions_dir,
            preserve_lineage,
        }
    }

    /// Create the versions directory
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.versions_dir).await?;
        Ok(())
    }

    fn file_path(&self, template_id: &str) -> PathBuf {
        self.versions_dir.join(format!("{}.json", template_id))
    }

    /// Load the version file of a template
    pub async fn load(&self, template_id: &str) -> Result<Option<VersionFile>> {
        read_json(&self.file_path(template_id)).await
    }

    async fn store(&self, file: &mut VersionFile) -> Result<()> {
        file.updated_at = Utc::now();
        write_json_atomic(&self.file_path(&file.template_id), file).await
    }

    /// Record a new version and make it the active one
    ///
    /// `parent_version` defaults to the currently active version.
    pub async fn create_version(
        &self,
        template: &MessageTemplate,
        author: &str,
        message: &str,
        parent_version: Option<&str>,
    ) -> Result<String> {
        let mut file = self
            .load(&template.id)
            .await?
            .unwrap_or_else(|| VersionFile::new(&template.id));

        let sequence = file.next_sequence();
        let latest = file.versions.values().map(|v| v.created_at).max();
        let created_at = match latest {
            Some(latest) if latest > Utc::now() => latest,
            _ => Utc::now(),
        };
        let version_id = format!("v{}-{}", sequence, created_at.timestamp_millis());

        let parent_version = parent_version
            .map(str::to_string)
            .or_else(|| file.active_version.clone());

        for version in file.versions.values_mut() {
            version.is_active = false;
        }

        file.versions.insert(
            version_id.clone(),
            TemplateVersion {
                version_id: version_id.clone(),
                sequence,
                template: template.clone(),
                author: author.to_string(),
                message: message.to_string(),
                parent_version,
                created_at,
                is_active: true,
            },
        );
        file.active_version = Some(version_id.clone());

        self.store(&mut file).await?;

        debug!("Created version {} for template {}", version_id, template.id);
        Ok(version_id)
    }

    pub async fn get_version(
        &self,
        template_id: &str,
        version_id: &str,
    ) -> Result<Option<TemplateVersion>> {
        Ok(self
            .load(template_id)
            .await?
            .and_then(|mut f| f.versions.remove(version_id)))
    }

    pub async fn get_active_version(&self, template_id: &str) -> Result<Option<TemplateVersion>> {
        Ok(self
            .load(template_id)
            .await?
            .and_then(|f| f.active().cloned()))
    }

    /// All versions, newest first
    pub async fn get_version_history(&self, template_id: &str) -> Result<Vec<TemplateVersion>> {
        Ok(self
            .load(template_id)
            .await?
            .map(|f| f.sorted_newest_first().into_iter().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn version_count(&self, template_id: &str) -> Result<usize> {
        Ok(self
            .load(template_id)
            .await?
            .map(|f| f.versions.len())
            .unwrap_or(0))
    }

    /// Create a new version carrying the content of `version_id`
    ///
    /// History is never rewritten: the rollback is itself a new version whose
    /// parent is the version that was active before.
    pub async fn rollback_to_version(
        &self,
        template_id: &str,
        version_id: &str,
        author: &str,
    ) -> Result<TemplateVersion> {
        let target = self.get_version(template_id, version_id).await?.ok_or_else(|| {
            TemplateError::NotFound(format!(
                "Version {} of template {}",
                version_id, template_id
            ))
        })?;

        let mut snapshot = target.template.clone();
        snapshot.updated_at = Utc::now();
        if snapshot.updated_at < snapshot.created_at {
            snapshot.updated_at = snapshot.created_at;
        }

        let new_id = self
            .create_version(
                &snapshot,
                author,
                &format!("Rollback to version {}", version_id),
                None,
            )
            .await?;

        info!(
            "Rolled back template {} to {} as new version {}",
            template_id, version_id, new_id
        );

        self.get_version(template_id, &new_id)
            .await?
            .ok_or_else(|| TemplateError::Storage("Version disappeared after rollback".to_string()))
    }

    /// Flat field-by-field comparison of two versions
    pub async fn compare_versions(
        &self,
        template_id: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<VersionComparison> {
        let file = self.load(template_id).await?.ok_or_else(|| {
            TemplateError::NotFound(format!("No versions for template {}", template_id))
        })?;

        let from = file.versions.get(from_version).ok_or_else(|| {
            TemplateError::NotFound(format!("Version {} of template {}", from_version, template_id))
        })?;
        let to = file.versions.get(to_version).ok_or_else(|| {
            TemplateError::NotFound(format!("Version {} of template {}", to_version, template_id))
        })?;

        Ok(VersionComparison {
            template_id: template_id.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            changes: diff_templates(&from.template, &to.template),
        })
    }

    /// Delete one version; the active version is never deleted
    pub async fn delete_version(&self, template_id: &str, version_id: &str) -> Result<bool> {
        let Some(mut file) = self.load(template_id).await? else {
            return Ok(false);
        };

        if file.active_version.as_deref() == Some(version_id) {
            warn!(
                "Refusing to delete active version {} of template {}",
                version_id, template_id
            );
            return Ok(false);
        }

        if file.versions.remove(version_id).is_none() {
            return Ok(false);
        }

        self.store(&mut file).await?;
        Ok(true)
    }

    /// Keep the active version plus the `keep_count` most recent ones
    ///
    /// Without lineage preservation, a retained version may end up pointing
    /// at a deleted parent. Returns the number of versions removed.
    pub async fn cleanup_old_versions(
        &self,
        template_id: &str,
        keep_count: usize,
    ) -> Result<usize> {
        let Some(mut file) = self.load(template_id).await? else {
            return Ok(0);
        };

        let mut keep: HashSet<String> = file
            .sorted_newest_first()
            .into_iter()
            .take(keep_count)
            .map(|v| v.version_id.clone())
            .collect();
        if let Some(active) = &file.active_version {
            keep.insert(active.clone());
        }

        if self.preserve_lineage {
            let roots: Vec<String> = keep.iter().cloned().collect();
            for root in roots {
                let mut parent = file.versions.get(&root).and_then(|v| v.parent_version.clone());
                while let Some(id) = parent {
                    if !keep.insert(id.clone()) {
                        break;
                    }
                    parent = file.versions.get(&id).and_then(|v| v.parent_version.clone());
                }
            }
        }

        let before = file.versions.len();
        file.versions.retain(|id, _| keep.contains(id));
        let removed = before - file.versions.len();

        if removed > 0 {
            self.store(&mut file).await?;
            info!(
                "Removed {} old version(s) of template {}",
                removed, template_id
            );
        }

        Ok(removed)
    }

    /// Drop the whole history of a template
    pub async fn delete_all_versions(&self, template_id: &str) -> Result<bool> {
        remove_if_exists(&self.file_path(template_id)).await
    }

    /// Ids of every template with a version file
    pub async fn versioned_template_ids(&self) -> Result<Vec<String>> {
        json_file_stems(&self.versions_dir).await
    }

    pub async fn version_stats(&self, template_id: &str) -> Result<VersionStats> {
        let file = self.load(template_id).await?;
        let Some(file) = file else {
            return Ok(VersionStats {
                template_id: template_id.to_string(),
                version_count: 0,
                active_version: None,
                authors: Vec::new(),
                first_created_at: None,
                last_created_at: None,
            });
        };

        let authors: BTreeSet<String> = file.versions.values().map(|v| v.author.clone()).collect();

        Ok(VersionStats {
            template_id: template_id.to_string(),
            version_count: file.versions.len(),
            active_version: file.active_version.clone(),
            authors: authors.into_iter().collect(),
            first_created_at: file.versions.values().map(|v| v.created_at).min(),
            last_created_at: file.versions.values().map(|v| v.created_at).max(),
        })
    }

    /// Install a history brought in by an import, re-keyed to `template_id`
    ///
    /// An existing local history wins; returns whether the file was written.
    pub async fn import_history(&self, template_id: &str, mut file: VersionFile) -> Result<bool> {
        if self.load(template_id).await?.is_some() {
            debug!("Keeping local history of {}, imported one ignored", template_id);
            return Ok(false);
        }

        file.template_id = template_id.to_string();
        for version in file.versions.values_mut() {
            version.template.id = template_id.to_string();
        }

        // Repair the single-active invariant if the import broke it
        let active = file
            .active_version
            .clone()
            .filter(|id| file.versions.contains_key(id))
            .or_else(|| file.sorted_newest_first().first().map(|v| v.version_id.clone()));
        for version in file.versions.values_mut() {
            version.is_active = Some(&version.version_id) == active.as_ref();
        }
        file.active_version = active;

        self.store(&mut file).await?;
        Ok(true)
    }
}

fn diff_templates(from: &MessageTemplate, to: &MessageTemplate) -> Vec<FieldChange> {
    fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
        items
            .into_iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    let fields = [
        ("name", from.name.clone(), to.name.clone()),
        ("subject", from.subject.clone(), to.subject.clone()),
        ("content", from.content.clone(), to.content.clone()),
        (
            "whatsapp_content",
            from.whatsapp_content.clone(),
            to.whatsapp_content.clone(),
        ),
        ("channels", join(&from.channels), join(&to.channels)),
        ("variables", join(&from.variables), join(&to.variables)),
        ("language", from.language.clone(), to.language.clone()),
    ];

    fields
        .into_iter()
        .map(|(field, old_value, new_value)| FieldChange {
            field: field.to_string(),
            changed: old_value != new_value,
            old_value,
            new_value,
        })
        .collect()
}
