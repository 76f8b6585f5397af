//! Version history through the template manager

use template_rs::templates::{MessageTemplate, SaveOptions, UpdateTemplateRequest};
use template_rs::{Config, TemplateError, TemplateManager};
use tempfile::TempDir;

async fn setup_manager(keep_count: usize, preserve_lineage: bool) -> (TempDir, TemplateManager) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    config.storage.analytics_database_url = "sqlite::memory:".to_string();
    config.versions.keep_count = keep_count;
    config.versions.preserve_lineage = preserve_lineage;
    let manager = TemplateManager::open(config).await.unwrap();
    (dir, manager)
}

async fn save_revisions(manager: &mut TemplateManager, id: &str, count: usize) -> Vec<String> {
    let mut versions = Vec::new();
    let template = MessageTemplate::email(id, "Revised", "Subject", "Revision 0");
    versions.push(
        manager
            .save_template(template, SaveOptions::default())
            .await
            .unwrap(),
    );
    for n in 1..count {
        let request = UpdateTemplateRequest {
            content: Some(format!("Revision {}", n)),
            ..Default::default()
        };
        versions.push(manager.update_template(id, request, None).await.unwrap().unwrap());
    }
    versions
}

async fn active_count(manager: &TemplateManager, id: &str) -> usize {
    manager
        .get_version_history(id)
        .await
        .unwrap()
        .iter()
        .filter(|v| v.is_active)
        .count()
}

#[tokio::test]
async fn test_exactly_one_active_version() {
    let (_dir, mut manager) = setup_manager(10, false).await;
    let versions = save_revisions(&mut manager, "t1", 4).await;
    assert_eq!(active_count(&manager, "t1").await, 1);

    manager.rollback_template("t1", &versions[1], None).await.unwrap();
    assert_eq!(active_count(&manager, "t1").await, 1);

    let history = manager.get_version_history("t1").await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[3].parent_version.as_deref(), Some(versions[0].as_str()));
}

#[tokio::test]
async fn test_rollback_restores_content() {
    let (_dir, mut manager) = setup_manager(10, false).await;
    let versions = save_revisions(&mut manager, "t1", 3).await;
    let before = manager.get_version_history("t1").await.unwrap().len();

    let rolled = manager
        .rollback_template("t1", &versions[0], Some("bob"))
        .await
        .unwrap();

    assert!(rolled.is_active);
    assert_eq!(rolled.author, "bob");
    assert_eq!(rolled.template.content, "Revision 0");
    assert_eq!(manager.get_version_history("t1").await.unwrap().len(), before + 1);

    let current = manager.get_template("t1").await.unwrap().unwrap();
    assert_eq!(current.content, "Revision 0");
    assert_eq!(
        manager.get_template_metadata("t1").unwrap().current_version,
        Some(rolled.version_id.clone())
    );

    // The search index follows the restored content
    let hits = manager.search_templates("revision", Default::default()).await.unwrap();
    assert_eq!(hits.len(), 1);

    let missing = manager.rollback_template("t1", "v99-0", None).await;
    assert!(matches!(missing, Err(TemplateError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_active_version_refused() {
    let (_dir, mut manager) = setup_manager(10, false).await;
    let versions = save_revisions(&mut manager, "t1", 2).await;

    assert!(!manager.delete_version("t1", &versions[1]).await.unwrap());
    assert_eq!(manager.get_version_history("t1").await.unwrap().len(), 2);

    assert!(manager.delete_version("t1", &versions[0]).await.unwrap());
    assert_eq!(manager.get_version_history("t1").await.unwrap().len(), 1);
    assert!(!manager.delete_version("t1", "v42-0").await.unwrap());
}

#[tokio::test]
async fn test_compare_versions() {
    let (_dir, mut manager) = setup_manager(10, false).await;
    let versions = save_revisions(&mut manager, "t1", 2).await;

    let comparison = manager
        .compare_versions("t1", &versions[0], &versions[1])
        .await
        .unwrap();
    assert!(comparison.has_changes());
    assert_eq!(comparison.changed_fields(), vec!["content"]);
    assert_eq!(comparison.changes.len(), 7);
}

#[tokio::test]
async fn test_cleanup_uses_configured_keep_count() {
    let (_dir, mut manager) = setup_manager(2, false).await;
    save_revisions(&mut manager, "t1", 6).await;

    let removed = manager.cleanup_old_versions("t1", None).await.unwrap();
    assert_eq!(removed, 4);

    let history = manager.get_version_history("t1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_active);
    assert_eq!(history[0].template.content, "Revision 5");
}

#[tokio::test]
async fn test_version_stats() {
    let (_dir, mut manager) = setup_manager(10, false).await;
    save_revisions(&mut manager, "t1", 3).await;

    let stats = manager.version_stats("t1").await.unwrap();
    assert_eq!(stats.version_count, 3);
    assert_eq!(stats.authors, vec!["system"]);
    assert!(stats.first_created_at <= stats.last_created_at);

    let empty = manager.version_stats("ghost").await.unwrap();
    assert_eq!(empty.version_count, 0);
}

#[tokio::test]
async fn test_cleanup_preserving_lineage_keeps_ancestors() {
    let (_dir, mut manager) = setup_manager(1, true).await;
    save_revisions(&mut manager, "t1", 4).await;

    // Every older version is an ancestor of the active one
    assert_eq!(manager.cleanup_old_versions("t1", None).await.unwrap(), 0);
    assert_eq!(manager.get_version_history("t1").await.unwrap().len(), 4);
}
