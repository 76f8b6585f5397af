//! Export envelopes and bulk import modes

use std::collections::BTreeSet;
use template_rs::import_export::{ExportOptions, ImportMode, EXPORT_FORMAT_VERSION};
use template_rs::templates::{
    CreateCategoryRequest, MessageTemplate, SaveOptions, UpdateTemplateRequest,
};
use template_rs::{Config, TemplateManager};
use tempfile::TempDir;

async fn setup_manager() -> (TempDir, TemplateManager) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.storage.analytics_database_url = "sqlite::memory:".to_string();
    let manager = TemplateManager::open(config).await.unwrap();
    (dir, manager)
}

async fn seed_promo(manager: &mut TemplateManager) {
    manager
        .create_category(CreateCategoryRequest {
            id: Some("promo".to_string()),
            name: "Promotions".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let template = MessageTemplate::email("t1", "Spring sale", "Sale for {name}", "Hello {name}");
    let options = SaveOptions {
        category_id: Some("promo".to_string()),
        tags: Some(BTreeSet::from(["seasonal".to_string()])),
        description: Some("Yearly spring campaign".to_string()),
        ..Default::default()
    };
    manager.save_template(template, options).await.unwrap();
}

#[tokio::test]
async fn test_export_import_roundtrip_on_fresh_store() {
    let (dir, mut source) = setup_manager().await;
    seed_promo(&mut source).await;

    let path = dir.path().join("t1.json");
    assert!(source.export_template("t1", &path).await.unwrap());
    assert!(!source.export_template("ghost", &path).await.unwrap());

    let (_other_dir, mut target) = setup_manager().await;
    let outcome = target.import_template(&path, ImportMode::Strict).await.unwrap();
    assert_eq!(outcome.template_id, "t1");
    assert!(!outcome.renamed());

    let original = source.get_template("t1").await.unwrap().unwrap();
    let imported = target.get_template("t1").await.unwrap().unwrap();
    assert!(imported.same_content(&original));

    let metadata = target.get_template_metadata("t1").unwrap();
    assert_eq!(metadata.category_id, "promo");
    assert_eq!(metadata.description, "Yearly spring campaign");
    assert!(target.get_category("promo").is_some());
    assert_eq!(target.get_version_history("t1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_import_modes_on_conflict() {
    let (dir, mut manager) = setup_manager().await;
    seed_promo(&mut manager).await;

    let path = dir.path().join("t1.json");
    manager.export_template("t1", &path).await.unwrap();

    let strict = manager.import_template(&path, ImportMode::Strict).await;
    assert!(strict.is_err());

    let first = manager.import_template(&path, ImportMode::Lenient).await.unwrap();
    assert_eq!(first.template_id, "t1_imported");
    assert!(first.renamed());
    let second = manager.import_template(&path, ImportMode::Lenient).await.unwrap();
    assert_eq!(second.template_id, "t1_imported_2");

    let overwrite = manager.import_template(&path, ImportMode::Skip).await.unwrap();
    assert!(overwrite.overwritten);
    assert_eq!(overwrite.template_id, "t1");
    assert_eq!(manager.list_templates().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_skip_mode_bypasses_validation() {
    let (dir, mut manager) = setup_manager().await;

    // Email template without a body
    let broken = MessageTemplate::email("broken", "Broken", "S", "");
    let path = dir.path().join("broken.json");
    tokio::fs::write(&path, serde_json::to_vec(&broken).unwrap())
        .await
        .unwrap();

    assert!(manager.import_template(&path, ImportMode::Strict).await.is_err());
    assert!(manager.import_template(&path, ImportMode::Lenient).await.is_err());

    let outcome = manager.import_template(&path, ImportMode::Skip).await.unwrap();
    assert_eq!(outcome.template_id, "broken");
    assert!(manager.get_template("broken").await.unwrap().is_some());
}

#[tokio::test]
async fn test_bulk_export_with_versions() {
    let (dir, mut source) = setup_manager().await;
    seed_promo(&mut source).await;
    let template = MessageTemplate::whatsapp("t2", "Reminder", "Don't forget {name}");
    source.save_template(template, SaveOptions::default()).await.unwrap();
    source
        .update_template(
            "t2",
            UpdateTemplateRequest {
                whatsapp_content: Some("Last call {name}".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    source.record_template_usage("t2", None, None).await.unwrap();

    let path = dir.path().join("all.json");
    let options = ExportOptions {
        include_versions: true,
        include_analytics: true,
        ..Default::default()
    };
    assert_eq!(source.export_templates(&path, &options).await.unwrap(), 2);

    let raw: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(raw["export_info"]["version"], EXPORT_FORMAT_VERSION);
    assert_eq!(raw["export_info"]["template_count"], 2);
    assert_eq!(raw["export_info"]["includes_versions"], true);
    assert_eq!(raw["analytics"]["template_stats"]["t2"], 1);

    let (_other_dir, mut target) = setup_manager().await;
    let report = target
        .bulk_import_templates(&[path.clone()], ImportMode::Strict)
        .await
        .unwrap();
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 0);

    // History travels with the template and is not duplicated on import
    let history = target.get_version_history("t2").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|v| v.is_active).count(), 1);
    assert_eq!(target.get_template_metadata("t2").unwrap().usage_count, 1);
}

#[tokio::test]
async fn test_bulk_import_reports_bad_files() {
    let (dir, mut manager) = setup_manager().await;

    let good = dir.path().join("good.json");
    let template = MessageTemplate::email("ok", "Ok", "S", "Body");
    tokio::fs::write(&good, serde_json::to_vec(&template).unwrap())
        .await
        .unwrap();

    let garbage = dir.path().join("garbage.json");
    tokio::fs::write(&garbage, b"not json").await.unwrap();

    let future = dir.path().join("future.json");
    tokio::fs::write(
        &future,
        br#"{
            "export_info": {"version": "3.0", "exported_at": "2024-01-01T00:00:00Z"},
            "templates": []
        }"#,
    )
    .await
    .unwrap();

    let missing = dir.path().join("missing.json");

    let report = manager
        .bulk_import_templates(&[good, garbage, future, missing], ImportMode::Lenient)
        .await
        .unwrap();
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 3);
    assert_eq!(report.messages.len(), 4);
}

#[tokio::test]
async fn test_lenient_rename_of_longest_id_stays_editable() {
    let (dir, mut manager) = setup_manager().await;
    let long_id = "a".repeat(128);
    let template = MessageTemplate::email(long_id.as_str(), "Long", "S", "Body");
    manager.save_template(template, SaveOptions::default()).await.unwrap();

    let path = dir.path().join("long.json");
    manager.export_template(&long_id, &path).await.unwrap();

    let outcome = manager.import_template(&path, ImportMode::Lenient).await.unwrap();
    assert!(outcome.renamed());
    assert_eq!(outcome.template_id.len(), 128);
    assert!(outcome.template_id.ends_with("_imported"));

    let request = UpdateTemplateRequest {
        content: Some("Edited".to_string()),
        ..Default::default()
    };
    let version = manager
        .update_template(&outcome.template_id, request, None)
        .await
        .unwrap();
    assert!(version.is_some());
}
