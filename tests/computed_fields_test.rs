//! Integration tests for declared and computed fields
//!
//! These tests verify end-to-end behavior using the public API:
//! - Resolving field declarations against document defaults and local scopes
//! - Derived fields over frontmatter and memory sources
//! - Loop detection across sources
//! - Manager configuration loaded from TOML

mod common;

use common::*;
use fieldsync_core::{
    bind_target::{BindTarget, BindTargetDeclaration, DeclarationDefaults},
    config::ManagerConfig,
    manager::MetadataManager,
    prop_path::PropPath,
    source::{frontmatter::FRONTMATTER_SOURCE_ID, memory::MEMORY_SOURCE_ID},
    subscription::ComputeFn,
    FieldsyncError,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use test_log::test;

/// Counts the entries of a task list whose `done` flag is set.
fn completed_tasks() -> ComputeFn {
    ComputeFn::sync(|values| {
        let tasks = values.first().and_then(Value::as_array);
        Ok(json!(tasks
            .map(|tasks| tasks
                .iter()
                .filter(|task| task["done"] == json!(true))
                .count())
            .unwrap_or(0)))
    })
}

#[test]
fn test_declarations_resolve_against_current_document() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let manager = vault_manager(vault);
    let default_source = manager.default_source();
    let defaults = DeclarationDefaults {
        source_id: &default_source,
        current_file: "daily.md",
    };

    let declaration: BindTargetDeclaration =
        serde_json::from_str(r#"{"prop_path": ["title"]}"#).unwrap();
    let title = declaration.resolve(&defaults, None).unwrap();
    assert_eq!(title, frontmatter("daily.md", &["title"]));

    let seen = Recorder::default();
    manager.subscribe(title, seen.clone()).unwrap();
    assert_eq!(seen.values(), vec![json!("Daily")]);

    let scope = frontmatter("daily.md", &["tasks"]);
    let scoped: BindTargetDeclaration =
        serde_json::from_str(r#"{"prop_path": [0, "name"], "local_scope": true}"#).unwrap();
    let name = scoped.resolve(&defaults, Some(&scope)).unwrap();
    assert_eq!(name.prop_path.to_string(), "tasks[0].name");
    assert_eq!(name.storage_path, "daily.md");

    let seen = Recorder::default();
    manager.subscribe(name, seen.clone()).unwrap();
    assert_eq!(seen.values(), vec![json!("water plants")]);
}

#[test]
fn test_progress_field_over_frontmatter() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let manager = vault_manager(vault);

    let progress = Recorder::default();
    manager
        .subscribe_computed(
            BindTarget::new(
                MEMORY_SOURCE_ID,
                "daily.md",
                PropPath::from_keys(["completed"]),
            ),
            vec![frontmatter("daily.md", &["tasks"]).listening_to_children()],
            completed_tasks(),
            progress.clone(),
        )
        .unwrap();
    assert_eq!(progress.last(), Some(json!(0)));

    let task = manager
        .subscribe(frontmatter("daily.md", &["tasks"]), |_: &Value| {})
        .unwrap();
    manager
        .update(
            &task,
            json!([
                {"name": "water plants", "done": true},
                {"name": "call home", "done": true},
                {"name": "read", "done": false}
            ]),
        )
        .unwrap();
    assert_eq!(progress.last(), Some(json!(2)));
    assert!(progress.errors().is_empty());
}

#[test]
fn test_loop_across_sources_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let manager = vault_manager(vault);
    let scratch = BindTarget::new(
        MEMORY_SOURCE_ID,
        "daily.md",
        PropPath::from_keys(["copy"]),
    );

    manager
        .subscribe_computed(
            scratch.clone(),
            vec![frontmatter("daily.md", &["title"])],
            ComputeFn::sync(|values| Ok(values[0].clone())),
            |_: &Value| {},
        )
        .unwrap();
    let count = manager.subscription_count();

    let err = manager
        .subscribe_computed(
            frontmatter("daily.md", &["title"]),
            vec![scratch],
            ComputeFn::sync(|values| Ok(values[0].clone())),
            |_: &Value| {},
        )
        .unwrap_err();
    assert!(matches!(err, FieldsyncError::BindTargetLoop(ref chain) if chain.len() >= 3));
    assert!(err.to_string().contains(FRONTMATTER_SOURCE_ID));
    assert_eq!(manager.subscription_count(), count);
}

#[test]
fn test_manager_from_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let config_path = temp_dir.path().join("fieldsync.toml");
    std::fs::write(
        &config_path,
        r#"
[manager]
write_lock_cycles = 8
default_source = "memory"
"#,
    )
    .unwrap();

    let config = ManagerConfig::from_toml_file(&config_path).unwrap();
    assert_eq!(config.write_lock_cycles, 8);
    let manager = MetadataManager::with_builtin_sources(config, vault).unwrap();
    assert_eq!(manager.default_source(), MEMORY_SOURCE_ID);
    assert_eq!(
        manager.source_ids(),
        vec!["frontmatter", "globalMemory", "memory"]
    );

    let unknown = ManagerConfig {
        default_source: "database".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        MetadataManager::with_builtin_sources(unknown, vault),
        Err(FieldsyncError::SourceNotFound(_))
    ));
}
