//! Integration tests for FrontmatterWatcher (file watching feeding the manager)
//!
//! These tests verify end-to-end behavior using the public API:
//! - Edits made on disk reaching subscribed fields
//! - Our own writes not bouncing back over newer local state
//!
//! Tests focus on observable behavior rather than internal implementation details.
#![cfg(feature = "service")]

mod common;

use common::*;
use fieldsync_core::watch::FrontmatterWatcher;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use test_log::test;

const DEBOUNCE: Duration = Duration::from_millis(100);

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_disk_edit_reaches_field() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let manager = vault_manager(vault);
    let watcher = FrontmatterWatcher::new(manager.clone(), vault, DEBOUNCE).unwrap();

    let title = Recorder::default();
    manager
        .subscribe(frontmatter("daily.md", &["title"]), title.clone())
        .unwrap();
    assert_eq!(title.last(), Some(json!("Daily")));

    std::fs::write(
        vault.join("daily.md"),
        "---\ntitle: Edited in another app\n---\n\n# Daily\n",
    )
    .unwrap();

    let arrived = wait_until(Duration::from_secs(5), || {
        title.last() == Some(json!("Edited in another app"))
    })
    .await;
    assert!(arrived, "watcher did not deliver the edit: {:?}", title.values());
    watcher.stop().unwrap();
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_own_write_does_not_bounce_back() {
    let temp_dir = TempDir::new().unwrap();
    let vault = create_test_vault(&temp_dir);
    let manager = vault_manager(vault);
    let watcher = FrontmatterWatcher::new(manager.clone(), vault, DEBOUNCE).unwrap();

    let writer = manager
        .subscribe(frontmatter("daily.md", &["done"]), |_: &Value| {})
        .unwrap();
    let done = Recorder::default();
    manager
        .subscribe(frontmatter("daily.md", &["done"]), done.clone())
        .unwrap();

    manager.update(&writer, json!(true)).unwrap();
    manager.tick().await;
    // a second local write while the first one is still on its way to disk
    manager.update(&writer, json!("later")).unwrap();

    tokio::time::sleep(DEBOUNCE * 5).await;
    assert_eq!(
        manager.read(&frontmatter("daily.md", &["done"])).unwrap(),
        json!("later")
    );
    assert_eq!(done.last(), Some(json!("later")));
    watcher.stop().unwrap();
}
