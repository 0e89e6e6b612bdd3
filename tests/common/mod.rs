//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use fieldsync_core::{
    bind_target::BindTarget, config::ManagerConfig, manager::MetadataManager,
    prop_path::PropPath, source::frontmatter::FRONTMATTER_SOURCE_ID, subscription::Listener,
    FieldsyncError,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a vault directory with `daily.md` (frontmatter and body) and `plain.md` (body only).
#[allow(dead_code)]
pub fn create_test_vault(temp_dir: &TempDir) -> &Path {
    let vault = temp_dir.path();
    let daily = r#"---
title: Daily
done: false
tasks:
  - name: water plants
    done: false
---

# Daily

Some notes.
"#;
    std::fs::write(vault.join("daily.md"), daily).unwrap();
    std::fs::write(vault.join("plain.md"), "# Plain\n\nNo metadata yet.\n").unwrap();
    vault
}

/// A manager over `vault` with short lock and eviction windows.
#[allow(dead_code)]
pub fn vault_manager(vault: &Path) -> MetadataManager {
    init_logging();
    let config = ManagerConfig {
        write_lock_cycles: 2,
        inactivity_threshold: 3,
        tick_interval_ms: 20,
        ..Default::default()
    };
    MetadataManager::with_builtin_sources(config, vault).unwrap()
}

#[allow(dead_code)]
pub fn frontmatter(storage_path: &str, keys: &[&str]) -> BindTarget {
    BindTarget::new(
        FRONTMATTER_SOURCE_ID,
        storage_path,
        PropPath::from_keys(keys.iter().copied()),
    )
}

/// A listener that keeps everything it is told.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Recorder {
    values: Arc<Mutex<Vec<Value>>>,
    errors: Arc<Mutex<Vec<FieldsyncError>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn values(&self) -> Vec<Value> {
        self.values.lock().clone()
    }

    pub fn last(&self) -> Option<Value> {
        self.values.lock().last().cloned()
    }

    pub fn errors(&self) -> Vec<FieldsyncError> {
        self.errors.lock().clone()
    }
}

impl Listener for Recorder {
    fn notify(&self, value: &Value) {
        self.values.lock().push(value.clone());
    }

    fn on_error(&self, error: &FieldsyncError) {
        self.errors.lock().push(error.clone());
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
