//! # Frontmatter Watcher
//!
//! [`FrontmatterWatcher`] closes the loop for the frontmatter source: local writes reach disk
//! through the manager's maintenance tick, and edits made on disk by anything else come back
//! through this watcher.
//!
//! ## Overview
//!
//! - **File watching**: recursive filesystem notifications below the source root
//! - **Debouncing**: rapid modifications of one file are batched into a single reload
//! - **Write lock**: the manager ignores snapshots of files it has written itself within the
//!   last `write_lock_cycles` ticks, so the watcher does not need to know who wrote a file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldsync_core::{config::ManagerConfig, manager::MetadataManager, watch::FrontmatterWatcher};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fieldsync_core::FieldsyncError> {
//! let manager = MetadataManager::with_builtin_sources(ManagerConfig::default(), "/path/to/vault")?;
//! manager.start()?;
//! let watcher = FrontmatterWatcher::new(manager.clone(), "/path/to/vault", Duration::from_millis(300))?;
//!
//! // ... subscribe fields, run the application ...
//!
//! watcher.stop()?;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::{
    fs::read_to_string,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::FieldsyncError,
    manager::MetadataManager,
    source::frontmatter::{parse_frontmatter, storage_path_below, FRONTMATTER_SOURCE_ID},
};

/// A file system watcher with debouncing for a frontmatter root
type RootWatcher = Debouncer<RecommendedWatcher, FileIdMap>;

pub struct FrontmatterWatcher {
    root: PathBuf,
    debouncer: RootWatcher,
}

impl FrontmatterWatcher {
    /// Start watching `root`. Asynchronous compute functions triggered by a reload run on the
    /// tokio runtime current at construction, if any.
    #[tracing::instrument(skip_all)]
    pub fn new<P: Into<PathBuf>>(
        manager: MetadataManager,
        root: P,
        debounce: Duration,
    ) -> Result<Self, FieldsyncError> {
        let root = root.into();
        let runtime = tokio::runtime::Handle::try_current().ok();
        let debouncer_root = root.clone();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let _entered = runtime.as_ref().map(|runtime| runtime.enter());
            match result {
                Ok(events) => {
                    for event in events.iter() {
                        if !matches!(event.event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        {
                            continue;
                        }
                        for path in event.paths.iter() {
                            match reload_file(&manager, &debouncer_root, path) {
                                Ok(true) => {
                                    tracing::debug!("[FrontmatterWatcher] reloaded {:?}", path)
                                }
                                Ok(false) => {}
                                Err(err) => tracing::warn!(
                                    "[FrontmatterWatcher] could not reload {:?}: {}",
                                    path,
                                    err
                                ),
                            }
                        }
                    }
                }
                Err(errors) => {
                    tracing::error!("Notify debouncer returned errors: {:?}", errors);
                }
            }
        })?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        tracing::info!("[FrontmatterWatcher] watching {:?}", root);

        Ok(FrontmatterWatcher { root, debouncer })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(mut self) -> Result<(), FieldsyncError> {
        let unwatch_res = self.debouncer.watcher().unwatch(&self.root);
        tracing::debug!("Unwatch_res(path: {:?}) = {:?}", self.root, unwatch_res);
        unwatch_res?;
        Ok(())
    }
}

/// Whether `path` looks like a markdown document worth reloading.
pub fn is_watched_document(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .is_some_and(|file_name| file_name.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "md")
}

/// Read the frontmatter of one changed file below `root` and hand it to the manager. Returns
/// whether the cache took the snapshot; files nobody is subscribed to, files that vanished and
/// items inside their write-lock window are skipped.
pub fn reload_file(
    manager: &MetadataManager,
    root: &Path,
    path: &Path,
) -> Result<bool, FieldsyncError> {
    if !is_watched_document(path) {
        return Ok(false);
    }
    let Some(storage_path) = storage_path_below(root, path) else {
        return Ok(false);
    };
    let content = match read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    let blob = parse_frontmatter(&content)?;
    manager.on_external_update(FRONTMATTER_SOURCE_ID, &storage_path, blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bind_target::BindTarget, config::ManagerConfig, prop_path::PropPath,
        tests::helpers::{init_logging, Recorder},
    };
    use serde_json::json;
    use test_log::test;

    #[test]
    fn test_is_watched_document() {
        assert!(is_watched_document(Path::new("/vault/note.md")));
        assert!(!is_watched_document(Path::new("/vault/.hidden.md")));
        assert!(!is_watched_document(Path::new("/vault/image.png")));
        assert!(!is_watched_document(Path::new("/vault/notes")));
    }

    #[test]
    fn test_reload_file_updates_subscribers() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "---\ntitle: Before\n---\n").unwrap();

        let manager =
            MetadataManager::with_builtin_sources(ManagerConfig::default(), dir.path()).unwrap();
        let seen = Recorder::default();
        manager
            .subscribe(
                BindTarget::new(FRONTMATTER_SOURCE_ID, "note.md", PropPath::from_keys(["title"])),
                seen.clone(),
            )
            .unwrap();
        assert_eq!(seen.last(), Some(json!("Before")));

        std::fs::write(&path, "---\ntitle: After\n---\n").unwrap();
        assert!(reload_file(&manager, dir.path(), &path).unwrap());
        assert_eq!(seen.last(), Some(json!("After")));

        // not cached, hence nothing to update
        let other = dir.path().join("other.md");
        std::fs::write(&other, "---\ntitle: Other\n---\n").unwrap();
        assert!(!reload_file(&manager, dir.path(), &other).unwrap());
        assert!(!reload_file(&manager, dir.path(), &dir.path().join("gone.md")).unwrap());
    }

    #[test]
    fn test_reload_respects_write_lock() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "---\ncount: 1\n---\n").unwrap();

        let manager =
            MetadataManager::with_builtin_sources(ManagerConfig::default(), dir.path()).unwrap();
        let target = BindTarget::new(FRONTMATTER_SOURCE_ID, "note.md", PropPath::from_keys(["count"]));
        let sub = manager.subscribe(target.clone(), |_: &serde_json::Value| {}).unwrap();
        manager.update(&sub, json!(2)).unwrap();

        std::fs::write(&path, "---\ncount: 7\n---\n").unwrap();
        assert!(!reload_file(&manager, dir.path(), &path).unwrap());
        assert_eq!(manager.read(&target).unwrap(), json!(2));
    }

    #[test(tokio::test)]
    async fn test_watcher_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            MetadataManager::with_builtin_sources(ManagerConfig::default(), dir.path()).unwrap();
        let watcher =
            FrontmatterWatcher::new(manager, dir.path(), Duration::from_millis(50)).unwrap();
        assert_eq!(watcher.root(), dir.path());
        watcher.stop().unwrap();
    }
}
