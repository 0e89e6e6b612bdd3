//! Pluggable metadata backends.
//!
//! A [`MetadataSource`] owns the [`CacheItem`]s for one kind of storage and knows how to
//! materialize a missing item, persist a dirty one and decide whether an inactive one may be
//! dropped. Backends are registered with the
//! [`MetadataManager`](crate::manager::MetadataManager) under their [`MetadataSource::id`],
//! and bind targets select them by that id.
//!
//! ## Built-in Sources
//!
//! - [`FrontmatterSource`] (`"frontmatter"`) - YAML frontmatter of markdown files under a root
//!   directory
//! - [`MemorySource`] (`"memory"`) - per storage path scratch data that lives in process
//! - [`GlobalMemorySource`] (`"globalMemory"`) - one process wide blob shared by every storage
//!   path
//!
//! ## Implementing a Source
//!
//! Only the backend specific hooks are required; the cache bookkeeping is provided on top of
//! the [`CacheItemStore`] the source hands out:
//!
//! ```rust
//! use fieldsync_core::{
//!     cache::{CacheItem, CacheItemStore},
//!     source::{MetadataSource, SyncFuture},
//! };
//! use futures::FutureExt;
//!
//! #[derive(Default)]
//! struct ReadOnlySource {
//!     items: CacheItemStore,
//! }
//!
//! impl MetadataSource for ReadOnlySource {
//!     fn id(&self) -> &str {
//!         "readonly"
//!     }
//!
//!     fn items(&self) -> &CacheItemStore {
//!         &self.items
//!     }
//!
//!     fn items_mut(&mut self) -> &mut CacheItemStore {
//!         &mut self.items
//!     }
//!
//!     fn default_cache_item(&mut self, storage_path: &str) -> CacheItem {
//!         CacheItem::new(storage_path, serde_json::json!({"fixed": true}), 5)
//!     }
//!
//!     fn should_delete(&self, _item: &CacheItem) -> bool {
//!         true
//!     }
//!
//!     fn sync_external(&self, _item: &CacheItem) -> SyncFuture {
//!         async { Ok(()) }.boxed()
//!     }
//! }
//! ```

use futures::future::BoxFuture;
use serde_json::Value;
use std::borrow::Cow;

use crate::{
    bind_target::BindTarget,
    cache::{CacheItem, CacheItemStore},
    error::FieldsyncError,
    prop_path::PropPath,
    subscription::SubscriptionId,
};

pub mod frontmatter;
pub mod global;
pub mod memory;

pub use frontmatter::FrontmatterSource;
pub use global::GlobalMemorySource;
pub use memory::MemorySource;

/// Pending write of a cache item to the backing store. Owns everything it needs, so it can be
/// awaited after the manager lock is released.
pub type SyncFuture = BoxFuture<'static, Result<(), FieldsyncError>>;

pub trait MetadataSource: Send {
    fn id(&self) -> &str;

    fn items(&self) -> &CacheItemStore;

    fn items_mut(&mut self) -> &mut CacheItemStore;

    /// Build the initial item for a storage path that has no cache entry yet. Must not block on
    /// anything slower than a local snapshot read.
    fn default_cache_item(&mut self, storage_path: &str) -> CacheItem;

    /// Consent to evicting an item that has been inactive past the threshold.
    fn should_delete(&self, item: &CacheItem) -> bool;

    /// Persist `item` to the backing store. Failures are logged by the tick and not retried
    /// until the next local write.
    fn sync_external(&self, item: &CacheItem) -> SyncFuture;

    /// Map a bind target's storage path onto the key of the item holding it.
    fn cache_key<'a>(&self, storage_path: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(storage_path)
    }

    fn on_tick(&mut self, _storage_path: &str) {}

    fn on_delete(&mut self, _item: &CacheItem) {}

    /// Register `id` on the item for `target`, materializing the item on first use.
    fn subscribe(
        &mut self,
        id: SubscriptionId,
        target: &BindTarget,
    ) -> Result<&mut CacheItem, FieldsyncError> {
        let key = self.cache_key(&target.storage_path).into_owned();
        if !self.items().contains(&key) {
            tracing::debug!(
                "[{}] creating cache item for storage path '{}'",
                self.id(),
                key
            );
            let item = self.default_cache_item(&key);
            self.items_mut().get_or_insert_with(&key, || item);
        }
        let source_id = self.id().to_string();
        let item = self.items_mut().get_mut(&key).ok_or_else(|| {
            FieldsyncError::NotFound(format!("[{source_id}] no cache item for '{key}'"))
        })?;
        item.add_subscription(id);
        Ok(item)
    }

    /// Remove `id` from the item for `target`. Returns the item only if `id` was actually
    /// subscribed to it.
    fn unsubscribe(&mut self, id: &SubscriptionId, target: &BindTarget) -> Option<&mut CacheItem> {
        let key = self.cache_key(&target.storage_path).into_owned();
        let item = self.items_mut().get_mut(&key)?;
        if item.remove_subscription(id) {
            Some(item)
        } else {
            None
        }
    }

    fn cache_item(&self, storage_path: &str) -> Option<&CacheItem> {
        let key = self.cache_key(storage_path);
        self.items().get(&key)
    }

    fn cache_item_mut(&mut self, storage_path: &str) -> Option<&mut CacheItem> {
        let key = self.cache_key(storage_path).into_owned();
        self.items_mut().get_mut(&key)
    }

    fn storage_paths(&self) -> Vec<String> {
        self.items().storage_paths()
    }

    fn delete(&mut self, storage_path: &str) -> Option<CacheItem> {
        let key = self.cache_key(storage_path).into_owned();
        let item = self.items_mut().remove(&key)?;
        tracing::debug!("[{}] deleted cache item '{}'", self.id(), key);
        self.on_delete(&item);
        Some(item)
    }

    /// Write `value` at the target's prop path. Does not notify anyone.
    fn update(
        &mut self,
        value: Value,
        target: &BindTarget,
    ) -> Result<&mut CacheItem, FieldsyncError> {
        let source_id = self.id().to_string();
        let item = self
            .cache_item_mut(&target.storage_path)
            .ok_or_else(|| {
                FieldsyncError::NotFound(format!(
                    "[{source_id}] cannot update '{target}', storage path is not cached"
                ))
            })?;
        target.prop_path.set(&mut item.data, value)?;
        Ok(item)
    }

    fn update_entire_cache(&mut self, value: Value, storage_path: &str) -> Option<&mut CacheItem> {
        let item = self.cache_item_mut(storage_path)?;
        item.data = value;
        Some(item)
    }

    fn read_cache(&self, target: &BindTarget) -> Value {
        self.cache_item(&target.storage_path)
            .map(|item| self.read_cache_item(item, &target.prop_path))
            .unwrap_or(Value::Null)
    }

    fn read_cache_item(&self, item: &CacheItem, prop_path: &PropPath) -> Value {
        prop_path.get(&item.data).cloned().unwrap_or(Value::Null)
    }
}
