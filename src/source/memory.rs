//! In-process scratch storage, keyed by storage path.

use futures::FutureExt;
use serde_json::json;

use crate::{
    cache::{CacheItem, CacheItemStore},
    config::ManagerConfig,
};

use super::{MetadataSource, SyncFuture};

pub const MEMORY_SOURCE_ID: &str = "memory";

/// Holds data only for as long as a cache item lives: once every subscriber of a storage path
/// is gone and the item is evicted, its data is gone too.
#[derive(Debug, Clone)]
pub struct MemorySource {
    id: String,
    items: CacheItemStore,
    write_lock_cycles: u32,
}

impl MemorySource {
    pub fn new(config: &ManagerConfig) -> Self {
        Self::with_id(MEMORY_SOURCE_ID, config)
    }

    pub fn with_id<S: Into<String>>(id: S, config: &ManagerConfig) -> Self {
        MemorySource {
            id: id.into(),
            items: CacheItemStore::default(),
            write_lock_cycles: config.write_lock_cycles,
        }
    }
}

impl MetadataSource for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn items(&self) -> &CacheItemStore {
        &self.items
    }

    fn items_mut(&mut self) -> &mut CacheItemStore {
        &mut self.items
    }

    fn default_cache_item(&mut self, storage_path: &str) -> CacheItem {
        CacheItem::new(storage_path, json!({}), self.write_lock_cycles)
    }

    fn should_delete(&self, _item: &CacheItem) -> bool {
        true
    }

    fn sync_external(&self, _item: &CacheItem) -> SyncFuture {
        async { Ok(()) }.boxed()
    }
}
