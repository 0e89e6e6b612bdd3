//! One process wide blob, shared by every storage path.

use futures::FutureExt;
use serde_json::json;
use std::borrow::Cow;

use crate::{
    cache::{CacheItem, CacheItemStore},
    config::ManagerConfig,
};

use super::{MetadataSource, SyncFuture};

pub const GLOBAL_MEMORY_SOURCE_ID: &str = "globalMemory";

const GLOBAL_STORAGE_KEY: &str = "global";

/// Like [`MemorySource`](super::MemorySource), but the storage path of a bind target is ignored
/// and the item is never evicted, so values survive every field unmounting.
#[derive(Debug, Clone)]
pub struct GlobalMemorySource {
    items: CacheItemStore,
    write_lock_cycles: u32,
}

impl GlobalMemorySource {
    pub fn new(config: &ManagerConfig) -> Self {
        GlobalMemorySource {
            items: CacheItemStore::default(),
            write_lock_cycles: config.write_lock_cycles,
        }
    }
}

impl MetadataSource for GlobalMemorySource {
    fn id(&self) -> &str {
        GLOBAL_MEMORY_SOURCE_ID
    }

    fn items(&self) -> &CacheItemStore {
        &self.items
    }

    fn items_mut(&mut self) -> &mut CacheItemStore {
        &mut self.items
    }

    fn cache_key<'a>(&self, _storage_path: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(GLOBAL_STORAGE_KEY)
    }

    fn default_cache_item(&mut self, _storage_path: &str) -> CacheItem {
        CacheItem::new(GLOBAL_STORAGE_KEY, json!({}), self.write_lock_cycles)
    }

    fn should_delete(&self, _item: &CacheItem) -> bool {
        false
    }

    fn sync_external(&self, _item: &CacheItem) -> SyncFuture {
        async { Ok(()) }.boxed()
    }
}
