//! Per storage path cached metadata and its staleness bookkeeping.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::subscription::SubscriptionId;

/// The cached blob for one `(source, storage_path)` pair plus the ids of the subscriptions
/// currently bound to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheItem {
    pub storage_path: String,
    pub data: Value,
    pub(crate) subscriptions: Vec<SubscriptionId>,
    pub cycles_since_internal_change: u32,
    pub pending_internal_change: bool,
    pub cycles_since_inactive: u32,
    pub inactive: bool,
}

impl CacheItem {
    /// A freshly materialized item. It starts outside the write-lock window so the first
    /// external snapshot is accepted, and inactive until someone subscribes.
    pub fn new<S: Into<String>>(storage_path: S, data: Value, write_lock_cycles: u32) -> Self {
        CacheItem {
            storage_path: storage_path.into(),
            data,
            subscriptions: Vec::new(),
            cycles_since_internal_change: write_lock_cycles.saturating_add(1),
            pending_internal_change: false,
            cycles_since_inactive: 0,
            inactive: true,
        }
    }

    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    pub fn is_write_locked(&self, write_lock_cycles: u32) -> bool {
        self.cycles_since_internal_change < write_lock_cycles
    }

    pub(crate) fn add_subscription(&mut self, id: SubscriptionId) {
        if !self.subscriptions.contains(&id) {
            self.subscriptions.push(id);
        }
    }

    pub(crate) fn mark_active(&mut self) {
        self.inactive = false;
        self.cycles_since_inactive = 0;
    }

    /// Returns false if `id` was not subscribed.
    pub(crate) fn remove_subscription(&mut self, id: &SubscriptionId) -> bool {
        let Some(idx) = self.subscriptions.iter().position(|sub| sub == id) else {
            return false;
        };
        self.subscriptions.remove(idx);
        if self.subscriptions.is_empty() {
            self.inactive = true;
            self.cycles_since_inactive = 0;
        }
        true
    }

    pub(crate) fn mark_internal_change(&mut self) {
        self.pending_internal_change = true;
        self.cycles_since_internal_change = 0;
    }
}

/// The keyed collection of cache items a source owns. Guarantees at most one item per storage
/// path.
#[derive(Debug, Default, Clone)]
pub struct CacheItemStore {
    items: BTreeMap<String, CacheItem>,
}

impl CacheItemStore {
    pub fn get(&self, storage_path: &str) -> Option<&CacheItem> {
        self.items.get(storage_path)
    }

    pub fn get_mut(&mut self, storage_path: &str) -> Option<&mut CacheItem> {
        self.items.get_mut(storage_path)
    }

    pub fn contains(&self, storage_path: &str) -> bool {
        self.items.contains_key(storage_path)
    }

    /// Return the item at `storage_path`, creating it with `create` if absent.
    pub fn get_or_insert_with<F>(&mut self, storage_path: &str, create: F) -> &mut CacheItem
    where
        F: FnOnce() -> CacheItem,
    {
        self.items
            .entry(storage_path.to_string())
            .or_insert_with(create)
    }

    pub fn remove(&mut self, storage_path: &str) -> Option<CacheItem> {
        self.items.remove(storage_path)
    }

    pub fn storage_paths(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_log::test;

    #[test]
    fn test_new_item_is_unlocked_and_inactive() {
        let item = CacheItem::new("a.md", json!({}), 5);
        assert!(item.inactive);
        assert!(!item.is_write_locked(5));
        assert_eq!(item.cycles_since_internal_change, 6);
    }

    #[test]
    fn test_subscription_bookkeeping() {
        let mut item = CacheItem::new("a.md", json!({}), 5);
        let id = SubscriptionId::new();
        item.add_subscription(id);
        item.add_subscription(id);
        item.mark_active();
        assert_eq!(item.subscriptions().len(), 1);
        assert!(!item.inactive);

        item.cycles_since_inactive = 3;
        assert!(item.remove_subscription(&id));
        assert!(item.inactive);
        assert_eq!(item.cycles_since_inactive, 0);
        assert!(!item.remove_subscription(&id));
    }

    #[test]
    fn test_internal_change_locks_item() {
        let mut item = CacheItem::new("a.md", json!({}), 5);
        item.mark_internal_change();
        assert!(item.pending_internal_change);
        assert!(item.is_write_locked(5));
        item.cycles_since_internal_change = 5;
        assert!(!item.is_write_locked(5));
    }

    #[test]
    fn test_store_keeps_one_item_per_path() {
        let mut store = CacheItemStore::default();
        store.get_or_insert_with("a.md", || CacheItem::new("a.md", json!({"n": 1}), 5));
        let item = store.get_or_insert_with("a.md", || CacheItem::new("a.md", json!({"n": 2}), 5));
        assert_eq!(item.data, json!({"n": 1}));
        assert_eq!(store.len(), 1);
        assert!(store.remove("a.md").is_some());
        assert!(store.is_empty());
    }
}
