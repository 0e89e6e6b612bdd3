//! The lock-protected half of the manager: the source registry, the subscription arena and
//! every mutation of cache items. Nothing in here calls a listener; operations return the ids of
//! the subscriptions to notify, and the handle dispatches them once the lock is released.

use serde_json::Value;
use std::collections::HashMap;

use crate::{
    bind_target::{has_overlap, BindTarget},
    config::ManagerConfig,
    error::FieldsyncError,
    source::{MetadataSource, SyncFuture},
    subscription::{ComputeFn, SharedListener, SubscriptionId},
};

pub(crate) struct ComputedEntry {
    pub listener: SharedListener,
    /// Internal dependency subscriptions, in declaration order.
    pub dependencies: Vec<SubscriptionId>,
    pub compute: ComputeFn,
    /// Bumped on every recomputation; results of older runs are discarded.
    pub generation: u64,
}

pub(crate) enum Role {
    Plain(SharedListener),
    Dependency { parent: SubscriptionId },
    Computed(ComputedEntry),
}

pub(crate) struct SubscriptionEntry {
    pub target: BindTarget,
    pub role: Role,
}

/// What to do for a notified subscription once the lock is released.
pub(crate) enum Route {
    Notify(SharedListener, Value),
    Recompute(SubscriptionId),
    Drop,
}

/// Everything a recomputation needs, captured under the lock.
pub(crate) struct ComputeJob {
    pub listener: SharedListener,
    pub compute: ComputeFn,
    pub values: Vec<Value>,
    pub generation: u64,
}

/// A pending external sync collected by [`ManagerState::sweep`].
pub(crate) struct PendingSync {
    pub source_id: String,
    pub storage_path: String,
    pub future: SyncFuture,
}

pub(crate) struct ManagerState {
    pub config: ManagerConfig,
    pub default_source: String,
    pub sources: HashMap<String, Box<dyn MetadataSource>>,
    pub subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
}

impl ManagerState {
    pub fn new(config: ManagerConfig) -> Self {
        ManagerState {
            default_source: config.default_source.clone(),
            config,
            sources: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    pub fn source(&self, source_id: &str) -> Result<&dyn MetadataSource, FieldsyncError> {
        self.sources
            .get(source_id)
            .map(|source| &**source)
            .ok_or_else(|| FieldsyncError::SourceNotFound(source_id.to_string()))
    }

    pub fn source_mut(
        &mut self,
        source_id: &str,
    ) -> Result<&mut Box<dyn MetadataSource>, FieldsyncError> {
        self.sources
            .get_mut(source_id)
            .ok_or_else(|| FieldsyncError::SourceNotFound(source_id.to_string()))
    }

    /// Rewrite the storage path into the key of the cache item that holds it, so that targets
    /// sharing an item are comparable.
    pub fn canonical(&self, target: &BindTarget) -> Result<BindTarget, FieldsyncError> {
        let source = self.source(&target.source_id)?;
        Ok(BindTarget {
            storage_path: source.cache_key(&target.storage_path).into_owned(),
            ..target.clone()
        })
    }

    pub fn target_of(&self, id: &SubscriptionId) -> Option<BindTarget> {
        self.subscriptions.get(id).map(|entry| entry.target.clone())
    }

    /// Bind `id` to its cache item and return the current value at its prop path.
    fn attach(&mut self, id: SubscriptionId, target: &BindTarget) -> Result<Value, FieldsyncError> {
        let source = self.source_mut(&target.source_id)?;
        source.subscribe(id, target)?.mark_active();
        Ok(source.read_cache(target))
    }

    pub fn register_plain(
        &mut self,
        id: SubscriptionId,
        target: BindTarget,
        listener: SharedListener,
    ) -> Result<Value, FieldsyncError> {
        let value = self.attach(id, &target)?;
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                target,
                role: Role::Plain(listener),
            },
        );
        Ok(value)
    }

    /// Register a computed subscription together with one internal subscription per dependency.
    /// Sources of all targets must already have been resolved through [`Self::canonical`].
    pub fn register_computed(
        &mut self,
        id: SubscriptionId,
        target: BindTarget,
        dependencies: Vec<BindTarget>,
        compute: ComputeFn,
        listener: SharedListener,
    ) -> Result<Value, FieldsyncError> {
        let mut dependency_ids = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let dependency_id = SubscriptionId::new();
            self.attach(dependency_id, &dependency)?;
            tracing::debug!("[{id}] dependency {dependency_id} bound to {dependency}");
            self.subscriptions.insert(
                dependency_id,
                SubscriptionEntry {
                    target: dependency,
                    role: Role::Dependency { parent: id },
                },
            );
            dependency_ids.push(dependency_id);
        }

        let value = self.attach(id, &target)?;
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                target,
                role: Role::Computed(ComputedEntry {
                    listener,
                    dependencies: dependency_ids,
                    compute,
                    generation: 0,
                }),
            },
        );
        Ok(value)
    }

    /// Remove `id`, cascading to the dependencies of a computed subscription first. Unknown ids
    /// are ignored.
    pub fn remove(&mut self, id: &SubscriptionId) -> Result<(), FieldsyncError> {
        let (target, dependencies) = match self.subscriptions.get(id) {
            None => return Ok(()),
            Some(SubscriptionEntry {
                target,
                role: Role::Computed(computed),
            }) => (target.clone(), computed.dependencies.clone()),
            Some(entry) => (entry.target.clone(), Vec::new()),
        };
        for dependency in dependencies.iter() {
            self.remove(dependency)?;
        }

        let source = self.source_mut(&target.source_id)?;
        if let Some(item) = source.unsubscribe(id, &target) {
            if item.inactive {
                tracing::debug!(
                    "cache item '{}' has no subscribers left",
                    item.storage_path
                );
            }
        }
        self.subscriptions.remove(id);
        Ok(())
    }

    /// Write `value` to `target` on behalf of `writer`, mark the item dirty and collect the
    /// notifications for every other overlapping subscription.
    pub fn write(
        &mut self,
        writer: &SubscriptionId,
        target: &BindTarget,
        value: Value,
    ) -> Result<Vec<SubscriptionId>, FieldsyncError> {
        let source = self.source_mut(&target.source_id)?;
        source.update(value, target)?.mark_internal_change();
        self.listeners_of(writer, target)
    }

    fn listeners_of(
        &self,
        writer: &SubscriptionId,
        target: &BindTarget,
    ) -> Result<Vec<SubscriptionId>, FieldsyncError> {
        let source = self.source(&target.source_id)?;
        let Some(item) = source.cache_item(&target.storage_path) else {
            return Ok(Vec::new());
        };
        Ok(item
            .subscriptions()
            .iter()
            .filter(|id| *id != writer)
            .filter(|id| {
                self.subscriptions
                    .get(id)
                    .is_some_and(|entry| has_overlap(target, &entry.target))
            })
            .copied()
            .collect())
    }

    /// Replace the whole blob of an item with an external snapshot. Returns `None` when the
    /// item is not cached or still inside its write-lock window.
    pub fn external_update(
        &mut self,
        source_id: &str,
        storage_path: &str,
        blob: Value,
    ) -> Result<Option<Vec<SubscriptionId>>, FieldsyncError> {
        let write_lock_cycles = self.config.write_lock_cycles;
        let source = self.source_mut(source_id)?;
        let Some(item) = source.cache_item(storage_path) else {
            return Ok(None);
        };
        if item.is_write_locked(write_lock_cycles) {
            tracing::debug!(
                "[{source_id}] ignoring external update of '{storage_path}', \
                {} tick(s) since the last local write",
                item.cycles_since_internal_change
            );
            return Ok(None);
        }
        let Some(item) = source.update_entire_cache(blob, storage_path) else {
            return Ok(None);
        };
        Ok(Some(item.subscriptions().to_vec()))
    }

    /// Values are read at dispatch time, not when the notification was queued.
    pub fn route(&self, id: &SubscriptionId) -> Route {
        let Some(entry) = self.subscriptions.get(id) else {
            return Route::Drop;
        };
        let listener = match &entry.role {
            Role::Plain(listener) => listener,
            Role::Computed(computed) => &computed.listener,
            Role::Dependency { parent } => return Route::Recompute(*parent),
        };
        let value = self
            .source(&entry.target.source_id)
            .map(|source| source.read_cache(&entry.target))
            .unwrap_or(Value::Null);
        Route::Notify(listener.clone(), value)
    }

    /// Gather the current dependency values of a computed subscription and start a new
    /// generation.
    pub fn compute_job(&mut self, id: &SubscriptionId) -> Option<ComputeJob> {
        let entry = self.subscriptions.get(id)?;
        let Role::Computed(computed) = &entry.role else {
            return None;
        };
        let values = computed
            .dependencies
            .iter()
            .map(|dependency| {
                self.subscriptions
                    .get(dependency)
                    .and_then(|dependency| {
                        self.source(&dependency.target.source_id)
                            .ok()
                            .map(|source| source.read_cache(&dependency.target))
                    })
                    .unwrap_or(Value::Null)
            })
            .collect();

        let Some(SubscriptionEntry {
            role: Role::Computed(computed),
            ..
        }) = self.subscriptions.get_mut(id)
        else {
            return None;
        };
        computed.generation += 1;
        Some(ComputeJob {
            listener: computed.listener.clone(),
            compute: computed.compute.clone(),
            values,
            generation: computed.generation,
        })
    }

    /// Write a computed result back to its own target. Returns `None` if the subscription was
    /// removed or a newer computation has started since.
    pub fn apply_computed(
        &mut self,
        id: &SubscriptionId,
        generation: u64,
        value: Value,
    ) -> Result<Option<Vec<SubscriptionId>>, FieldsyncError> {
        let target = match self.subscriptions.get(id) {
            Some(SubscriptionEntry {
                target,
                role: Role::Computed(computed),
            }) if computed.generation == generation => target.clone(),
            _ => return Ok(None),
        };
        self.write(id, &target, value).map(Some)
    }

    /// One maintenance pass over every cache item of every source.
    pub fn sweep(&mut self) -> Vec<PendingSync> {
        let threshold = self.config.inactivity_threshold;
        let mut syncs = Vec::new();
        let mut orphaned = Vec::new();

        for (source_id, source) in self.sources.iter_mut() {
            let mut expired = Vec::new();
            for storage_path in source.storage_paths() {
                source.on_tick(&storage_path);

                let Some(item) = source.cache_item(&storage_path) else {
                    continue;
                };
                if item.pending_internal_change {
                    syncs.push(PendingSync {
                        source_id: source_id.clone(),
                        storage_path: storage_path.clone(),
                        future: source.sync_external(item),
                    });
                }

                let Some(item) = source.cache_item_mut(&storage_path) else {
                    continue;
                };
                item.pending_internal_change = false;
                item.cycles_since_internal_change =
                    item.cycles_since_internal_change.saturating_add(1);
                if !item.has_subscriptions() {
                    item.cycles_since_inactive = item.cycles_since_inactive.saturating_add(1);
                }
                let stale = item.inactive
                    && !item.has_subscriptions()
                    && item.cycles_since_inactive > threshold;

                if stale
                    && source
                        .cache_item(&storage_path)
                        .is_some_and(|item| source.should_delete(item))
                {
                    expired.push(storage_path);
                }
            }

            for storage_path in expired {
                if let Some(item) = source.delete(&storage_path) {
                    tracing::debug!("[{source_id}] evicted inactive cache item '{storage_path}'");
                    orphaned.extend(item.subscriptions);
                }
            }
        }

        for id in orphaned {
            tracing::warn!("Dropping subscription {id} together with its evicted cache item");
            self.subscriptions.remove(&id);
        }
        syncs
    }
}
