//! The central coordinator between fields and metadata sources.
//!
//! [`MetadataManager`] is a cheap, cloneable handle. All bookkeeping sits behind one lock;
//! listeners are always invoked with the lock released, so a listener may call back into the
//! manager (write a value, unsubscribe, subscribe something new) without deadlocking.
//!
//! Change propagation works on a queue of deliveries: a write collects every overlapping
//! subscription, and each delivery either notifies a field or, for the internal subscriptions
//! of a computed field, triggers a recomputation whose result is written back and queued in
//! turn. Cycles are refused at registration, see [`FieldsyncError::BindTargetLoop`].

use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::VecDeque, path::PathBuf, sync::Arc};
use tokio::{sync::Notify, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    bind_target::BindTarget,
    cache::CacheItem,
    config::ManagerConfig,
    error::FieldsyncError,
    source::{FrontmatterSource, GlobalMemorySource, MemorySource, MetadataSource},
    subscription::{
        ComputeFn, ComputeResult, Listener, SharedListener, Subscription, SubscriptionId,
    },
};

mod loops;
mod state;


use state::{ComputeJob, ManagerState, Role, Route};

/// Upper bound on deliveries processed for a single change before propagation is cut off.
pub const PROPAGATION_CUTOFF: usize = 10_000;

/// The periodic maintenance task spawned by [`MetadataManager::start`].
struct Ticker {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

#[derive(Clone)]
pub struct MetadataManager {
    state: Arc<Mutex<ManagerState>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl MetadataManager {
    /// A manager without any sources. Register at least the configured default source before
    /// subscribing.
    pub fn new(config: ManagerConfig) -> Self {
        MetadataManager {
            state: Arc::new(Mutex::new(ManagerState::new(config))),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// A manager with the frontmatter source rooted at `root`, the memory source and the global
    /// memory source registered.
    pub fn with_builtin_sources<P: Into<PathBuf>>(
        config: ManagerConfig,
        root: P,
    ) -> Result<Self, FieldsyncError> {
        config.validate()?;
        let manager = MetadataManager::new(config.clone());
        manager.register_source(Box::new(FrontmatterSource::new(root, &config)))?;
        manager.register_source(Box::new(MemorySource::new(&config)))?;
        manager.register_source(Box::new(GlobalMemorySource::new(&config)))?;
        manager.set_default_source(&config.default_source)?;
        Ok(manager)
    }

    pub fn config(&self) -> ManagerConfig {
        self.state.lock().config.clone()
    }

    pub fn register_source(&self, source: Box<dyn MetadataSource>) -> Result<(), FieldsyncError> {
        let mut state = self.state.lock();
        let id = source.id().to_string();
        if state.sources.contains_key(&id) {
            return Err(FieldsyncError::Config(format!(
                "a metadata source with id '{id}' is already registered"
            )));
        }
        tracing::debug!("Registered metadata source '{id}'");
        state.sources.insert(id, source);
        Ok(())
    }

    pub fn set_default_source(&self, source_id: &str) -> Result<(), FieldsyncError> {
        let mut state = self.state.lock();
        if !state.sources.contains_key(source_id) {
            return Err(FieldsyncError::SourceNotFound(source_id.to_string()));
        }
        state.default_source = source_id.to_string();
        Ok(())
    }

    pub fn default_source(&self) -> String {
        self.state.lock().default_source.clone()
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids = self
            .state
            .lock()
            .sources
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Bind `listener` to `bind_target`. The listener is called once with the current value
    /// before this returns, and again on every overlapping change made through another
    /// subscription or from outside.
    pub fn subscribe<L>(
        &self,
        bind_target: BindTarget,
        listener: L,
    ) -> Result<Subscription, FieldsyncError>
    where
        L: Listener + 'static,
    {
        let id = SubscriptionId::new();
        let listener: SharedListener = Arc::new(listener);
        let (target, value) = {
            let mut state = self.state.lock();
            let target = state.canonical(&bind_target)?;
            let value = state.register_plain(id, target.clone(), listener.clone())?;
            (target, value)
        };
        tracing::debug!("[{id}] subscribed to {target}");
        listener.notify(&value);
        Ok(Subscription::new(id, bind_target, false))
    }

    /// Bind a derived field: `compute` is evaluated over the values of `dependencies` (in the
    /// given order) whenever one of them changes, and its result is both handed to `listener`
    /// and written to `bind_target`.
    ///
    /// Fails with [`FieldsyncError::BindTargetLoop`] if the new subscription would, directly or
    /// through other computed subscriptions, depend on its own target. Nothing is registered in
    /// that case.
    pub fn subscribe_computed<L>(
        &self,
        bind_target: BindTarget,
        dependencies: Vec<BindTarget>,
        compute: ComputeFn,
        listener: L,
    ) -> Result<Subscription, FieldsyncError>
    where
        L: Listener + 'static,
    {
        let id = SubscriptionId::new();
        let listener: SharedListener = Arc::new(listener);
        let (target, value) = {
            let mut state = self.state.lock();
            let target = state.canonical(&bind_target)?;
            let dependencies = dependencies
                .iter()
                .map(|dependency| state.canonical(dependency))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(chain) = state.find_loop(&target, &dependencies) {
                let err = FieldsyncError::BindTargetLoop(chain);
                tracing::warn!("[{id}] refusing computed subscription: {err}");
                return Err(err);
            }
            let value =
                state.register_computed(id, target.clone(), dependencies, compute, listener.clone())?;
            (target, value)
        };
        tracing::debug!("[{id}] computed subscription bound to {target}");
        listener.notify(&value);
        let deliveries = self.recompute(id);
        self.dispatch(deliveries);
        Ok(Subscription::new(id, bind_target, true))
    }

    /// Detach a subscription. Computed subscriptions take their dependency subscriptions with
    /// them. Unsubscribing twice is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<(), FieldsyncError> {
        self.state.lock().remove(&subscription.id())?;
        tracing::debug!("[{}] unsubscribed", subscription.id());
        Ok(())
    }

    /// Write `value` through `subscription` and notify every other overlapping subscription.
    /// Writes through a subscription that has already been removed are ignored.
    pub fn update(&self, subscription: &Subscription, value: Value) -> Result<(), FieldsyncError> {
        let id = subscription.id();
        let deliveries = {
            let mut state = self.state.lock();
            let Some(target) = state.target_of(&id) else {
                tracing::debug!("[{id}] ignoring update through a removed subscription");
                return Ok(());
            };
            state.write(&id, &target, value)?
        };
        self.dispatch(deliveries);
        Ok(())
    }

    /// Replace the cached blob of `storage_path` with a snapshot read from outside and notify
    /// all of its subscriptions. Returns `false` if the item is not cached or a local write is
    /// still inside the write-lock window.
    pub fn on_external_update(
        &self,
        source_id: &str,
        storage_path: &str,
        blob: Value,
    ) -> Result<bool, FieldsyncError> {
        let Some(deliveries) = self
            .state
            .lock()
            .external_update(source_id, storage_path, blob)?
        else {
            return Ok(false);
        };
        tracing::debug!(
            "[{source_id}] external update of '{storage_path}' reaches {} subscription(s)",
            deliveries.len()
        );
        self.dispatch(deliveries);
        Ok(true)
    }

    /// The cached value at `target`, `Null` if absent. Does not materialize cache items.
    pub fn read(&self, target: &BindTarget) -> Result<Value, FieldsyncError> {
        let state = self.state.lock();
        Ok(state.source(&target.source_id)?.read_cache(target))
    }

    pub fn is_write_locked(
        &self,
        source_id: &str,
        storage_path: &str,
    ) -> Result<bool, FieldsyncError> {
        let state = self.state.lock();
        let write_lock_cycles = state.config.write_lock_cycles;
        Ok(state
            .source(source_id)?
            .cache_item(storage_path)
            .is_some_and(|item| item.is_write_locked(write_lock_cycles)))
    }

    /// A copy of the cache item for `storage_path`, if one exists.
    pub fn cache_item(
        &self,
        source_id: &str,
        storage_path: &str,
    ) -> Result<Option<CacheItem>, FieldsyncError> {
        let state = self.state.lock();
        Ok(state.source(source_id)?.cache_item(storage_path).cloned())
    }

    /// Number of registered subscriptions, including the internal dependency subscriptions of
    /// computed fields.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// The computed subscription an internal dependency subscription belongs to.
    pub fn parent_of(&self, id: &SubscriptionId) -> Option<SubscriptionId> {
        match self.state.lock().subscriptions.get(id).map(|entry| &entry.role) {
            Some(Role::Dependency { parent }) => Some(*parent),
            _ => None,
        }
    }

    /// One maintenance cycle: advance the staleness counters of every cache item, evict items
    /// that have been inactive for too long and flush pending local writes to their sources.
    #[tracing::instrument(skip_all)]
    pub async fn tick(&self) {
        let syncs = self.state.lock().sweep();
        if syncs.is_empty() {
            return;
        }
        let results = futures::future::join_all(syncs.into_iter().map(|sync| async move {
            (sync.source_id, sync.storage_path, sync.future.await)
        }))
        .await;
        for (source_id, storage_path, result) in results {
            match result {
                Ok(()) => tracing::debug!("[{source_id}] synced '{storage_path}'"),
                Err(err) => {
                    tracing::warn!("[{source_id}] failed to sync '{storage_path}': {err}")
                }
            }
        }
    }

    /// Spawn the periodic maintenance tick on the current tokio runtime.
    pub fn start(&self) -> Result<(), FieldsyncError> {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Err(FieldsyncError::Config(
                "metadata manager is already running".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            FieldsyncError::Config(format!("metadata manager needs a tokio runtime: {err}"))
        })?;
        let period = self.config().tick_interval();
        let manager = self.clone();
        let stop = Arc::new(Notify::new());
        let stopped = stop.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.notified() => break,
                    _ = interval.tick() => manager.tick().await,
                }
            }
        });
        *ticker = Some(Ticker { handle, stop });
        tracing::info!("Metadata manager started, ticking every {:?}", period);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Stop the periodic tick after its current cycle and flush outstanding writes with one
    /// last cycle.
    pub async fn shutdown(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(Ticker { handle, stop }) = ticker {
            stop.notify_one();
            if let Err(err) = handle.await {
                tracing::warn!("Maintenance tick ended abnormally: {err}");
            }
        }
        self.tick().await;
        tracing::info!("Metadata manager stopped");
    }

    fn dispatch(&self, deliveries: Vec<SubscriptionId>) {
        let mut queue = VecDeque::from(deliveries);
        let mut processed = 0usize;
        while let Some(id) = queue.pop_front() {
            processed += 1;
            if processed > PROPAGATION_CUTOFF {
                tracing::error!(
                    "Change propagation exceeded {PROPAGATION_CUTOFF} deliveries, dropping {} \
                    pending",
                    queue.len() + 1
                );
                return;
            }
            let route = self.state.lock().route(&id);
            match route {
                Route::Notify(listener, value) => listener.notify(&value),
                Route::Recompute(parent) => queue.extend(self.recompute(parent)),
                Route::Drop => {}
            }
        }
    }

    /// Run the compute function of `id` once. Synchronous functions are applied immediately and
    /// their follow-up deliveries returned; asynchronous ones are spawned and dispatch their own
    /// follow-ups when they resolve.
    fn recompute(&self, id: SubscriptionId) -> Vec<SubscriptionId> {
        let Some(ComputeJob {
            listener,
            compute,
            values,
            generation,
        }) = self.state.lock().compute_job(&id)
        else {
            return Vec::new();
        };
        match compute {
            ComputeFn::Sync(compute) => {
                let result = compute(&values);
                self.finish_computation(id, generation, &listener, result)
            }
            ComputeFn::Async(compute) => {
                let runtime = match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        listener.on_error(&FieldsyncError::Compute(format!(
                            "asynchronous compute function needs a tokio runtime: {err}"
                        )));
                        return Vec::new();
                    }
                };
                let future = compute(values);
                let manager = self.clone();
                runtime.spawn(async move {
                    let result = future.await;
                    let deliveries = manager.finish_computation(id, generation, &listener, result);
                    manager.dispatch(deliveries);
                });
                Vec::new()
            }
        }
    }

    fn finish_computation(
        &self,
        id: SubscriptionId,
        generation: u64,
        listener: &SharedListener,
        result: ComputeResult,
    ) -> Vec<SubscriptionId> {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("[{id}] compute function failed: {err}");
                listener.on_error(&err);
                return Vec::new();
            }
        };
        let applied = self
            .state
            .lock()
            .apply_computed(&id, generation, value.clone());
        match applied {
            Ok(Some(deliveries)) => {
                listener.notify(&value);
                deliveries
            }
            Ok(None) => {
                tracing::debug!("[{id}] discarding result of computation {generation}");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!("[{id}] could not store computed value: {err}");
                listener.on_error(&err);
                Vec::new()
            }
        }
    }
}
