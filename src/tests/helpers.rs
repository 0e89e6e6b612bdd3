//! Shared test utilities for manager testing

use parking_lot::Mutex;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

use crate::{
    bind_target::BindTarget,
    config::ManagerConfig,
    error::FieldsyncError,
    manager::MetadataManager,
    prop_path::PropPath,
    source::{memory::MEMORY_SOURCE_ID, GlobalMemorySource, MemorySource},
    subscription::{ComputeFn, Listener},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A listener that keeps everything it is told.
#[derive(Clone, Default)]
pub struct Recorder {
    values: Arc<Mutex<Vec<Value>>>,
    errors: Arc<Mutex<Vec<FieldsyncError>>>,
}

impl Recorder {
    pub fn values(&self) -> Vec<Value> {
        self.values.lock().clone()
    }

    pub fn last(&self) -> Option<Value> {
        self.values.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.values.lock().len()
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

/// A manager with the in-process sources only, defaulting to the memory source.
pub fn memory_manager(config: ManagerConfig) -> MetadataManager {
    init_logging();
    let manager = MetadataManager::new(config.clone());
    manager
        .register_source(Box::new(MemorySource::new(&config)))
        .unwrap();
    manager
        .register_source(Box::new(GlobalMemorySource::new(&config)))
        .unwrap();
    manager.set_default_source(MEMORY_SOURCE_ID).unwrap();
    manager
}

/// A memory source target for a dotted key path, e.g. `"stats.total"`.
pub fn field(storage_path: &str, keys: &str) -> BindTarget {
    BindTarget::new(
        MEMORY_SOURCE_ID,
        storage_path,
        PropPath::from_keys(keys.split('.')),
    )
}

/// Poll `condition` for up to a second.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Adds up the integer inputs, ignoring everything else.
pub fn sum_of_inputs() -> ComputeFn {
    ComputeFn::sync(|values| {
        Ok(Value::from(
            values.iter().filter_map(Value::as_i64).sum::<i64>(),
        ))
    })
}
