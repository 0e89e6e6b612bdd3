//! Subscription handles, the listener interface and compute functions.
//!
//! A field never hands the manager its own state. It hands over a [`Listener`], the single
//! entry point the manager calls when the bound value changes, and keeps the returned
//! [`Subscription`] handle to write back or unsubscribe later. Closures taking `&Value`
//! implement [`Listener`] directly:
//!
//! ```rust
//! use fieldsync_core::subscription::{Listener, SharedListener};
//! use std::sync::Arc;
//!
//! let listener: SharedListener = Arc::new(|value: &serde_json::Value| {
//!     println!("field now shows {value}");
//! });
//! listener.notify(&serde_json::json!(3));
//! ```

use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::{Debug, Display, Formatter},
    future::Future,
    sync::Arc,
};
use uuid::Uuid;

use crate::{bind_target::BindTarget, error::FieldsyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        SubscriptionId::new()
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives value changes for one subscription.
pub trait Listener: Send + Sync {
    fn notify(&self, value: &Value);

    /// Called when a computed subscription fails to produce a value. The previous value stays in
    /// place and the subscription keeps listening to its dependencies.
    fn on_error(&self, error: &FieldsyncError) {
        tracing::warn!("Unhandled subscription error: {error}");
    }
}

impl<F> Listener for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn notify(&self, value: &Value) {
        self(value)
    }
}

pub type SharedListener = Arc<dyn Listener>;

/// The handle a field keeps for as long as it is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: SubscriptionId,
    bind_target: BindTarget,
    computed: bool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, bind_target: BindTarget, computed: bool) -> Self {
        Subscription {
            id,
            bind_target,
            computed,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The target as passed at registration, before any source specific key mapping.
    pub fn bind_target(&self) -> &BindTarget {
        &self.bind_target
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }
}

pub type ComputeResult = Result<Value, FieldsyncError>;

type SyncCompute = dyn Fn(&[Value]) -> ComputeResult + Send + Sync;
type AsyncCompute = dyn Fn(Vec<Value>) -> BoxFuture<'static, ComputeResult> + Send + Sync;

/// Derives a computed subscription's value from its dependency values, given in declaration
/// order.
#[derive(Clone)]
pub enum ComputeFn {
    /// Evaluated inline while the triggering change propagates.
    Sync(Arc<SyncCompute>),
    /// Spawned on the ambient tokio runtime; the result is written back once it resolves.
    Async(Arc<AsyncCompute>),
}

impl ComputeFn {
    pub fn sync<F>(compute: F) -> Self
    where
        F: Fn(&[Value]) -> ComputeResult + Send + Sync + 'static,
    {
        ComputeFn::Sync(Arc::new(compute))
    }

    pub fn from_async<F, Fut>(compute: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        ComputeFn::Async(Arc::new(move |values: Vec<Value>| compute(values).boxed()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, ComputeFn::Async(_))
    }
}

impl Debug for ComputeFn {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ComputeFn::Sync(_) => write!(f, "ComputeFn::Sync"),
            ComputeFn::Async(_) => write!(f, "ComputeFn::Async"),
        }
    }
}
