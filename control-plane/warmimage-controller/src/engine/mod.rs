//! Generic level-triggered reconciliation engine.
//!
//! Data flows from a [`cache::Reflector`] into a [`cache::Store`], whose
//! observers ([`dispatcher`]) push keys onto a [`queue::WorkQueue`] that a
//! [`workers::WorkerPool`] drains into a [`workers::Reconciler`].

pub mod cache;
pub mod dispatcher;
pub mod key;
pub mod queue;
pub mod rate_limit;
pub mod workers;

pub use cache::{
    ListWatch, Reflector, ResourceEvent, ResourceObserver, Store, Synced, wait_for_cache_sync,
};
pub use dispatcher::{EnqueueObserver, EnqueueOwnerObserver};
pub use key::{KeyError, key_for, split_key};
pub use queue::WorkQueue;
pub use rate_limit::RateLimiter;
pub use workers::{Classify, Disposition, Reconciler, WorkerPool};

pub use kube::core::{Expression, Selector, SelectorExt};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked. None of
/// the engine's critical sections leave state half-updated across a panic.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
