use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use kube::Resource;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::key::key_for;
use super::{Selector, SelectorExt};
use crate::store::StoreError;

const LIST_BACKOFF_BASE: Duration = Duration::from_millis(800);
const LIST_BACKOFF_MAX: Duration = Duration::from_secs(30);
const WATCH_REOPEN_DELAY: Duration = Duration::from_secs(1);

/// One incremental change delivered by a watch stream.
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying only a resource version.
    Bookmark(String),
}

/// Source of truth the cache mirrors.
#[async_trait]
pub trait ListWatch<K>: Send + Sync {
    /// Full listing plus the resource version it was taken at.
    async fn list(&self) -> Result<(Vec<K>, String), StoreError>;

    /// Changes after `resource_version`. The stream ends when the server
    /// closes the watch; an `Err` item means the caller must re-list.
    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<ResourceEvent<K>, StoreError>>, StoreError>;
}

/// Listener invoked synchronously from the store's single update path.
pub trait ResourceObserver<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

pub trait Synced: Send + Sync {
    fn has_synced(&self) -> bool;
}

enum Notification<K> {
    Add(Arc<K>),
    Update(Arc<K>, Arc<K>),
    Delete(Arc<K>),
}

/// Read-optimized local mirror of remote objects keyed by `namespace/name`.
///
/// Many readers, one writer: only the [`Reflector`] feeding the store (or a
/// test standing in for it) should call the mutating methods.
pub struct Store<K> {
    items: RwLock<HashMap<String, Arc<K>>>,
    observers: RwLock<Vec<Arc<dyn ResourceObserver<K>>>>,
    synced: AtomicBool,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
        }
    }
}

impl<K> Store<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, observer: Arc<dyn ResourceObserver<K>>) {
        write(&self.observers).push(observer);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        let key = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        };
        self.get_by_key(&key)
    }

    pub fn get_by_key(&self, key: &str) -> Option<Arc<K>> {
        read(&self.items).get(key).cloned()
    }

    /// Objects matching `selector`, optionally restricted to one namespace.
    pub fn list(&self, namespace: Option<&str>, selector: &Selector) -> Vec<Arc<K>> {
        let unlabeled = BTreeMap::new();
        read(&self.items)
            .values()
            .filter(|obj| {
                let meta = obj.meta();
                namespace.is_none_or(|ns| meta.namespace.as_deref() == Some(ns))
                    && selector.matches(meta.labels.as_ref().unwrap_or(&unlabeled))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Insert or update one object. An object older than the cached copy
    /// (by resource version) is ignored.
    pub fn upsert(&self, obj: K) {
        let key = key_for(&obj);
        let new = Arc::new(obj);
        let note = {
            let mut items = write(&self.items);
            match items.get(&key) {
                Some(old) if is_stale::<K>(old, &new) => {
                    trace!(%key, "cache: ignoring out-of-order event");
                    return;
                }
                Some(old) => {
                    let old = old.clone();
                    items.insert(key, new.clone());
                    Notification::Update(old, new)
                }
                None => {
                    items.insert(key, new.clone());
                    Notification::Add(new)
                }
            }
        };
        self.notify(vec![note]);
    }

    pub fn remove(&self, obj: K) {
        let key = key_for(&obj);
        let removed = write(&self.items).remove(&key);
        if removed.is_some() {
            self.notify(vec![Notification::Delete(Arc::new(obj))]);
        }
    }

    /// Replace the whole content with a fresh listing. Every listed object is
    /// reported as an add or update and every vanished one as a delete, which
    /// is what makes a periodic re-list heal missed watch events. Marks the
    /// store as synced.
    pub fn replace(&self, objs: Vec<K>) {
        let mut notes = Vec::with_capacity(objs.len());
        {
            let mut items = write(&self.items);
            let mut fresh = HashMap::with_capacity(objs.len());
            for obj in objs {
                let key = key_for(&obj);
                let new = Arc::new(obj);
                match items.remove(&key) {
                    Some(old) if is_stale::<K>(&old, &new) => {
                        fresh.insert(key, old);
                    }
                    Some(old) => {
                        notes.push(Notification::Update(old, new.clone()));
                        fresh.insert(key, new);
                    }
                    None => {
                        notes.push(Notification::Add(new.clone()));
                        fresh.insert(key, new);
                    }
                }
            }
            notes.extend(items.drain().map(|(_, old)| Notification::Delete(old)));
            *items = fresh;
        }
        self.notify(notes);
        self.synced.store(true, Ordering::Release);
    }

    fn notify(&self, notes: Vec<Notification<K>>) {
        if notes.is_empty() {
            return;
        }
        let observers = read(&self.observers).clone();
        for note in &notes {
            for o in &observers {
                match note {
                    Notification::Add(obj) => o.on_add(obj),
                    Notification::Update(old, new) => o.on_update(old, new),
                    Notification::Delete(obj) => o.on_delete(obj),
                }
            }
        }
    }
}

impl<K> Synced for Store<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn has_synced(&self) -> bool {
        Store::has_synced(self)
    }
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

fn parse_version<K: Resource>(obj: &K) -> Option<u64> {
    obj.meta().resource_version.as_deref()?.parse().ok()
}

/// `new` is stale when both versions are numeric and `new` is older.
fn is_stale<K: Resource>(old: &K, new: &K) -> bool {
    matches!(
        (parse_version(old), parse_version(new)),
        (Some(o), Some(n)) if n < o
    )
}

enum WatchExit {
    Shutdown,
    Resync,
    Relist(StoreError),
}

/// Keeps a [`Store`] in sync with a [`ListWatch`] source: list, then watch
/// from the listed version, re-listing on watch errors and every resync
/// period.
pub struct Reflector<K> {
    name: String,
    source: Arc<dyn ListWatch<K>>,
    store: Arc<Store<K>>,
    resync: Duration,
}

impl<K> Reflector<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn ListWatch<K>>,
        store: Arc<Store<K>>,
        resync: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            store,
            resync,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(reflector = %self.name, resync = ?self.resync, "starting reflector");
        let mut backoff = LIST_BACKOFF_BASE;
        loop {
            let listed = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.source.list() => res,
            };
            let (items, mut version) = match listed {
                Ok(v) => v,
                Err(e) => {
                    warn!(reflector = %self.name, error = %e, ?backoff, "list failed; retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(LIST_BACKOFF_MAX);
                    continue;
                }
            };
            backoff = LIST_BACKOFF_BASE;
            debug!(reflector = %self.name, count = items.len(), %version, "list complete");
            self.store.replace(items);

            let deadline = Instant::now() + self.resync;
            match self.watch_until(&mut version, deadline, &shutdown).await {
                WatchExit::Shutdown => break,
                WatchExit::Resync => {
                    debug!(reflector = %self.name, "resync period elapsed; re-listing")
                }
                WatchExit::Relist(e) => {
                    warn!(reflector = %self.name, error = %e, "watch failed; re-listing")
                }
            }
        }
        info!(reflector = %self.name, "reflector stopped");
    }

    async fn watch_until(
        &self,
        version: &mut String,
        deadline: Instant,
        shutdown: &CancellationToken,
    ) -> WatchExit {
        loop {
            let opened = tokio::select! {
                _ = shutdown.cancelled() => return WatchExit::Shutdown,
                _ = tokio::time::sleep_until(deadline) => return WatchExit::Resync,
                res = self.source.watch(version) => res,
            };
            let mut stream = match opened {
                Ok(s) => s,
                Err(e) => return WatchExit::Relist(e),
            };
            let mut received = 0usize;
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => return WatchExit::Shutdown,
                    _ = tokio::time::sleep_until(deadline) => return WatchExit::Resync,
                    ev = stream.next() => ev,
                };
                match next {
                    Some(Ok(event)) => {
                        received += 1;
                        self.apply(event, version);
                    }
                    Some(Err(e)) => return WatchExit::Relist(e),
                    None => break,
                }
            }
            trace!(reflector = %self.name, received, %version, "watch closed; reopening");
            if received == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => return WatchExit::Shutdown,
                    _ = tokio::time::sleep_until(deadline) => return WatchExit::Resync,
                    _ = tokio::time::sleep(WATCH_REOPEN_DELAY) => {}
                }
            }
        }
    }

    fn apply(&self, event: ResourceEvent<K>, version: &mut String) {
        let seen = match &event {
            ResourceEvent::Added(o) | ResourceEvent::Modified(o) | ResourceEvent::Deleted(o) => {
                o.meta().resource_version.clone()
            }
            ResourceEvent::Bookmark(v) => Some(v.clone()),
        };
        match event {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) => self.store.upsert(obj),
            ResourceEvent::Deleted(obj) => self.store.remove(obj),
            ResourceEvent::Bookmark(_) => {}
        }
        if let Some(v) = seen {
            *version = v;
        }
    }
}

/// Poll until every cache reports synced. Returns `false` on timeout or
/// shutdown.
pub async fn wait_for_cache_sync(
    caches: &[Arc<dyn Synced>],
    timeout: Duration,
    shutdown: &CancellationToken,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    loop {
        if caches.iter().all(|c| c.has_synced()) {
            return true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep_until(deadline) => return false,
            _ = tick.tick() => {}
        }
    }
}
