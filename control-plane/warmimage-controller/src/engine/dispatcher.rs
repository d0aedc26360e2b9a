use std::sync::Arc;

use kube::Resource;
use tracing::trace;

use super::cache::ResourceObserver;
use super::key::key_for;
use super::queue::WorkQueue;

/// Enqueues the object's own key on add and update. Deletes are not
/// enqueued: a vanished object is noticed when its key is next reconciled.
pub struct EnqueueObserver {
    queue: Arc<WorkQueue>,
}

impl EnqueueObserver {
    pub fn new(queue: Arc<WorkQueue>) -> Arc<Self> {
        Arc::new(Self { queue })
    }
}

impl<K: Resource + Send + Sync> ResourceObserver<K> for EnqueueObserver {
    fn on_add(&self, obj: &K) {
        self.queue.add_rate_limited(key_for(obj));
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.queue.add_rate_limited(key_for(new));
    }

    fn on_delete(&self, _obj: &K) {}
}

/// Enqueues the key of the object's controlling owner of kind `owner_kind`,
/// so changes to children (including their deletion) re-drive the parent.
pub struct EnqueueOwnerObserver {
    queue: Arc<WorkQueue>,
    owner_kind: String,
}

impl EnqueueOwnerObserver {
    pub fn new(queue: Arc<WorkQueue>, owner_kind: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            queue,
            owner_kind: owner_kind.into(),
        })
    }

    fn enqueue_controller_of<K: Resource>(&self, obj: &K) {
        let meta = obj.meta();
        let Some(owner) = meta.owner_references.as_ref().and_then(|refs| {
            refs.iter()
                .find(|r| r.controller == Some(true) && r.kind == self.owner_kind)
        }) else {
            return;
        };
        let key = match meta.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{ns}/{}", owner.name),
            _ => owner.name.clone(),
        };
        trace!(%key, kind = %self.owner_kind, "child changed; enqueueing owner");
        self.queue.add_rate_limited(key);
    }
}

impl<K: Resource + Send + Sync> ResourceObserver<K> for EnqueueOwnerObserver {
    fn on_add(&self, obj: &K) {
        self.enqueue_controller_of(obj);
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.enqueue_controller_of(new);
    }

    fn on_delete(&self, obj: &K) {
        self.enqueue_controller_of(obj);
    }
}
