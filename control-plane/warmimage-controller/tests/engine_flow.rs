mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use common::*;
use warmimage_controller::controller::WarmImageReconciler;
use warmimage_controller::crd::WarmImage;
use warmimage_controller::engine::{
    Classify, Disposition, EnqueueObserver, EnqueueOwnerObserver, ListWatch, Reconciler,
    Reflector, ResourceEvent, Store, Synced, WorkQueue, WorkerPool, wait_for_cache_sync,
};
use warmimage_controller::store::StoreError;

#[derive(thiserror::Error, Debug)]
#[error("unreachable")]
struct Never;

impl Classify for Never {
    fn disposition(&self) -> Disposition {
        Disposition::Drop
    }
}

/// Blocks its first reconcile until released and tracks concurrency.
#[derive(Default)]
struct Gated {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Reconciler for Gated {
    type Error = Never;

    async fn reconcile(&self, _key: &str) -> Result<(), Never> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if call == 0 {
            self.release.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cond(), "condition not met in time");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn notifications_during_reconcile_collapse_into_one_rerun() {
    let queue = WorkQueue::new("test");
    let cache = Store::<WarmImage>::new();
    cache.replace(vec![]);
    cache.subscribe(EnqueueObserver::new(queue.clone()));

    let reconciler = Arc::new(Gated::default());
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(queue.clone(), reconciler.clone());
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(4, shutdown).await })
    };

    cache.upsert(warm_image("1", "repo/img:latest"));
    reconciler.started.notified().await;
    for rv in 2..12 {
        cache.upsert(warm_image(&rv.to_string(), "repo/img:latest"));
    }
    assert_eq!(queue.len(), 0, "in-flight key must not be queued twice");
    reconciler.release.notify_one();

    eventually(|| reconciler.calls.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(reconciler.max_in_flight.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    run.await.unwrap();
    assert!(queue.is_shutting_down());
}

/// Lists a fixed set of warm images, then replays events sent on a channel.
struct ScriptedSource {
    listing: Vec<WarmImage>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ResourceEvent<WarmImage>>>>,
}

#[async_trait]
impl ListWatch<WarmImage> for ScriptedSource {
    async fn list(&self) -> Result<(Vec<WarmImage>, String), StoreError> {
        Ok((self.listing.clone(), "1".into()))
    }

    async fn watch(
        &self,
        _resource_version: &str,
    ) -> Result<BoxStream<'static, Result<ResourceEvent<WarmImage>, StoreError>>, StoreError> {
        match self.events.lock().unwrap().take() {
            Some(rx) => Ok(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|ev| (Ok(ev), rx))
            })
            .boxed()),
            None => Ok(futures_util::stream::pending().boxed()),
        }
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn warm_image_flows_from_cache_to_daemon_set() {
    let h = Harness::new(FakeResolver::returning("sha256:abcd"));
    let queue = WorkQueue::new("WarmImages");
    h.warm_images.subscribe(EnqueueObserver::new(queue.clone()));
    h.daemon_sets
        .subscribe(EnqueueOwnerObserver::new(queue.clone(), "WarmImage"));

    let (tx, rx) = mpsc::unbounded_channel();
    let source = Arc::new(ScriptedSource {
        listing: vec![warm_image("7", "repo/img:latest")],
        events: Mutex::new(Some(rx)),
    });
    let shutdown = CancellationToken::new();
    let reflector = tokio::spawn(
        Reflector::new("warmimages", source, h.warm_images.clone(), Duration::from_secs(3600))
            .run(shutdown.clone()),
    );
    let caches: Vec<Arc<dyn Synced>> = vec![h.warm_images.clone() as Arc<dyn Synced>, h.daemon_sets.clone()];
    assert!(wait_for_cache_sync(&caches, Duration::from_secs(5), &shutdown).await);

    let pool = WorkerPool::new(queue.clone(), Arc::new(WarmImageReconciler::new(h.context())));
    let workers = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(2, shutdown).await })
    };

    eventually(|| h.children.created().len() == 1).await;
    assert_eq!(Harness::main_image(&h.children.created()[0]), "repo/img@sha256:abcd");

    // The child shows up in the cache and re-drives its owner; nothing new
    // is created.
    h.observe_created();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.children.created().len(), 1);

    // A spec change is a new generation: one more child, old ones deleted.
    tx.send(ResourceEvent::Modified(warm_image("8", "repo/img:v2")))
        .unwrap();
    eventually(|| h.children.created().len() == 2 && h.children.deleted().len() == 1).await;
    assert_eq!(
        Harness::version_of(&h.children.created()[1]).as_deref(),
        Some("8")
    );
    assert_eq!(h.children.deleted()[0].selector, format!("controller={UID},version!=8"));

    shutdown.cancel();
    workers.await.unwrap();
    reflector.await.unwrap();
}
