//! Wiring of the engine to warm images: caches, queue, workers and the
//! reconciler.

pub mod events;
pub mod expectations;
pub mod reconcile;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::crd::WarmImage;
use crate::engine::{
    Classify, Disposition, EnqueueObserver, EnqueueOwnerObserver, Expression, KeyError, Reflector,
    Selector, Store, Synced, WorkQueue, WorkerPool, wait_for_cache_sync,
};
use crate::image::{ImageResolver, Keychain, RegistryResolver, ResolveError};
use crate::scheme::{Scheme, SchemeError};
use crate::store::{ChildClient, KubeListWatch, KubeStore, StoreError};
use crate::templates::LABEL_CONTROLLER;

pub use events::{EventSink, KubeEventSink};
pub use reconcile::WarmImageReconciler;

pub const CONTROLLER_NAME: &str = "warmimage-controller";
pub const QUEUE_NAME: &str = "WarmImages";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("image resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
}

impl Classify for ReconcileErr {
    fn disposition(&self) -> Disposition {
        match self {
            ReconcileErr::InvalidKey(_) | ReconcileErr::Scheme(_) => Disposition::Drop,
            ReconcileErr::Store(_) | ReconcileErr::Resolve(_) => Disposition::Requeue,
        }
    }
}

/// Everything a reconcile reads from or writes to.
#[derive(Clone)]
pub struct Context {
    pub warm_images: Arc<Store<WarmImage>>,
    pub daemon_sets: Arc<Store<DaemonSet>>,
    pub children: Arc<dyn ChildClient>,
    pub keychain: Keychain,
    pub resolver: Arc<dyn ImageResolver>,
    pub events: Arc<dyn EventSink>,
    pub scheme: Arc<Scheme>,
    pub sleeper_image: String,
}

/// Caches the readiness probe reports on.
#[derive(Clone)]
pub struct Caches {
    pub warm_images: Arc<Store<WarmImage>>,
    pub daemon_sets: Arc<Store<DaemonSet>>,
}

impl Caches {
    pub fn new() -> Self {
        Self {
            warm_images: Store::new(),
            daemon_sets: Store::new(),
        }
    }

    pub fn synced(&self) -> Vec<Arc<dyn Synced>> {
        vec![
            self.warm_images.clone() as Arc<dyn Synced>,
            self.daemon_sets.clone(),
        ]
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the warm image controller until `shutdown` fires.
///
/// Fails if the caches do not sync within the configured deadline.
pub async fn run_controller(
    client: Client,
    cfg: ControllerConfig,
    caches: Caches,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let queue = WorkQueue::new(QUEUE_NAME);
    caches.warm_images.subscribe(EnqueueObserver::new(queue.clone()));
    caches
        .daemon_sets
        .subscribe(EnqueueOwnerObserver::new(queue.clone(), "WarmImage"));

    let ns = cfg.namespace();
    let wi_source = Arc::new(KubeListWatch::<WarmImage>::new(client.clone(), ns));
    let ds_source = Arc::new(
        KubeListWatch::<DaemonSet>::new(client.clone(), ns)
            .with_selector(&Selector::from(Expression::Exists(LABEL_CONTROLLER.into()))),
    );
    let reflectors = [
        tokio::spawn(
            Reflector::new("warmimages", wi_source, caches.warm_images.clone(), cfg.resync())
                .run(shutdown.clone()),
        ),
        tokio::spawn(
            Reflector::new("daemonsets", ds_source, caches.daemon_sets.clone(), cfg.resync())
                .run(shutdown.clone()),
        ),
    ];

    info!(namespace = ns.unwrap_or("*"), "waiting for caches to sync");
    if !wait_for_cache_sync(&caches.synced(), cfg.cache_sync_timeout(), &shutdown).await {
        let interrupted = shutdown.is_cancelled();
        shutdown.cancel();
        queue.shut_down();
        if interrupted {
            return Ok(());
        }
        anyhow::bail!("caches did not sync within {:?}", cfg.cache_sync_timeout());
    }
    info!("caches synced");

    let kube_store = Arc::new(KubeStore::new(client.clone()));
    let ctx = Context {
        warm_images: caches.warm_images.clone(),
        daemon_sets: caches.daemon_sets.clone(),
        children: kube_store.clone(),
        keychain: Keychain::new(kube_store),
        resolver: Arc::new(RegistryResolver::new(cfg.registry_timeout())?),
        events: Arc::new(KubeEventSink::new(client, CONTROLLER_NAME)),
        scheme: Arc::new(Scheme::for_controller()),
        sleeper_image: cfg.sleeper_image.clone(),
    };
    let reconciler = Arc::new(WarmImageReconciler::new(ctx));
    WorkerPool::new(queue, reconciler)
        .run(cfg.workers, shutdown.clone())
        .await;

    for r in reflectors {
        if let Err(e) = r.await {
            error!(error = %e, "reflector task failed");
        }
    }
    info!("controller stopped");
    Ok(())
}
