//! Contracts the controller needs from the remote object store, plus their
//! Kubernetes-backed implementations.

mod kube_store;
mod list_watch;

pub use kube_store::KubeStore;
pub use list_watch::KubeListWatch;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PropagationPolicy;

use crate::engine::Selector;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),
    /// The requested resource version is no longer available; re-list.
    #[error("watch expired: {0}")]
    Expired(String),
    #[error("watch error {code}: {message}")]
    Watch { code: u16, message: String },
}

/// Mutations the reconciler issues against child workloads.
#[async_trait]
pub trait ChildClient: Send + Sync {
    async fn create(&self, namespace: &str, child: &DaemonSet) -> Result<DaemonSet, StoreError>;

    async fn delete_collection(
        &self,
        namespace: &str,
        selector: &Selector,
        propagation: PropagationPolicy,
    ) -> Result<(), StoreError>;
}

/// Read access to pull-credential secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;
}
