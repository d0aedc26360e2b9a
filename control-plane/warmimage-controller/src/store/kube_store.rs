use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use tracing::{debug, instrument};

use super::{ChildClient, SecretSource, StoreError};
use crate::engine::Selector;

/// [`ChildClient`] and [`SecretSource`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChildClient for KubeStore {
    #[instrument(skip_all, fields(ns = %namespace))]
    async fn create(&self, namespace: &str, child: &DaemonSet) -> Result<DaemonSet, StoreError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), child).await?)
    }

    #[instrument(skip_all, fields(ns = %namespace, selector = %selector))]
    async fn delete_collection(
        &self,
        namespace: &str,
        selector: &Selector,
        propagation: PropagationPolicy,
    ) -> Result<(), StoreError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            propagation_policy: Some(propagation),
            ..DeleteParams::default()
        };
        let lp = ListParams::default().labels_from(selector);
        let _ = api.delete_collection(&dp, &lp).await?;
        debug!("delete_collection issued");
        Ok(())
    }
}

#[async_trait]
impl SecretSource for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
