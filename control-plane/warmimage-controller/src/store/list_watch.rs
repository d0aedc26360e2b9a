use std::fmt::Debug;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use k8s_openapi::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;

use super::StoreError;
use crate::engine::{ListWatch, ResourceEvent, Selector};

/// Server-side watch timeout; the reflector reopens the watch when it lapses.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// [`ListWatch`] over a `kube::Api`, optionally scoped to one namespace and
/// filtered by a label selector.
pub struct KubeListWatch<K> {
    api: Api<K>,
    selector: Option<Selector>,
}

impl<K> KubeListWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    pub fn new(client: Client, namespace: Option<&str>) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self { api, selector: None }
    }

    pub fn with_selector(mut self, selector: &Selector) -> Self {
        if !selector.selects_all() {
            self.selector = Some(selector.clone());
        }
        self
    }
}

#[async_trait]
impl<K> ListWatch<K> for KubeListWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn list(&self) -> Result<(Vec<K>, String), StoreError> {
        let mut lp = ListParams::default();
        if let Some(sel) = &self.selector {
            lp = lp.labels_from(sel);
        }
        let list = self.api.list(&lp).await?;
        let version = list.metadata.resource_version.unwrap_or_default();
        Ok((list.items, version))
    }

    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<ResourceEvent<K>, StoreError>>, StoreError> {
        let mut wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        if let Some(sel) = &self.selector {
            wp = wp.labels_from(sel);
        }
        let stream = self.api.watch(&wp, resource_version).await?;
        Ok(stream
            .map_err(StoreError::from)
            .and_then(|ev| async move {
                match ev {
                    WatchEvent::Added(o) => Ok(ResourceEvent::Added(o)),
                    WatchEvent::Modified(o) => Ok(ResourceEvent::Modified(o)),
                    WatchEvent::Deleted(o) => Ok(ResourceEvent::Deleted(o)),
                    WatchEvent::Bookmark(b) => Ok(ResourceEvent::Bookmark(b.metadata.resource_version)),
                    WatchEvent::Error(e) if e.code == 410 => Err(StoreError::Expired(e.message)),
                    WatchEvent::Error(e) => Err(StoreError::Watch {
                        code: e.code,
                        message: e.message,
                    }),
                }
            })
            .boxed())
    }
}
