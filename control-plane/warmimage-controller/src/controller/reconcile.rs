use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::ResourceExt;
use kube::api::PropagationPolicy;
use kube::runtime::events::EventType;
use tracing::{debug, info, instrument, warn};

use super::events::{MESSAGE_SYNCED, REASON_SYNCED};
use super::expectations::CreationExpectations;
use super::{Context, ReconcileErr};
use crate::crd::WarmImage;
use crate::engine::{Reconciler, SelectorExt, split_key};
use crate::image::resolve_image;
use crate::templates::{
    make_daemon_set, make_old_version_selector, make_owned_selector, make_selector,
};

/// Drives each warm image towards exactly one DaemonSet for its current
/// generation.
pub struct WarmImageReconciler {
    ctx: Context,
    expectations: CreationExpectations,
}

impl WarmImageReconciler {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            expectations: CreationExpectations::default(),
        }
    }

    async fn create_child(&self, wi: &WarmImage, ns: &str) -> Result<DaemonSet, ReconcileErr> {
        let image = resolve_image(
            self.ctx.resolver.as_ref(),
            &self.ctx.keychain,
            ns,
            &wi.spec.image,
            wi.spec.image_pull_secrets.as_slice(),
        )
        .await?;
        debug!(from = %wi.spec.image, to = %image, "resolved image");

        let owner = self.ctx.scheme.controller_ref(wi)?;
        let child = make_daemon_set(wi, &image, &self.ctx.sleeper_image, owner);
        Ok(self.ctx.children.create(ns, &child).await?)
    }
}

#[async_trait]
impl Reconciler for WarmImageReconciler {
    type Error = ReconcileErr;

    #[instrument(skip(self))]
    async fn reconcile(&self, key: &str) -> Result<(), ReconcileErr> {
        let (ns, name) = split_key(key)?;

        let Some(wi) = self.ctx.warm_images.get(ns, name) else {
            info!(%ns, %name, "warm image no longer exists");
            self.expectations.observed(key);
            return Ok(());
        };
        let version = wi.resource_version().unwrap_or_default();

        let owned = self
            .ctx
            .daemon_sets
            .list(Some(ns), &make_owned_selector(&wi));
        let generation = make_selector(&wi);
        let (current, stale): (Vec<_>, Vec<_>) = owned
            .iter()
            .partition(|ds| generation.matches(ds.labels()));

        match current.len() {
            0 if self.expectations.is_pending(key, &version) => {
                debug!(%ns, %name, %version, "child created; waiting for cache");
            }
            0 => {
                let child = self.create_child(&wi, ns).await?;
                self.expectations.expect_creation(key, &version);
                info!(%ns, %name, %version, child = %child.name_any(), "created daemon set");
            }
            1 => self.expectations.observed(key),
            n => {
                self.expectations.observed(key);
                warn!(%ns, %name, %version, count = n, "multiple daemon sets for current generation; leaving them in place");
            }
        }

        if !stale.is_empty() {
            info!(%ns, %name, count = stale.len(), "deleting daemon sets of older generations");
            self.ctx
                .children
                .delete_collection(ns, &make_old_version_selector(&wi), PropagationPolicy::Foreground)
                .await?;
        }

        let reference = self.ctx.scheme.object_reference(&*wi)?;
        if let Err(e) = self
            .ctx
            .events
            .record(&reference, EventType::Normal, REASON_SYNCED, MESSAGE_SYNCED)
            .await
        {
            debug!(%ns, %name, error = %e, "failed to record event");
        }
        Ok(())
    }
}
