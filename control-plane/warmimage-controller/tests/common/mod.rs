#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{LocalObjectReference, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::api::{ObjectMeta, PropagationPolicy};
use kube::runtime::events::EventType;

use warmimage_controller::controller::{Context, EventSink};
use warmimage_controller::crd::{WarmImage, WarmImageSpec};
use warmimage_controller::engine::{Selector, Store};
use warmimage_controller::image::{
    ImageResolver, Keychain, RegistryCredentials, ResolveError, TagReference,
};
use warmimage_controller::scheme::Scheme;
use warmimage_controller::store::{ChildClient, SecretSource, StoreError};
use warmimage_controller::templates::{LABEL_CONTROLLER, LABEL_VERSION};

pub const NS: &str = "bar";
pub const NAME: &str = "foo";
pub const KEY: &str = "bar/foo";
pub const UID: &str = "2f9c1d6e-uid";
pub const SLEEPER: &str = "ghcr.io/mattmoor/sleeper@sha256:5ee0";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn warm_image(rv: &str, image: &str) -> WarmImage {
    let mut wi = WarmImage::new(
        NAME,
        WarmImageSpec {
            image: image.into(),
            image_pull_secrets: None,
        },
    );
    wi.metadata.namespace = Some(NS.into());
    wi.metadata.uid = Some(UID.into());
    wi.metadata.resource_version = Some(rv.into());
    wi
}

pub fn with_pull_secret(mut wi: WarmImage, secret: &str) -> WarmImage {
    wi.spec.image_pull_secrets = Some(LocalObjectReference {
        name: secret.into(),
    });
    wi
}

/// A child of `UID` for generation `version`, as the cache would hold it.
pub fn child(name: &str, version: &str) -> DaemonSet {
    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NS.into()),
            resource_version: Some("1".into()),
            labels: Some(BTreeMap::from([
                (LABEL_CONTROLLER.to_string(), UID.to_string()),
                (LABEL_VERSION.to_string(), version.to_string()),
            ])),
            owner_references: Some(vec![OwnerReference {
                api_version: "mattmoor.io/v2".into(),
                kind: "WarmImage".into(),
                name: NAME.into(),
                uid: UID.into(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct DeleteCall {
    pub namespace: String,
    pub selector: String,
    pub foreground: bool,
}

/// Records mutations instead of sending them anywhere.
#[derive(Default)]
pub struct FakeChildren {
    pub created: Mutex<Vec<DaemonSet>>,
    pub deleted: Mutex<Vec<DeleteCall>>,
    pub fail_create: Mutex<bool>,
}

impl FakeChildren {
    pub fn created(&self) -> Vec<DaemonSet> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<DeleteCall> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChildClient for FakeChildren {
    async fn create(&self, namespace: &str, child: &DaemonSet) -> Result<DaemonSet, StoreError> {
        if *self.fail_create.lock().unwrap() {
            return Err(StoreError::Watch {
                code: 500,
                message: "injected".into(),
            });
        }
        let mut created = child.clone();
        let mut all = self.created.lock().unwrap();
        created.metadata.name = Some(format!(
            "{}{}",
            child.metadata.generate_name.clone().unwrap_or_default(),
            all.len()
        ));
        created.metadata.namespace = Some(namespace.into());
        created.metadata.resource_version = Some("1".into());
        all.push(created.clone());
        Ok(created)
    }

    async fn delete_collection(
        &self,
        namespace: &str,
        selector: &Selector,
        propagation: PropagationPolicy,
    ) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(DeleteCall {
            namespace: namespace.into(),
            selector: selector.to_string(),
            foreground: matches!(propagation, PropagationPolicy::Foreground),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSecrets {
    pub secrets: Mutex<BTreeMap<(String, String), Secret>>,
    pub fail: Mutex<bool>,
}

impl FakeSecrets {
    pub fn insert(&self, ns: &str, name: &str, secret: Secret) {
        self.secrets
            .lock()
            .unwrap()
            .insert((ns.into(), name.into()), secret);
    }
}

#[async_trait]
impl SecretSource for FakeSecrets {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        if *self.fail.lock().unwrap() {
            return Err(StoreError::Watch {
                code: 403,
                message: "secrets is forbidden".into(),
            });
        }
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Resolves every tag to a fixed digest and remembers what it was asked.
pub struct FakeResolver {
    pub digest: Mutex<Option<String>>,
    pub calls: Mutex<Vec<(String, RegistryCredentials)>>,
}

impl FakeResolver {
    pub fn returning(digest: &str) -> Self {
        Self {
            digest: Mutex::new(Some(digest.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            digest: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageResolver for FakeResolver {
    async fn resolve(
        &self,
        tag: &TagReference,
        creds: &RegistryCredentials,
    ) -> Result<String, ResolveError> {
        self.calls
            .lock()
            .unwrap()
            .push((tag.to_string(), creds.clone()));
        self.digest.lock().unwrap().clone().ok_or(ResolveError::MissingToken)
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, String, String)>>,
    pub fail: Mutex<bool>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn record(
        &self,
        reference: &ObjectReference,
        _type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        if *self.fail.lock().unwrap() {
            return Err(StoreError::Expired("injected".into()));
        }
        self.events.lock().unwrap().push((
            reference.name.clone().unwrap_or_default(),
            reason.into(),
            message.into(),
        ));
        Ok(())
    }
}

/// A reconcile context backed entirely by in-memory fakes.
pub struct Harness {
    pub warm_images: Arc<Store<WarmImage>>,
    pub daemon_sets: Arc<Store<DaemonSet>>,
    pub children: Arc<FakeChildren>,
    pub secrets: Arc<FakeSecrets>,
    pub resolver: Arc<FakeResolver>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new(resolver: FakeResolver) -> Self {
        let h = Self {
            warm_images: Store::new(),
            daemon_sets: Store::new(),
            children: Arc::new(FakeChildren::default()),
            secrets: Arc::new(FakeSecrets::default()),
            resolver: Arc::new(resolver),
            events: Arc::new(RecordingEvents::default()),
        };
        h.warm_images.replace(vec![]);
        h.daemon_sets.replace(vec![]);
        h
    }

    pub fn context(&self) -> Context {
        Context {
            warm_images: self.warm_images.clone(),
            daemon_sets: self.daemon_sets.clone(),
            children: self.children.clone(),
            keychain: Keychain::new(self.secrets.clone()),
            resolver: self.resolver.clone(),
            events: self.events.clone(),
            scheme: Arc::new(Scheme::for_controller()),
            sleeper_image: SLEEPER.into(),
        }
    }

    /// Feed everything created so far back into the child cache, as the
    /// watch eventually would.
    pub fn observe_created(&self) {
        for ds in self.children.created() {
            self.daemon_sets.upsert(ds);
        }
    }

    pub fn main_image(ds: &DaemonSet) -> String {
        ds.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default()
    }

    pub fn version_of(ds: &DaemonSet) -> Option<String> {
        ds.labels().get(LABEL_VERSION).cloned()
    }
}
