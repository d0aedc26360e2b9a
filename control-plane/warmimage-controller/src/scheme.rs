//! Registry of the kinds this controller works with.
//!
//! Built once at startup and shared by reference; it is the only place that
//! turns an object into an `ObjectReference` or a controller `OwnerReference`.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::core::GroupVersionKind;

use crate::crd::WarmImage;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemeError {
    #[error("kind for type {0} is not registered")]
    Unregistered(&'static str),
}

#[derive(Debug, Default, Clone)]
pub struct Scheme {
    kinds: HashMap<TypeId, GroupVersionKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with every kind the warm image controller touches.
    pub fn for_controller() -> Self {
        let mut scheme = Self::new();
        scheme.register::<WarmImage>().register::<DaemonSet>();
        scheme
    }

    pub fn register<K>(&mut self) -> &mut Self
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.kinds.insert(TypeId::of::<K>(), gvk);
        self
    }

    pub fn kind_of<K: 'static>(&self) -> Result<&GroupVersionKind, SchemeError> {
        self.kinds
            .get(&TypeId::of::<K>())
            .ok_or(SchemeError::Unregistered(type_name::<K>()))
    }

    pub fn object_reference<K>(&self, obj: &K) -> Result<ObjectReference, SchemeError>
    where
        K: Resource + 'static,
    {
        let gvk = self.kind_of::<K>()?;
        let meta = obj.meta();
        Ok(ObjectReference {
            api_version: Some(api_version(gvk)),
            kind: Some(gvk.kind.clone()),
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
            ..Default::default()
        })
    }

    /// Owner reference marking `owner` as the managing controller, blocking
    /// the owner's foreground deletion until the dependent is gone.
    pub fn controller_ref<K>(&self, owner: &K) -> Result<OwnerReference, SchemeError>
    where
        K: Resource + 'static,
    {
        let gvk = self.kind_of::<K>()?;
        let meta = owner.meta();
        Ok(OwnerReference {
            api_version: api_version(gvk),
            kind: gvk.kind.clone(),
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

fn api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}
