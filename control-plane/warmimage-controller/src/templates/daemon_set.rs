use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::ResourceExt;

use super::labels::make_labels;
use crate::crd::WarmImage;

pub const SLEEPER_VOLUME: &str = "the-sleeper";
pub const SLEEPER_CONTAINER: &str = "the-sleeper";
pub const IMAGE_CONTAINER: &str = "the-image";
pub const DROP_DIR: &str = "/drop/";
pub const SLEEPER_PATH: &str = "/drop/sleeper";

const CPU: &str = "1m";
const MEMORY: &str = "20M";

fn sleeper_resources() -> ResourceRequirements {
    let amounts = BTreeMap::from([
        ("cpu".to_string(), Quantity(CPU.to_string())),
        ("memory".to_string(), Quantity(MEMORY.to_string())),
    ]);
    ResourceRequirements {
        requests: Some(amounts.clone()),
        limits: Some(amounts),
        ..Default::default()
    }
}

fn drop_mount() -> VolumeMount {
    VolumeMount {
        name: SLEEPER_VOLUME.to_string(),
        mount_path: DROP_DIR.to_string(),
        ..Default::default()
    }
}

/// Init container copying the sleeper binary into the shared volume.
pub fn sleeper_container(sleeper_image: &str) -> Container {
    Container {
        name: SLEEPER_CONTAINER.to_string(),
        image: Some(sleeper_image.to_string()),
        args: Some(vec![
            "--mode".into(),
            "copy".into(),
            "--to".into(),
            SLEEPER_PATH.into(),
        ]),
        volume_mounts: Some(vec![drop_mount()]),
        resources: Some(sleeper_resources()),
        ..Default::default()
    }
}

/// Container running the warmed image, parked on the staged sleeper.
pub fn image_container(image: &str) -> Container {
    Container {
        name: IMAGE_CONTAINER.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![SLEEPER_PATH.into()]),
        args: Some(vec!["--mode".into(), "sleep".into()]),
        volume_mounts: Some(vec![drop_mount()]),
        resources: Some(sleeper_resources()),
        ..Default::default()
    }
}

/// DaemonSet that pulls `image` onto every schedulable node for the current
/// generation of `wi`. `image` is the already-resolved reference.
pub fn make_daemon_set(
    wi: &WarmImage,
    image: &str,
    sleeper_image: &str,
    owner: OwnerReference,
) -> DaemonSet {
    let labels = make_labels(wi);
    DaemonSet {
        metadata: ObjectMeta {
            generate_name: Some(wi.name_any()),
            namespace: wi.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![sleeper_container(sleeper_image)]),
                    containers: vec![image_container(image)],
                    image_pull_secrets: wi.spec.image_pull_secrets.clone().map(|s| vec![s]),
                    volumes: Some(vec![Volume {
                        name: SLEEPER_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
