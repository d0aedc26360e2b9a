use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An image that should be kept pulled on every eligible node.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "mattmoor.io",
    version = "v2",
    kind = "WarmImage",
    plural = "warmimages",
    namespaced,
    status = "WarmImageStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WarmImageSpec {
    /// Image reference, either a tag (resolved to a digest before use) or a digest.
    pub image: String,
    /// Secret holding credentials for pulling `image`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<LocalObjectReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct WarmImageStatus {}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_uses_camel_case_and_omits_absent_secret() {
        let spec = WarmImageSpec {
            image: "busybox".into(),
            image_pull_secrets: None,
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v, serde_json::json!({ "image": "busybox" }));

        let parsed: WarmImageSpec = serde_json::from_value(serde_json::json!({
            "image": "mysql",
            "imagePullSecrets": { "name": "im-batman" }
        }))
        .unwrap();
        assert_eq!(parsed.image_pull_secrets.unwrap().name, "im-batman");
    }

    #[test]
    fn crd_identity() {
        let crd = WarmImage::crd();
        assert_eq!(crd.spec.group, "mattmoor.io");
        assert_eq!(crd.spec.names.kind, "WarmImage");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
