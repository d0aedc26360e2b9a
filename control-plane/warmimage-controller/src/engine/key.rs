use kube::Resource;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid resource key: {0:?}")]
pub struct KeyError(pub String);

/// Work key for an object: `namespace/name`, or just `name` when the object
/// is cluster scoped.
pub fn key_for<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Split a work key back into `(namespace, name)`.
pub fn split_key(key: &str) -> Result<(&str, &str), KeyError> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok(("", name)),
        [ns, name] if !name.is_empty() => Ok((ns, name)),
        _ => Err(KeyError(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    #[test]
    fn key_round_trips_through_split() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo".into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = key_for(&cm);
        assert_eq!(key, "ns/demo");
        assert_eq!(split_key(&key).unwrap(), ("ns", "demo"));
    }

    #[test]
    fn cluster_scoped_key_has_no_namespace() {
        assert_eq!(split_key("node-a").unwrap(), ("", "node-a"));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for bad in ["", "a/b/c", "ns/", "/"] {
            assert!(split_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
