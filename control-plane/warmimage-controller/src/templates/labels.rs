use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::WarmImage;
use crate::engine::{Expression, Selector};

pub const LABEL_CONTROLLER: &str = "controller";
pub const LABEL_VERSION: &str = "version";

/// Labels identifying one generation of a warm image's children.
pub fn make_labels(wi: &WarmImage) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CONTROLLER.to_string(), wi.uid().unwrap_or_default()),
        (LABEL_VERSION.to_string(), wi.resource_version().unwrap_or_default()),
    ])
}

/// Children of this warm image, any generation.
pub fn make_owned_selector(wi: &WarmImage) -> Selector {
    Selector::from(Expression::Equal(
        LABEL_CONTROLLER.into(),
        wi.uid().unwrap_or_default(),
    ))
}

/// Children of the current generation.
pub fn make_selector(wi: &WarmImage) -> Selector {
    make_labels(wi)
        .into_iter()
        .map(|(key, value)| Expression::Equal(key, value))
        .collect()
}

/// Children of every generation but the current one.
pub fn make_old_version_selector(wi: &WarmImage) -> Selector {
    [
        Expression::Equal(LABEL_CONTROLLER.into(), wi.uid().unwrap_or_default()),
        Expression::NotEqual(LABEL_VERSION.into(), wi.resource_version().unwrap_or_default()),
    ]
    .into_iter()
    .collect()
}
