//! Image reference handling: tags are pinned to digests before they are
//! handed to nodes, so every node warms the same content.

use k8s_openapi::api::core::v1::LocalObjectReference;

pub mod keychain;
pub mod reference;
pub mod resolver;

pub use keychain::{BasicAuth, Keychain, RegistryCredentials};
pub use reference::TagReference;
pub use resolver::{ImageResolver, RegistryResolver, ResolveError};

/// Pin `image` to a digest when it is a tag; anything else is assumed to be
/// a digest reference already and is returned unchanged. Pull secrets are
/// only read when the registry has to be asked.
pub async fn resolve_image(
    resolver: &dyn ImageResolver,
    keychain: &Keychain,
    namespace: &str,
    image: &str,
    pull_secrets: &[LocalObjectReference],
) -> Result<String, ResolveError> {
    let Some(tag) = TagReference::parse(image) else {
        return Ok(image.to_string());
    };
    let creds = keychain.credentials(namespace, pull_secrets).await?;
    let digest = resolver.resolve(&tag, &creds).await?;
    Ok(tag.with_digest(&digest))
}
