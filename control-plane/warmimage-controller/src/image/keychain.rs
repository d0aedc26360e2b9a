use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::core::v1::{LocalObjectReference, Secret};
use serde::Deserialize;
use tracing::{debug, warn};

use super::reference::DEFAULT_REGISTRY;
use crate::store::{SecretSource, StoreError};

const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CFG_KEY: &str = ".dockercfg";

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registry credentials keyed by normalized registry host. Empty means
/// anonymous access everywhere.
#[derive(Debug, Clone, Default)]
pub struct RegistryCredentials {
    entries: HashMap<String, BasicAuth>,
}

impl RegistryCredentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: &str, auth: BasicAuth) {
        self.entries.insert(normalize_registry(registry), auth);
    }

    pub fn for_registry(&self, host: &str) -> Option<&BasicAuth> {
        self.entries.get(&normalize_registry(host))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduce the many spellings found in docker config files
/// (`https://index.docker.io/v1/`, `docker.io`, ...) to a bare host.
fn normalize_registry(raw: &str) -> String {
    let host = raw
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => DEFAULT_REGISTRY.to_string(),
        h => h.to_string(),
    }
}

#[derive(Deserialize, Default)]
struct DockerConfigEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl DockerConfigEntry {
    fn into_basic(self) -> Option<BasicAuth> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some(BasicAuth {
                username: username.clone(),
                password: password.clone(),
            });
        }
        let decoded = STANDARD.decode(self.auth?.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(BasicAuth {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: BTreeMap<String, DockerConfigEntry>,
}

/// Fold the credentials found in one pull secret into `creds`. Returns the
/// number of registries added.
pub fn add_secret(creds: &mut RegistryCredentials, secret: &Secret) -> usize {
    let data = secret.data.as_ref();
    let entries: BTreeMap<String, DockerConfigEntry> =
        if let Some(raw) = data.and_then(|d| d.get(DOCKER_CONFIG_JSON_KEY)) {
            match serde_json::from_slice::<DockerConfigJson>(&raw.0) {
                Ok(cfg) => cfg.auths,
                Err(e) => {
                    warn!(error = %e, "malformed .dockerconfigjson; ignoring secret");
                    return 0;
                }
            }
        } else if let Some(raw) = data.and_then(|d| d.get(DOCKER_CFG_KEY)) {
            match serde_json::from_slice(&raw.0) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "malformed .dockercfg; ignoring secret");
                    return 0;
                }
            }
        } else {
            return 0;
        };

    let mut added = 0;
    for (registry, entry) in entries {
        if let Some(auth) = entry.into_basic() {
            creds.insert(&registry, auth);
            added += 1;
        }
    }
    added
}

/// Looks up the pull secrets a warm image references.
#[derive(Clone)]
pub struct Keychain {
    secrets: Arc<dyn SecretSource>,
}

impl Keychain {
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        Self { secrets }
    }

    /// Credentials from every referenced secret that exists. A missing
    /// secret means anonymous access for its registries.
    pub async fn credentials(
        &self,
        namespace: &str,
        pull_secrets: &[LocalObjectReference],
    ) -> Result<RegistryCredentials, StoreError> {
        let mut creds = RegistryCredentials::anonymous();
        for r in pull_secrets {
            match self.secrets.get_secret(namespace, &r.name).await? {
                Some(secret) => {
                    let added = add_secret(&mut creds, &secret);
                    debug!(%namespace, secret = %r.name, added, "loaded pull secret");
                }
                None => warn!(%namespace, secret = %r.name, "pull secret not found; using anonymous access"),
            }
        }
        Ok(creds)
    }
}
