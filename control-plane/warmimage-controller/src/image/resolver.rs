use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::keychain::{BasicAuth, RegistryCredentials};
use super::reference::TagReference;
use crate::store::StoreError;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json";

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("unsupported auth challenge from {0}")]
    Challenge(String),
    #[error("token endpoint returned no token")]
    MissingToken,
    #[error("loading pull credentials failed: {0}")]
    Credentials(#[from] StoreError),
}

/// Turns a mutable tag into the content digest it currently points at.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Returns the digest (`sha256:...`) of `tag`'s manifest.
    async fn resolve(
        &self,
        tag: &TagReference,
        creds: &RegistryCredentials,
    ) -> Result<String, ResolveError>;
}

enum Authorization {
    Basic(BasicAuth),
    Bearer(String),
}

impl Authorization {
    fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Basic(b) => req.basic_auth(&b.username, Some(&b.password)),
            Authorization::Bearer(t) => req.bearer_auth(t),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Challenge {
    scheme: String,
    params: HashMap<String, String>,
}

/// Parse `Bearer realm="...",service="...",scope="a,b"`. Quoted values may
/// contain commas.
fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek().copied() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value);
    }
    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// [`ImageResolver`] speaking the OCI distribution API.
#[derive(Clone)]
pub struct RegistryResolver {
    http: Client,
}

impl RegistryResolver {
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("warmimage-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn manifest(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Option<&Authorization>,
    ) -> Result<Response, ResolveError> {
        let mut req = self.http.request(method, url).header(ACCEPT, MANIFEST_TYPES);
        if let Some(a) = auth {
            req = a.apply(req);
        }
        Ok(req.send().await?)
    }

    /// Answer the registry's `WWW-Authenticate` challenge.
    async fn authorize(
        &self,
        headers: &HeaderMap,
        url: &str,
        tag: &TagReference,
        basic: Option<&BasicAuth>,
    ) -> Result<Authorization, ResolveError> {
        let challenge = headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| ResolveError::Challenge(url.to_string()))?;
        match challenge.scheme.as_str() {
            "basic" => basic
                .cloned()
                .map(Authorization::Basic)
                .ok_or_else(|| ResolveError::Status {
                    status: StatusCode::UNAUTHORIZED,
                    url: url.to_string(),
                }),
            "bearer" => {
                let realm = challenge
                    .params
                    .get("realm")
                    .ok_or_else(|| ResolveError::Challenge(url.to_string()))?;
                let scope = challenge
                    .params
                    .get("scope")
                    .cloned()
                    .unwrap_or_else(|| format!("repository:{}:pull", tag.repository_path()));
                let mut query = vec![("scope", scope)];
                if let Some(service) = challenge.params.get("service") {
                    query.push(("service", service.clone()));
                }
                let mut req = self.http.get(realm.as_str()).query(&query);
                if let Some(b) = basic {
                    req = req.basic_auth(&b.username, Some(&b.password));
                }
                let resp = req.send().await?;
                if !resp.status().is_success() {
                    return Err(ResolveError::Status {
                        status: resp.status(),
                        url: realm.clone(),
                    });
                }
                let body: TokenResponse = resp.json().await?;
                body.token
                    .or(body.access_token)
                    .filter(|t| !t.is_empty())
                    .map(Authorization::Bearer)
                    .ok_or(ResolveError::MissingToken)
            }
            _ => Err(ResolveError::Challenge(url.to_string())),
        }
    }
}

/// Loopback and `.local` registries are reached over plain HTTP.
fn registry_scheme(host: &str) -> &'static str {
    let bare = host.split(':').next().unwrap_or(host);
    if bare == "localhost" || bare.starts_with("127.") || bare.ends_with(".local") {
        "http"
    } else {
        "https"
    }
}

#[async_trait]
impl ImageResolver for RegistryResolver {
    #[instrument(skip(self, creds), fields(image = %tag))]
    async fn resolve(
        &self,
        tag: &TagReference,
        creds: &RegistryCredentials,
    ) -> Result<String, ResolveError> {
        let host = tag.registry_host();
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            registry_scheme(host),
            host,
            tag.repository_path(),
            tag.tag()
        );
        let basic = creds.for_registry(host);

        let mut auth = basic.cloned().map(Authorization::Basic);
        let mut resp = self.manifest(reqwest::Method::HEAD, &url, auth.as_ref()).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let a = self.authorize(resp.headers(), &url, tag, basic).await?;
            resp = self.manifest(reqwest::Method::HEAD, &url, Some(&a)).await?;
            auth = Some(a);
        }
        if !resp.status().is_success() {
            return Err(ResolveError::Status {
                status: resp.status(),
                url,
            });
        }
        if let Some(d) = resp
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
        {
            debug!(digest = %d, "resolved from digest header");
            return Ok(d.to_string());
        }

        // Some registries omit the header on HEAD; hash the manifest instead.
        let resp = self.manifest(reqwest::Method::GET, &url, auth.as_ref()).await?;
        if !resp.status().is_success() {
            return Err(ResolveError::Status {
                status: resp.status(),
                url,
            });
        }
        let body = resp.bytes().await?;
        let digest = format!("sha256:{:x}", Sha256::digest(&body));
        debug!(%digest, "resolved from manifest body");
        Ok(digest)
    }
}
