use std::fmt;

pub const DEFAULT_REGISTRY: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// A mutable `[registry/]repository[:tag]` image reference.
///
/// Registry and repository keep the spelling they were written with, so a
/// resolved reference reads like the one the user gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReference {
    registry: Option<String>,
    repository: String,
    tag: String,
}

impl TagReference {
    /// Parse `s` as a tag reference. Anything with a digest (`@`) or that
    /// fails validation is not a tag and yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.contains('@') || s.chars().any(char::is_whitespace) {
            return None;
        }
        let (registry, rest) = match s.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => (Some(first.to_string()), rest),
            _ => (None, s),
        };
        // A ':' after the last '/' separates the tag; earlier ones belong to a
        // registry port.
        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let at = last_slash + i;
                (&rest[..at], &rest[at + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };
        if !valid_repository(repository) || !valid_tag(tag) {
            return None;
        }
        Some(Self {
            registry,
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Hostname used to reach the registry API.
    pub fn registry_host(&self) -> &str {
        match self.registry.as_deref() {
            None | Some("docker.io") => DEFAULT_REGISTRY,
            Some(r) => r,
        }
    }

    /// Repository path on the registry, with Docker Hub's implicit
    /// `library/` namespace filled in.
    pub fn repository_path(&self) -> String {
        if self.registry_host() == DEFAULT_REGISTRY && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `registry/repository` as written, without the tag.
    pub fn context(&self) -> String {
        match &self.registry {
            Some(r) => format!("{r}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    /// Immutable reference pinning this repository to `digest`.
    pub fn with_digest(&self, digest: &str) -> String {
        format!("{}@{}", self.context(), digest)
    }
}

impl fmt::Display for TagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context(), self.tag)
    }
}

fn looks_like_registry(first: &str) -> bool {
    first.contains('.') || first.contains(':') || first == "localhost"
}

fn valid_repository(repo: &str) -> bool {
    !repo.is_empty()
        && repo.split('/').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
        })
}

fn valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
        && tag.len() <= 128
        && chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c))
}
