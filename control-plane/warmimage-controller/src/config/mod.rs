use std::time::Duration;

use envconfig::Envconfig;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("WARMIMAGE_SLEEPER_IMAGE must not be empty")]
    MissingSleeperImage,
    #[error("WARMIMAGE_WORKERS must be at least 1")]
    NoWorkers,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ControllerConfig {
    /// Image holding the sleeper binary staged into every warming pod.
    #[envconfig(from = "WARMIMAGE_SLEEPER_IMAGE")]
    pub sleeper_image: String,

    #[envconfig(from = "WARMIMAGE_WORKERS", default = "2")]
    pub workers: usize,

    /// Full re-list interval for both caches.
    #[envconfig(from = "WARMIMAGE_RESYNC_SECS", default = "30")]
    pub resync_secs: u64,

    #[envconfig(from = "WARMIMAGE_CACHE_SYNC_TIMEOUT_SECS", default = "60")]
    pub cache_sync_timeout_secs: u64,

    /// Restrict the controller to one namespace. Unset watches all.
    #[envconfig(from = "WARMIMAGE_NAMESPACE")]
    pub namespace: Option<String>,

    #[envconfig(from = "WARMIMAGE_REGISTRY_TIMEOUT_SECS", default = "30")]
    pub registry_timeout_secs: u64,

    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,
}

impl ControllerConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.sleeper_image.trim().is_empty() {
            return Err(ConfigError::MissingSleeperImage);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(self)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}
