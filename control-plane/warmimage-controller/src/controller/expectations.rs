//! Remembers children this process created but has not yet seen in its
//! cache.
//!
//! Create goes straight to the API server while the child cache catches up
//! through its watch. A reconcile that runs in between would otherwise see
//! zero children for the generation and create a second one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::lock;

/// How long a creation is trusted without being observed.
pub const EXPECTATION_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct Pending {
    version: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct CreationExpectations {
    ttl: Duration,
    pending: Mutex<HashMap<String, Pending>>,
}

impl Default for CreationExpectations {
    fn default() -> Self {
        Self::new(EXPECTATION_TTL)
    }
}

impl CreationExpectations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record that a child for `version` of `key` was just created.
    pub fn expect_creation(&self, key: &str, version: &str) {
        lock(&self.pending).insert(
            key.to_string(),
            Pending {
                version: version.to_string(),
                deadline: Instant::now() + self.ttl,
            },
        );
    }

    /// Whether a creation for `version` of `key` is still in flight.
    /// Expired or superseded entries are cleared.
    pub fn is_pending(&self, key: &str, version: &str) -> bool {
        let mut pending = lock(&self.pending);
        match pending.get(key) {
            Some(p) if p.version == version && Instant::now() < p.deadline => true,
            Some(_) => {
                pending.remove(key);
                false
            }
            None => false,
        }
    }

    /// The cache has caught up with `key`, or `key` no longer exists.
    pub fn observed(&self, key: &str) {
        lock(&self.pending).remove(key);
    }
}
