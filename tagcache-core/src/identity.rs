//! Execution-context identity
//!
//! Every session that talks to the cache is an execution context. Its id is
//! the owner written into lock records and doubles as the transaction id, so
//! two live contexts must never share one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Identity of one execution context: `host.pid.task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh id for a new execution context on this host and process.
    ///
    /// The task component is a UUIDv7, so ids are unique even when many
    /// contexts share one OS thread (async tasks).
    pub fn generate() -> Self {
        Self::from_parts(hostname(), std::process::id(), Uuid::now_v7().simple())
    }

    /// Build an id from explicit components.
    pub fn from_parts(host: impl fmt::Display, pid: u32, task: impl fmt::Display) -> Self {
        Self(format!("{}.{}.{}", host, pid, task))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host name of this machine, resolved once per process.
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}
