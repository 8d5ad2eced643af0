//! Tag keys and tag version tokens
//!
//! A tag never touches the backend under its own name. It is digested into a
//! fixed-shape key prefixed with the key format, so any user string maps to a
//! backend-legal key and a change of invalidation scheme cannot read tokens
//! written by the previous one.

use crate::ContextId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Format of derived tag keys. Bump when the invalidation scheme changes.
pub const TAG_KEY_FORMAT: &str = "1";

/// Prefix of the key holding a tag's lock record.
pub const LOCK_KEY_PREFIX: &str = "lock";

/// Length of a tag version token in hex characters.
const TAG_VERSION_LEN: usize = 32;

/// Opaque token naming the current generation of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagVersion(String);

impl TagVersion {
    /// Wrap an existing token (e.g. one read back from the backend).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the backend key holding the version token of `tag`.
///
/// Format: `tag_<format>_<sha256 hex of tag>`.
pub fn tag_cache_key(tag: &str) -> String {
    let digest = Sha256::digest(tag.as_bytes());
    format!("tag_{}_{}", TAG_KEY_FORMAT, hex::encode(digest))
}

/// Derive the backend key holding the lock record of an already derived tag key.
pub fn lock_cache_key(tag_key: &str) -> String {
    format!("{}_{}", LOCK_KEY_PREFIX, tag_key)
}

/// Generate a new tag version token.
///
/// Mixes a random value from the thread-local CSPRNG with the caller's
/// execution-context identity and the wall clock, then digests the result.
pub fn generate_tag_version(context: &ContextId) -> TagVersion {
    let random: u128 = rand::random();
    let now = Utc::now();
    let mut hasher = Sha256::new();
    hasher.update(random.to_le_bytes());
    hasher.update(context.as_str().as_bytes());
    hasher.update(now.timestamp().to_le_bytes());
    hasher.update(now.timestamp_subsec_nanos().to_le_bytes());
    let mut token = hex::encode(hasher.finalize());
    token.truncate(TAG_VERSION_LEN);
    TagVersion(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tag_key_is_deterministic() {
        assert_eq!(tag_cache_key("Article.pk:1"), tag_cache_key("Article.pk:1"));
        assert_ne!(tag_cache_key("Article.pk:1"), tag_cache_key("Article.pk:2"));
    }

    #[test]
    fn test_tag_key_shape() {
        let key = tag_cache_key("some tag with spaces and ünïcödé");
        let prefix = format!("tag_{}_", TAG_KEY_FORMAT);
        assert!(key.starts_with(&prefix));
        let digest = &key[prefix.len()..];
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_lock_key_wraps_tag_key() {
        let tag_key = tag_cache_key("tag1");
        assert_eq!(lock_cache_key(&tag_key), format!("lock_{}", tag_key));
    }

    #[test]
    fn test_generated_versions_are_unique() {
        let context = ContextId::from_parts("host", 1, "task");
        let versions: HashSet<TagVersion> =
            (0..1000).map(|_| generate_tag_version(&context)).collect();
        assert_eq!(versions.len(), 1000);
    }

    #[test]
    fn test_generated_version_shape() {
        let version = generate_tag_version(&ContextId::generate());
        assert_eq!(version.as_str().len(), TAG_VERSION_LEN);
        assert!(version.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
