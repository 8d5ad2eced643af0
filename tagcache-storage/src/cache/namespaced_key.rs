//! Namespaced backend keys.
//!
//! Every key a backend stores is qualified by a key prefix and a numeric
//! version (generation). Bumping the version orphans everything written under
//! the previous one without touching it.

use std::fmt;

/// Separator between the key components.
const SEPARATOR: char = ':';

/// Memcached does not accept keys longer than this.
pub const MEMCACHE_MAX_KEY_LENGTH: usize = 250;

/// A backend key qualified by prefix and version.
///
/// # Format
///
/// `<prefix>:<version>:<key>`. The prefix may not contain the separator; the
/// caller key may, since decoding splits on the first two separators only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey {
    prefix: String,
    version: u32,
    key: String,
}

impl NamespacedKey {
    pub fn new(prefix: impl Into<String>, version: u32, key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version,
            key: key.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode to the string stored in the backend.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.prefix, SEPARATOR, self.version, SEPARATOR, self.key
        )
    }

    /// Decode an encoded key.
    ///
    /// Returns `None` if either separator is missing or the version is not numeric.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.splitn(3, SEPARATOR);
        let prefix = parts.next()?;
        let version = parts.next()?.parse().ok()?;
        let key = parts.next()?;
        Some(Self::new(prefix, version, key))
    }

    /// Encoded prefix shared by every key of one version.
    pub fn version_prefix(prefix: &str, version: u32) -> String {
        format!("{}{}{}{}", prefix, SEPARATOR, version, SEPARATOR)
    }

    /// Describe why this key would be rejected by memcached, if it would be.
    pub fn memcache_warning(&self) -> Option<String> {
        let encoded = self.encode();
        if encoded.len() > MEMCACHE_MAX_KEY_LENGTH {
            return Some(format!(
                "key is {} bytes, longer than the memcached limit of {}",
                encoded.len(),
                MEMCACHE_MAX_KEY_LENGTH
            ));
        }
        if encoded.chars().any(|c| c.is_control() || c == ' ') {
            return Some("key contains whitespace or control characters".to_string());
        }
        None
    }
}

impl fmt::Display for NamespacedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Key prefix and default version owned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    pub prefix: String,
    pub default_version: u32,
}

impl KeyNamespace {
    pub fn new(prefix: impl Into<String>, default_version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            default_version,
        }
    }

    /// Qualify a caller key; `None` selects the default version.
    pub fn make_key(&self, key: &str, version: Option<u32>) -> NamespacedKey {
        NamespacedKey::new(
            self.prefix.clone(),
            version.unwrap_or(self.default_version),
            key,
        )
    }
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self::new("", 1)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Decoding an encoded key yields the same components.
        #[test]
        fn prop_decode_inverts_encode(prefix in "[a-z]{0,8}", version in any::<u32>(), key in ".{0,64}") {
            let original = NamespacedKey::new(prefix, version, key);
            prop_assert_eq!(NamespacedKey::decode(&original.encode()), Some(original));
        }
    }
}
