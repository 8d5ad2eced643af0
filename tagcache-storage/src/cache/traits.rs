//! Cache backend trait and statistics.
//!
//! This module defines the key-value contract the tagging layer consumes.
//! Implementations wrap a concrete store (memcached, Redis, LMDB, memory).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tagcache_core::{KeyVersion, TagCacheResult};

/// Key-value backend with TTL and namespace versions.
///
/// # Keys and Versions
///
/// Callers pass bare keys. Implementations qualify them with their own prefix
/// and the given version (`None` = the backend's default version), so the
/// same caller key under two versions names two independent entries.
///
/// # TTL
///
/// `None` means the entry never expires. A zero TTL stores nothing useful:
/// the entry is already expired on the next read.
///
/// # Batch Operations
///
/// `get_many`, `set_many` and `delete_many` default to looping over the
/// single-key calls. Backends with native batching should override them.
/// Absent keys are simply missing from the `get_many` result.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value, or `None` if absent or expired.
    async fn get(&self, key: &str, version: KeyVersion) -> TagCacheResult<Option<Value>>;

    /// Get several values at once.
    async fn get_many(
        &self,
        keys: &[String],
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key, version).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store a value.
    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()>;

    /// Store several values with one TTL.
    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl, version).await?;
        }
        Ok(())
    }

    /// Delete a value. Deleting an absent key is not an error.
    async fn delete(&self, key: &str, version: KeyVersion) -> TagCacheResult<()>;

    /// Delete several values.
    async fn delete_many(&self, keys: &[String], version: KeyVersion) -> TagCacheResult<()> {
        for key in keys {
            self.delete(key, version).await?;
        }
        Ok(())
    }

    /// Get cache statistics.
    async fn stats(&self) -> TagCacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (absent or expired).
    pub misses: u64,
    /// Number of entries currently stored, expired ones included until purged.
    pub entry_count: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::RwLock;

    // Minimal backend that only implements the required methods, to exercise
    // the batch defaults.
    #[derive(Default)]
    struct SingleKeyBackend {
        storage: RwLock<HashMap<String, Value>>,
    }

    #[async_trait]
    impl CacheBackend for SingleKeyBackend {
        async fn get(&self, key: &str, _version: KeyVersion) -> TagCacheResult<Option<Value>> {
            Ok(self.storage.read().unwrap().get(key).cloned())
        }

        async fn set(
            &self,
            key: &str,
            value: Value,
            _ttl: Option<Duration>,
            _version: KeyVersion,
        ) -> TagCacheResult<()> {
            self.storage.write().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str, _version: KeyVersion) -> TagCacheResult<()> {
            self.storage.write().unwrap().remove(key);
            Ok(())
        }

        async fn stats(&self) -> TagCacheResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_batch_defaults_delegate_to_single_key_calls() {
        let backend = SingleKeyBackend::default();

        let mut entries = HashMap::new();
        entries.insert("a".to_string(), json!(1));
        entries.insert("b".to_string(), json!(2));
        backend.set_many(entries, None, None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        let found = backend.get_many(&keys, None).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], json!(1));
        assert!(!found.contains_key("missing"));

        backend.delete_many(&keys, None).await.unwrap();
        assert!(backend.get_many(&keys, None).await.unwrap().is_empty());
    }
}
