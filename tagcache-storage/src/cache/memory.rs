//! In-memory cache backend.
//!
//! A `RwLock<HashMap>` store with lazy expiry. Suitable for tests and for
//! single-process deployments; it shares nothing across processes.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tagcache_core::{KeyVersion, StorageError, TagCacheResult};

use super::namespaced_key::{KeyNamespace, NamespacedKey};
use super::traits::{CacheBackend, CacheStats};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache backend.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    namespace: KeyNamespace,
    entries: RwLock<HashMap<String, StoredEntry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryBackend {
    /// Create an empty backend with no key prefix and default version 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend with the given key namespace.
    pub fn with_namespace(namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            ..Default::default()
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) -> TagCacheResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> TagCacheResult<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = (before - entries.len()) as u64;
        drop(entries);

        if purged > 0 {
            self.record(|stats| stats.evictions += purged)?;
            tracing::debug!(purged, "Purged expired in-memory cache entries");
        }
        Ok(purged)
    }

    fn make_key(&self, key: &str, version: KeyVersion) -> String {
        let namespaced = self.namespace.make_key(key, version);
        warn_if_unportable(&namespaced);
        namespaced.encode()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) -> TagCacheResult<()> {
        let mut stats = self.stats.write().map_err(|_| StorageError::LockPoisoned)?;
        update(&mut stats);
        Ok(())
    }

    fn expires_at(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }
}

fn warn_if_unportable(key: &NamespacedKey) {
    if let Some(reason) = key.memcache_warning() {
        tracing::warn!(key = %key, reason = %reason, "Cache key would not be portable to memcached");
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str, version: KeyVersion) -> TagCacheResult<Option<Value>> {
        let encoded = self.make_key(key, version);
        let now = Utc::now();

        let lookup = {
            let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
            entries.get(&encoded).cloned()
        };

        match lookup {
            Some(entry) if !entry.is_expired(now) => {
                self.record(|stats| stats.hits += 1)?;
                Ok(Some(entry.value))
            }
            Some(_) => {
                self.entries
                    .write()
                    .map_err(|_| StorageError::LockPoisoned)?
                    .remove(&encoded);
                self.record(|stats| {
                    stats.misses += 1;
                    stats.evictions += 1;
                })?;
                Ok(None)
            }
            None => {
                self.record(|stats| stats.misses += 1)?;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        let encoded = self.make_key(key, version);
        let entry = StoredEntry {
            value,
            expires_at: Self::expires_at(ttl),
        };
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(encoded, entry);
        Ok(())
    }

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        let expires_at = Self::expires_at(ttl);
        let encoded: Vec<(String, StoredEntry)> = entries
            .into_iter()
            .map(|(key, value)| (self.make_key(&key, version), StoredEntry { value, expires_at }))
            .collect();

        let mut store = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        store.extend(encoded);
        Ok(())
    }

    async fn delete(&self, key: &str, version: KeyVersion) -> TagCacheResult<()> {
        let encoded = self.make_key(key, version);
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&encoded);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String], version: KeyVersion) -> TagCacheResult<()> {
        let encoded: Vec<String> = keys.iter().map(|key| self.make_key(key, version)).collect();
        let mut store = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        for key in &encoded {
            store.remove(key);
        }
        Ok(())
    }

    async fn stats(&self) -> TagCacheResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone();
        stats.entry_count = self.len() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = InMemoryBackend::new();
        backend
            .set("name1", json!("value1"), None, None)
            .await
            .expect("set should succeed");

        let value = backend.get("name1", None).await.expect("get should succeed");
        assert_eq!(value, Some(json!("value1")));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("nope", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_versions_are_isolated() {
        let backend = InMemoryBackend::with_namespace(KeyNamespace::new("site", 1));
        backend.set("k", json!(1), None, None).await.unwrap();
        backend.set("k", json!(2), None, Some(2)).await.unwrap();

        assert_eq!(backend.get("k", None).await.unwrap(), Some(json!(1)));
        assert_eq!(backend.get("k", Some(1)).await.unwrap(), Some(json!(1)));
        assert_eq!(backend.get("k", Some(2)).await.unwrap(), Some(json!(2)));
        assert_eq!(backend.get("k", Some(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_expired_on_read() {
        let backend = InMemoryBackend::new();
        backend
            .set("short", json!("gone"), Some(Duration::ZERO), None)
            .await
            .unwrap();

        assert_eq!(backend.get("short", None).await.unwrap(), None);
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = InMemoryBackend::new();
        backend
            .set("short", json!(1), Some(Duration::ZERO), None)
            .await
            .unwrap();
        backend
            .set("long", json!(2), Some(Duration::from_secs(3600)), None)
            .await
            .unwrap();

        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("long", None).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let backend = InMemoryBackend::new();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), json!("A"));
        entries.insert("b".to_string(), json!("B"));
        backend.set_many(entries, None, None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = backend.get_many(&keys, None).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], json!("B"));

        backend
            .delete_many(&["a".to_string()], None)
            .await
            .unwrap();
        assert_eq!(backend.get("a", None).await.unwrap(), None);
        assert_eq!(backend.get("b", None).await.unwrap(), Some(json!("B")));
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let backend = InMemoryBackend::new();
        backend.delete("never-set", None).await.expect("delete is idempotent");
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = InMemoryBackend::new();
        let _ = backend.get("k", None).await;
        backend.set("k", json!(1), None, None).await.unwrap();
        let _ = backend.get("k", None).await;
        let _ = backend.get("k", None).await;

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = InMemoryBackend::new();
        backend.set("k", json!(1), None, None).await.unwrap();
        backend.clear().unwrap();
        assert!(backend.is_empty());
    }
}
