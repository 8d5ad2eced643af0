//! REPEATABLE READ and SERIALIZABLE locks.
//!
//! Touching a tag inside a transaction writes a lock record next to the
//! tag's version. A concurrent transaction resolving that tag refuses to use
//! it while the record is ACQUIRED, and also when the record was written
//! after it started, so it never mixes versions from before and after the
//! other transaction's changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tagcache_core::{
    lock_cache_key, ContextId, IsolationLevel, KeyVersion, LockRecord, LockStatus, TagCacheError,
    TagCacheResult, TagVersion, TaggingConfig, Timestamp,
};
use tagcache_storage::CacheBackend;

use super::{tag_versions_from, TagLock};

/// Lock for REPEATABLE READ.
pub struct RepeatableReadLock {
    backend: Arc<dyn CacheBackend>,
    delay: Duration,
    lock_ttl: Duration,
}

impl RepeatableReadLock {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &TaggingConfig) -> Self {
        Self {
            backend,
            delay: config.delay,
            lock_ttl: config.effective_lock_ttl(),
        }
    }

    async fn write_status(
        &self,
        tag_keys: &[String],
        status: LockStatus,
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        if tag_keys.is_empty() {
            return Ok(());
        }

        let record = LockRecord::new(Utc::now(), status, owner.clone()).to_stored();
        let entries: HashMap<String, Value> = tag_keys
            .iter()
            .map(|key| (lock_cache_key(key), record.clone()))
            .collect();
        self.backend
            .set_many(entries, Some(self.lock_ttl), version)
            .await?;

        tracing::debug!(tags = tag_keys.len(), ?status, owner = %owner, "Lock records written");
        Ok(())
    }

    /// Whether `record` forbids a transaction started at `start` from using the tag.
    fn blocks(&self, record: &LockRecord, start: Timestamp) -> bool {
        let visible_at = chrono::Duration::from_std(self.delay)
            .ok()
            .and_then(|delay| record.timestamp.checked_add_signed(delay));
        match visible_at {
            Some(at) if start <= at => true,
            None => true,
            _ => record.is_acquired(),
        }
    }
}

#[async_trait]
impl TagLock for RepeatableReadLock {
    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    async fn acquire(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.write_status(tag_keys, LockStatus::Acquired, owner, version)
            .await
    }

    async fn release(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.write_status(tag_keys, LockStatus::Released, owner, version)
            .await
    }

    async fn resolve(
        &self,
        tag_keys: &[String],
        transaction_start: Timestamp,
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        if tag_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let lock_keys: Vec<(String, &String)> = tag_keys
            .iter()
            .map(|key| (lock_cache_key(key), key))
            .collect();
        let mut all_keys = tag_keys.to_vec();
        all_keys.extend(lock_keys.iter().map(|(lock_key, _)| lock_key.clone()));

        let found = self.backend.get_many(&all_keys, version).await?;

        for (lock_key, tag_key) in &lock_keys {
            // Malformed records are ignored
            let Some(record) = found.get(lock_key).and_then(LockRecord::from_stored) else {
                continue;
            };
            if &record.owner == owner {
                continue;
            }
            if self.blocks(&record, transaction_start) {
                tracing::debug!(
                    tag_key = %tag_key,
                    lock_owner = %record.owner,
                    status = ?record.status,
                    "Tag locked by concurrent transaction"
                );
                return Err(TagCacheError::TagLocked {
                    tag_key: (*tag_key).clone(),
                });
            }
        }

        Ok(tag_versions_from(found, tag_keys))
    }
}

/// Lock for SERIALIZABLE. Enforces the REPEATABLE READ protocol.
pub struct SerializableLock {
    inner: RepeatableReadLock,
}

impl SerializableLock {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &TaggingConfig) -> Self {
        Self {
            inner: RepeatableReadLock::new(backend, config),
        }
    }
}

#[async_trait]
impl TagLock for SerializableLock {
    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    async fn acquire(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.inner.acquire(tag_keys, owner, version).await
    }

    async fn release(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.inner.release(tag_keys, owner, version).await
    }

    async fn resolve(
        &self,
        tag_keys: &[String],
        transaction_start: Timestamp,
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        self.inner
            .resolve(tag_keys, transaction_start, owner, version)
            .await
    }
}
