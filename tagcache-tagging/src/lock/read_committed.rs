//! READ UNCOMMITTED and READ COMMITTED locks.
//!
//! Neither level writes lock records. Both may re-delete released tag
//! versions after the replica propagation delay, so a replica that lagged
//! behind the invalidation cannot keep serving the old token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tagcache_core::{ContextId, IsolationLevel, KeyVersion, TagCacheResult, TagVersion, Timestamp};
use tagcache_storage::CacheBackend;

use super::{tag_versions_from, TagLock};
use crate::scheduler::Scheduler;

/// Lock for READ UNCOMMITTED.
///
/// Transactions see each other's invalidations immediately; releasing only
/// schedules the delayed re-delete.
pub struct ReadUncommittedLock {
    backend: Arc<dyn CacheBackend>,
    delay: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl ReadUncommittedLock {
    pub fn new(backend: Arc<dyn CacheBackend>, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            backend,
            delay,
            scheduler,
        }
    }

    /// Schedule deletion of `tag_keys` once the propagation delay elapses.
    fn release_delayed(&self, tag_keys: &[String], version: KeyVersion) {
        if self.delay.is_zero() || tag_keys.is_empty() {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let keys = tag_keys.to_vec();
        let delay = self.delay;
        self.scheduler.schedule(
            delay,
            async move {
                match backend.delete_many(&keys, version).await {
                    Ok(()) => {
                        tracing::debug!(tags = keys.len(), ?version, "Delayed tag release applied");
                    }
                    Err(e) => {
                        tracing::warn!(
                            tags = keys.len(),
                            ?version,
                            error = %e,
                            "Delayed tag release failed"
                        );
                    }
                }
            }
            .boxed(),
        );
        tracing::trace!(
            tags = tag_keys.len(),
            delay_ms = delay.as_millis() as u64,
            "Delayed tag release scheduled"
        );
    }

    async fn read(
        &self,
        tag_keys: &[String],
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        if tag_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self.backend.get_many(tag_keys, version).await?;
        Ok(tag_versions_from(found, tag_keys))
    }
}

#[async_trait]
impl TagLock for ReadUncommittedLock {
    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadUncommitted
    }

    async fn acquire(
        &self,
        _tag_keys: &[String],
        _owner: &ContextId,
        _version: KeyVersion,
    ) -> TagCacheResult<()> {
        Ok(())
    }

    async fn release(
        &self,
        tag_keys: &[String],
        _owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.release_delayed(tag_keys, version);
        Ok(())
    }

    async fn resolve(
        &self,
        tag_keys: &[String],
        _transaction_start: Timestamp,
        _owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        self.read(tag_keys, version).await
    }
}

/// Lock for READ COMMITTED, the default level.
///
/// Releasing deletes the tags' versions at once, so every entry produced
/// while the transaction was open is invalidated at its end.
pub struct ReadCommittedLock {
    inner: ReadUncommittedLock,
}

impl ReadCommittedLock {
    pub fn new(backend: Arc<dyn CacheBackend>, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: ReadUncommittedLock::new(backend, delay, scheduler),
        }
    }
}

#[async_trait]
impl TagLock for ReadCommittedLock {
    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
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
        if tag_keys.is_empty() {
            return Ok(());
        }
        self.inner.backend.delete_many(tag_keys, version).await?;
        tracing::debug!(tags = tag_keys.len(), ?version, "Released tags");
        self.inner.release(tag_keys, owner, version).await
    }

    async fn resolve(
        &self,
        tag_keys: &[String],
        _transaction_start: Timestamp,
        _owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        self.inner.read(tag_keys, version).await
    }
}
