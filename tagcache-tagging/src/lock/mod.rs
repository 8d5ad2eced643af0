//! Isolation locks
//!
//! One strategy per isolation level governs how tag versions are resolved
//! while a transaction is open and what happens to its tags when it ends.
//!
//! | Level            | acquire            | release                        | resolve                     |
//! |------------------|--------------------|--------------------------------|-----------------------------|
//! | READ UNCOMMITTED | no-op              | delayed delete (if delay > 0)  | batch read                  |
//! | READ COMMITTED   | no-op              | delete now + delayed delete    | batch read                  |
//! | REPEATABLE READ  | write ACQUIRED     | write RELEASED                 | batch read + lock check     |
//! | SERIALIZABLE     | same as REPEATABLE READ                                                            |
//!
//! Every method takes derived tag keys (see [`tagcache_core::tag_cache_key`]),
//! never raw tag names.

mod read_committed;
mod repeatable_read;

pub use read_committed::{ReadCommittedLock, ReadUncommittedLock};
pub use repeatable_read::{RepeatableReadLock, SerializableLock};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tagcache_core::{
    ContextId, IsolationLevel, KeyVersion, TagCacheResult, TagVersion, TaggingConfig, Timestamp,
};
use tagcache_storage::CacheBackend;

use crate::scheduler::Scheduler;

/// Isolation strategy bound to one backend.
#[async_trait]
pub trait TagLock: Send + Sync {
    /// Level this lock enforces.
    fn isolation_level(&self) -> IsolationLevel;

    /// Mark tags as touched by the transaction owned by `owner`.
    async fn acquire(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()>;

    /// Release tags when the owning transaction ends.
    async fn release(
        &self,
        tag_keys: &[String],
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<()>;

    /// Fetch the current version of each tag key.
    ///
    /// Tags without a version are missing from the result.
    ///
    /// # Errors
    ///
    /// `TagCacheError::TagLocked` when a concurrent transaction holds one of
    /// the tags, or released it after `transaction_start`.
    async fn resolve(
        &self,
        tag_keys: &[String],
        transaction_start: Timestamp,
        owner: &ContextId,
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>>;
}

/// Build the lock for the configured isolation level.
pub fn make_lock(
    backend: Arc<dyn CacheBackend>,
    config: &TaggingConfig,
    scheduler: Arc<dyn Scheduler>,
) -> Arc<dyn TagLock> {
    match config.isolation_level {
        IsolationLevel::ReadUncommitted => {
            Arc::new(ReadUncommittedLock::new(backend, config.delay, scheduler))
        }
        IsolationLevel::ReadCommitted => {
            Arc::new(ReadCommittedLock::new(backend, config.delay, scheduler))
        }
        IsolationLevel::RepeatableRead => Arc::new(RepeatableReadLock::new(backend, config)),
        IsolationLevel::Serializable => Arc::new(SerializableLock::new(backend, config)),
    }
}

/// Keep the string-valued tokens among `found`; anything else counts as absent.
fn tag_versions_from(
    found: HashMap<String, Value>,
    tag_keys: &[String],
) -> HashMap<String, TagVersion> {
    tag_keys
        .iter()
        .filter_map(|key| match found.get(key) {
            Some(Value::String(token)) => Some((key.clone(), TagVersion::new(token.clone()))),
            _ => None,
        })
        .collect()
}
