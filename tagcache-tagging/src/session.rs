//! Per-context cache session: the get/set/invalidate surface.
//!
//! # Entries
//!
//! A tagged write stores `{tag_versions, value}` under the entry name, where
//! `tag_versions` maps every tag of the entry to the tag's version at write
//! time. A read is a hit only while every tag still resolves to exactly the
//! recorded version; invalidating a tag deletes its version, so all entries
//! that recorded it turn into misses on their next read.
//!
//! # Fragments
//!
//! Reads (except [`CacheSession::get_final`]) begin a fragment for the entry
//! name. Until the entry is written or aborted, every entry read or written
//! inside it adds its tags to it, so an outer entry is invalidated by any tag
//! of the entries it was built from.
//!
//! # Transactions
//!
//! Invalidations and newly allocated tag versions are recorded in the open
//! transaction scopes and released through the isolation lock when the root
//! transaction finishes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tagcache_core::{
    generate_tag_version, tag_cache_key, ContextId, KeyVersion, StorageError, TagCacheResult,
    TaggedEntry,
};

use crate::cache::TagCache;
use crate::fragment::FragmentTree;
use crate::transaction::{ScopeKind, TransactionManager};

/// Empty tag list, for writes that only carry tags collected from fragments.
pub const NO_TAGS: [&str; 0] = [];

/// Result of a tagged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The entry was written.
    Stored,
    /// A concurrent transaction holds one of the tags; nothing was written.
    Skipped,
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored)
    }
}

/// State of one execution context: its fragment tree and transaction stack.
///
/// A session is not shared between tasks. Call [`CacheSession::close`] when
/// the unit of work ends so open transactions release their tags.
pub struct CacheSession {
    cache: TagCache,
    context: ContextId,
    fragments: FragmentTree,
    transactions: TransactionManager,
}

impl CacheSession {
    pub(crate) fn new(cache: TagCache, context: ContextId) -> Self {
        let transactions = TransactionManager::new(Arc::clone(cache.lock()), context.clone());
        Self {
            cache,
            context,
            fragments: FragmentTree::new(),
            transactions,
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read an entry, tracking it as a fragment of whatever is being produced.
    ///
    /// Returns `None` on a miss, including when any tag was invalidated since
    /// the entry was written. Values written with [`CacheSession::set_raw`]
    /// are returned as-is.
    pub async fn get<T: DeserializeOwned>(
        &mut self,
        name: &str,
        version: KeyVersion,
    ) -> TagCacheResult<Option<T>> {
        let value = self.lookup(name, version, true).await?;
        value.map(|v| decode(name, v)).transpose()
    }

    /// Read an entry without beginning a fragment for it.
    pub async fn get_final<T: DeserializeOwned>(
        &mut self,
        name: &str,
        version: KeyVersion,
    ) -> TagCacheResult<Option<T>> {
        let value = self.lookup(name, version, false).await?;
        value.map(|v| decode(name, v)).transpose()
    }

    /// Read an entry, falling back to `default` on a miss.
    pub async fn get_or<T: DeserializeOwned>(
        &mut self,
        name: &str,
        default: T,
        version: KeyVersion,
    ) -> TagCacheResult<T> {
        Ok(self.get(name, version).await?.unwrap_or(default))
    }

    /// Read an entry, or produce and store it on a miss.
    ///
    /// `produce` receives this session, so entries it reads or writes become
    /// fragments of `name`. If it fails, the fragment is aborted and the
    /// error returned.
    pub async fn get_or_set_with<T, I, F>(
        &mut self,
        name: &str,
        tags: I,
        ttl: Option<Duration>,
        version: KeyVersion,
        produce: F,
    ) -> TagCacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        I: IntoIterator,
        I::Item: AsRef<str>,
        F: for<'s> FnOnce(&'s mut CacheSession) -> BoxFuture<'s, TagCacheResult<T>>,
    {
        let tags = collect_tags(tags);
        if let Some(value) = self.get(name, version).await? {
            return Ok(value);
        }

        let value = match produce(&mut *self).await {
            Ok(value) => value,
            Err(e) => {
                self.abort(name);
                return Err(e);
            }
        };
        self.set(name, &value, &tags, ttl, version).await?;
        Ok(value)
    }

    async fn lookup(
        &mut self,
        name: &str,
        version: KeyVersion,
        track: bool,
    ) -> TagCacheResult<Option<Value>> {
        if track {
            self.fragments.begin(name);
        }

        let stored = match self.cache.backend().get(name, version).await {
            Ok(None | Some(Value::Null)) => return Ok(None),
            Ok(Some(stored)) => stored,
            Err(e) => {
                self.fragments.pop(name);
                return Err(e);
            }
        };

        let Some(entry) = TaggedEntry::from_stored(&stored) else {
            self.fragments.pop(name);
            return Ok(Some(stored));
        };

        let current = match self.versions_current(&entry, version).await {
            Ok(current) => current,
            Err(e) => {
                self.fragments.pop(name);
                return Err(e);
            }
        };
        if !current {
            tracing::trace!(entry = name, "Stale tag versions; miss");
            return Ok(None);
        }

        self.fragments
            .finish(name, entry.tag_versions.keys(), version);
        Ok(Some(entry.value))
    }

    /// Whether every tag of `entry` still resolves to the recorded version.
    async fn versions_current(&self, entry: &TaggedEntry, version: KeyVersion) -> TagCacheResult<bool> {
        if entry.tag_versions.is_empty() {
            return Ok(true);
        }

        let expected: Vec<(String, &str)> = entry
            .tag_versions
            .iter()
            .map(|(tag, token)| (tag_cache_key(tag), token.as_str()))
            .collect();
        let keys: Vec<String> = expected.iter().map(|(key, _)| key.clone()).collect();
        let current = self.cache.backend().get_many(&keys, version).await?;

        Ok(expected.iter().all(|(key, token)| {
            matches!(current.get(key), Some(Value::String(found)) if found == token)
        }))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write a tagged entry.
    ///
    /// The entry carries `tags` plus every tag collected from fragments
    /// produced inside it. Tags without a current version get a new one. With
    /// no tags at all the value is written as-is.
    ///
    /// Returns [`SetOutcome::Skipped`] when the isolation lock reports a
    /// concurrent transaction on one of the tags. The fragment for `name` is
    /// finished whatever the outcome.
    pub async fn set<T, I>(
        &mut self,
        name: &str,
        value: &T,
        tags: I,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<SetOutcome>
    where
        T: Serialize + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut all_tags = collect_tags(tags);
        all_tags.extend(self.fragments.tags_of(name, version));

        let result = match encode(name, value) {
            Ok(value) => self.store(name, value, &all_tags, ttl, version).await,
            Err(e) => Err(e),
        };

        self.fragments.finish(name, &all_tags, version);
        result
    }

    /// Write a value without tags, bypassing tag resolution entirely.
    ///
    /// Ends any fragment begun for `name` without contributing tags.
    pub async fn set_raw<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        let result = match encode(name, value) {
            Ok(value) => self.cache.backend().set(name, value, ttl, version).await,
            Err(e) => Err(e),
        };
        self.fragments.pop(name);
        result
    }

    async fn store(
        &mut self,
        name: &str,
        value: Value,
        tags: &BTreeSet<String>,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<SetOutcome> {
        let backend = Arc::clone(self.cache.backend());
        if tags.is_empty() {
            backend.set(name, value, ttl, version).await?;
            return Ok(SetOutcome::Stored);
        }

        let keyed: Vec<(&String, String)> = tags.iter().map(|tag| (tag, tag_cache_key(tag))).collect();
        let tag_keys: Vec<String> = keyed.iter().map(|(_, key)| key.clone()).collect();

        let current = match self.transactions.resolve(&tag_keys, version).await {
            Ok(current) => current,
            Err(e) if e.is_tag_locked() => {
                tracing::debug!(entry = name, error = %e, "Entry not cached");
                return Ok(SetOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let mut tag_versions = BTreeMap::new();
        let mut allocated = HashMap::new();
        for (tag, key) in keyed {
            let token = if let Some(token) = current.get(&key) {
                token.clone()
            } else {
                let token = generate_tag_version(&self.context);
                allocated.insert(key, Value::String(token.as_str().to_string()));
                token
            };
            tag_versions.insert(tag.clone(), token);
        }

        if !allocated.is_empty() {
            let allocated_keys: Vec<String> = allocated.keys().cloned().collect();
            self.transactions
                .add_dependency(&allocated_keys, version)
                .await?;
            backend
                .set_many(allocated, Some(self.cache.config().tag_ttl), version)
                .await?;
            tracing::debug!(entry = name, allocated = allocated_keys.len(), "Allocated tag versions");
        }

        let entry = TaggedEntry::new(tag_versions, value);
        backend.set(name, entry.into_stored(), ttl, version).await?;
        Ok(SetOutcome::Stored)
    }

    /// Invalidate every entry carrying any of `tags`.
    ///
    /// The tags' versions are deleted and the tags recorded in the open
    /// transaction scopes. Invalidating a tag that has no version is a no-op.
    pub async fn invalidate_tags<I>(&mut self, tags: I, version: KeyVersion) -> TagCacheResult<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let tag_keys: Vec<String> = collect_tags(tags)
            .iter()
            .map(|tag| tag_cache_key(tag))
            .collect();
        if tag_keys.is_empty() {
            return Ok(());
        }

        self.transactions.add_dependency(&tag_keys, version).await?;
        self.cache.backend().delete_many(&tag_keys, version).await?;
        tracing::debug!(tags = tag_keys.len(), ?version, "Invalidated tags");
        Ok(())
    }

    // ========================================================================
    // FRAGMENTS AND LIFECYCLE
    // ========================================================================

    /// Stop producing `name` without contributing its tags anywhere.
    pub fn abort(&mut self, name: &str) {
        self.fragments.pop(name);
    }

    /// End the unit of work: finish every open transaction and drop all fragments.
    pub async fn close(&mut self) -> TagCacheResult<()> {
        let result = self.transactions.flush().await;
        self.fragments.clear();
        result
    }

    /// Open a transaction, or a savepoint inside the open one.
    pub fn begin_transaction(&mut self) -> ScopeKind {
        self.transactions.begin()
    }

    /// Close the innermost scope; closing the root releases its tags.
    pub async fn finish_transaction(&mut self) -> TagCacheResult<Option<ScopeKind>> {
        self.transactions.finish().await
    }

    /// Close every open scope.
    pub async fn flush_transactions(&mut self) -> TagCacheResult<()> {
        self.transactions.flush().await
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn fragments(&self) -> &FragmentTree {
        &self.fragments
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        if self.transactions.is_active() {
            tracing::warn!(
                context = %self.context,
                depth = self.transactions.depth(),
                "Session dropped with open transactions; tags not released"
            );
        }
    }
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession")
            .field("context", &self.context)
            .field("fragments", &self.fragments)
            .field("transactions", &self.transactions)
            .finish()
    }
}

fn collect_tags<I>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    tags.into_iter().map(|tag| tag.as_ref().to_string()).collect()
}

fn encode<T: Serialize + ?Sized>(name: &str, value: &T) -> TagCacheResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        StorageError::Serialization {
            key: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode<T: DeserializeOwned>(name: &str, value: Value) -> TagCacheResult<T> {
    serde_json::from_value(value).map_err(|e| {
        StorageError::Deserialization {
            key: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use serde_json::json;
    use tagcache_core::{IsolationLevel, TaggingConfig};
    use tagcache_storage::{CacheBackend, InMemoryBackend};

    fn session() -> (CacheSession, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = TagCache::with_scheduler(
            backend.clone(),
            TaggingConfig::new().with_isolation_level(IsolationLevel::ReadCommitted),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        (cache.session(), backend)
    }

    #[tokio::test]
    async fn test_stored_shape() {
        let (mut s, backend) = session();
        s.set("n1", "v1", ["tag1"], None, None).await.unwrap();

        let stored = backend.get("n1", None).await.unwrap().unwrap();
        assert_eq!(stored["value"], json!("v1"));
        assert!(stored["tag_versions"]["tag1"].is_string());

        let token = stored["tag_versions"]["tag1"].as_str().unwrap().to_string();
        let tag_key = tag_cache_key("tag1");
        assert_eq!(backend.get(&tag_key, None).await.unwrap(), Some(json!(token)));
    }

    #[tokio::test]
    async fn test_no_tags_writes_value_as_is() {
        let (mut s, backend) = session();
        s.set("plain", &json!({"a": 1}), NO_TAGS, None, None).await.unwrap();

        assert_eq!(backend.get("plain", None).await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(s.get::<Value>("plain", None).await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_existing_tag_version_is_reused() {
        let (mut s, backend) = session();
        s.set("a", &1, ["shared"], None, None).await.unwrap();
        s.set("b", &2, ["shared"], None, None).await.unwrap();

        let a = backend.get("a", None).await.unwrap().unwrap();
        let b = backend.get("b", None).await.unwrap().unwrap();
        assert_eq!(a["tag_versions"]["shared"], b["tag_versions"]["shared"]);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_deserialization_error() {
        let (mut s, _backend) = session();
        s.set("n", "text", ["t"], None, None).await.unwrap();

        let result = s.get::<u32>("n", None).await;
        assert!(matches!(
            result,
            Err(tagcache_core::TagCacheError::Storage(StorageError::Deserialization { .. }))
        ));
    }

    #[tokio::test]
    async fn test_raw_null_is_a_miss() {
        let (mut s, _backend) = session();
        s.set_raw("n", &Value::Null, None, None).await.unwrap();
        assert_eq!(s.get::<Value>("n", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_final_does_not_track() {
        let (mut s, _backend) = session();
        let _: Option<Value> = s.get_final("n", None).await.unwrap();
        assert!(s.fragments().is_empty());

        let _: Option<Value> = s.get("n", None).await.unwrap();
        assert_eq!(s.fragments().current(), Some("n"));
    }

    #[tokio::test]
    async fn test_hit_finishes_fragment() {
        let (mut s, _backend) = session();
        s.set("n", &1, ["t"], None, None).await.unwrap();

        assert_eq!(s.get::<i32>("n", None).await.unwrap(), Some(1));
        assert!(s.fragments().is_empty());
    }

    #[tokio::test]
    async fn test_abort_drops_fragment() {
        let (mut s, _backend) = session();
        let _: Option<Value> = s.get("outer", None).await.unwrap();
        s.abort("outer");
        assert!(s.fragments().is_empty());
        assert_eq!(s.fragments().current(), None);
    }

    #[tokio::test]
    async fn test_close_flushes_and_clears() {
        let (mut s, _backend) = session();
        s.begin_transaction();
        s.begin_transaction();
        let _: Option<Value> = s.get("outer", None).await.unwrap();

        s.close().await.unwrap();
        assert!(!s.transactions().is_active());
        assert!(s.fragments().is_empty());
    }
}
