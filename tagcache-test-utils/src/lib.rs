//! TAGCACHE Test Utilities
//!
//! Centralized test infrastructure for the tagcache workspace:
//! - Proptest generators for tags, cache names and payloads
//! - Instrumented backend wrappers (call counting, injected failures)
//! - Test fixtures for common scenarios
//! - Custom assertions for tagcache-specific validation

pub use tagcache_core::{
    ContextId, IsolationLevel, StorageError, TagCacheError, TagCacheResult, TaggingConfig,
};
pub use tagcache_storage::{CacheBackend, CacheStats, InMemoryBackend, KeyNamespace};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tagcache_core::KeyVersion;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `debug` for `tagcache_tagging` and
/// `tagcache_storage`, `info` elsewhere. Safe to call from every
/// test; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tagcache_tagging=debug,tagcache_storage=debug,info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// INSTRUMENTED BACKENDS
// ============================================================================

/// Backend operations tracked by [`CountingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Get,
    GetMany,
    Set,
    SetMany,
    Delete,
    DeleteMany,
}

#[derive(Debug, Default)]
struct OpCounters {
    get: AtomicU64,
    get_many: AtomicU64,
    set: AtomicU64,
    set_many: AtomicU64,
    delete: AtomicU64,
    delete_many: AtomicU64,
}

impl OpCounters {
    fn counter(&self, op: BackendOp) -> &AtomicU64 {
        match op {
            BackendOp::Get => &self.get,
            BackendOp::GetMany => &self.get_many,
            BackendOp::Set => &self.set,
            BackendOp::SetMany => &self.set_many,
            BackendOp::Delete => &self.delete,
            BackendOp::DeleteMany => &self.delete_many,
        }
    }
}

/// Backend wrapper that counts calls and can be switched into failing mode.
///
/// While failing, every operation returns [`StorageError::Backend`] without
/// reaching the wrapped backend. Calls are counted either way.
pub struct CountingBackend {
    inner: Arc<dyn CacheBackend>,
    counters: OpCounters,
    failing: AtomicBool,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner,
            counters: OpCounters::default(),
            failing: AtomicBool::new(false),
        }
    }

    /// Wrap a fresh [`InMemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Number of times `op` was invoked.
    pub fn calls(&self, op: BackendOp) -> u64 {
        self.counters.counter(op).load(Ordering::SeqCst)
    }

    /// Reset every counter to zero.
    pub fn reset_counts(&self) {
        for op in [
            BackendOp::Get,
            BackendOp::GetMany,
            BackendOp::Set,
            BackendOp::SetMany,
            BackendOp::Delete,
            BackendOp::DeleteMany,
        ] {
            self.counters.counter(op).store(0, Ordering::SeqCst);
        }
    }

    /// Make every subsequent operation fail (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self, op: BackendOp) -> TagCacheResult<()> {
        self.counters.counter(op).fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                operation: format!("{:?}", op),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    async fn get(&self, key: &str, version: KeyVersion) -> TagCacheResult<Option<Value>> {
        self.enter(BackendOp::Get)?;
        self.inner.get(key, version).await
    }

    async fn get_many(
        &self,
        keys: &[String],
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, Value>> {
        self.enter(BackendOp::GetMany)?;
        self.inner.get_many(keys, version).await
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.enter(BackendOp::Set)?;
        self.inner.set(key, value, ttl, version).await
    }

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        self.enter(BackendOp::SetMany)?;
        self.inner.set_many(entries, ttl, version).await
    }

    async fn delete(&self, key: &str, version: KeyVersion) -> TagCacheResult<()> {
        self.enter(BackendOp::Delete)?;
        self.inner.delete(key, version).await
    }

    async fn delete_many(&self, keys: &[String], version: KeyVersion) -> TagCacheResult<()> {
        self.enter(BackendOp::DeleteMany)?;
        self.inner.delete_many(keys, version).await
    }

    async fn stats(&self) -> TagCacheResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tagcache inputs.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Generate a tag name, including characters no backend accepts raw.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}\\.pk:[0-9]{1,4}",
            "[a-zA-Z0-9_ ]{1,24}",
            ".{1,40}",
        ]
    }

    /// Generate a non-empty set of distinct tags.
    pub fn arb_tags(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set(arb_tag(), 1..=max.max(1))
    }

    /// Generate a cache entry name.
    pub fn arb_cache_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.:]{0,31}"
    }

    /// Generate an isolation level.
    pub fn arb_isolation_level() -> impl Strategy<Value = IsolationLevel> {
        prop::sample::select(IsolationLevel::ALL.to_vec())
    }

    /// Generate a JSON payload.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Generate a namespace version, `None` meaning the backend default.
    pub fn arb_key_version() -> impl Strategy<Value = KeyVersion> {
        prop::option::of(1u32..4)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;

    /// Config with the given isolation level and no release delay.
    pub fn config(level: IsolationLevel) -> TaggingConfig {
        TaggingConfig::new().with_isolation_level(level)
    }

    /// Config with the given isolation level and release delay.
    pub fn delayed_config(level: IsolationLevel, delay: Duration) -> TaggingConfig {
        config(level).with_delay(delay)
    }

    /// A fresh in-memory backend behind the trait object the tagging layer takes.
    pub fn memory_backend() -> Arc<dyn CacheBackend> {
        Arc::new(InMemoryBackend::new())
    }

    /// A deterministic execution-context identity.
    pub fn context(task: &str) -> ContextId {
        ContextId::from_parts("testhost", 4242, task)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for tagcache results.

    use super::*;

    /// Assert that a TagCacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TagCacheResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a TagCacheResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        match result {
            Err(TagCacheError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a TagCacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        match result {
            Err(TagCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a TagCacheResult is a TagLocked conflict.
    #[track_caller]
    pub fn assert_tag_locked<T: std::fmt::Debug>(result: &TagCacheResult<T>) {
        match result {
            Err(TagCacheError::TagLocked { .. }) => {}
            other => panic!("Expected TagLocked error, got: {:?}", other),
        }
    }
}
