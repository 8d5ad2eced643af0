//! Shared setup for tagging integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tagcache_tagging::{
    CacheBackend, CacheSession, IsolationLevel, ManualScheduler, TagCache, TaggingConfig,
};
use tagcache_test_utils::{fixtures, init_tracing};

/// A cache over a fresh in-memory backend whose delayed releases wait for the test.
pub struct Harness {
    pub cache: TagCache,
    pub backend: Arc<dyn CacheBackend>,
    pub scheduler: Arc<ManualScheduler>,
}

impl Harness {
    pub fn new(level: IsolationLevel) -> Self {
        Self::with_config(fixtures::config(level))
    }

    pub fn delayed(level: IsolationLevel, delay: Duration) -> Self {
        Self::with_config(fixtures::delayed_config(level, delay))
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: TaggingConfig) -> Self {
        init_tracing();
        let scheduler = Arc::new(ManualScheduler::new());
        let cache = TagCache::with_scheduler(Arc::clone(&backend), config, scheduler.clone())
            .expect("test config is valid");
        Self {
            cache,
            backend,
            scheduler,
        }
    }

    pub fn with_config(config: TaggingConfig) -> Self {
        Self::with_backend(fixtures::memory_backend(), config)
    }

    pub fn session(&self) -> CacheSession {
        self.cache.session()
    }

    pub fn session_named(&self, task: &str) -> CacheSession {
        self.cache.session_with_context(fixtures::context(task))
    }
}
