//! Shared tag cache handle.

use std::sync::Arc;

use tagcache_core::{ContextId, IsolationLevel, TagCacheResult, TaggingConfig};
use tagcache_storage::CacheBackend;

use crate::lock::{make_lock, TagLock};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::session::CacheSession;

/// Tag-invalidation layer over a [`CacheBackend`].
///
/// Cheap to clone and safe to share. All per-context state lives in the
/// [`CacheSession`]s it opens, one per unit of work (request, job, task).
///
/// # Example
///
/// ```ignore
/// let cache = TagCache::new(Arc::new(InMemoryBackend::new()), TaggingConfig::default())?;
/// let mut session = cache.session();
///
/// session.set("article:1", &article, ["Article.pk:1"], None, None).await?;
/// let hit: Option<Article> = session.get("article:1", None).await?;
///
/// session.invalidate_tags(["Article.pk:1"], None).await?;
/// ```
#[derive(Clone)]
pub struct TagCache {
    backend: Arc<dyn CacheBackend>,
    lock: Arc<dyn TagLock>,
    config: Arc<TaggingConfig>,
}

impl TagCache {
    /// Create a cache whose delayed releases run on the ambient tokio runtime.
    pub fn new(backend: Arc<dyn CacheBackend>, config: TaggingConfig) -> TagCacheResult<Self> {
        Self::with_scheduler(backend, config, Arc::new(TokioScheduler))
    }

    /// Create a cache with an explicit scheduler for delayed releases.
    pub fn with_scheduler(
        backend: Arc<dyn CacheBackend>,
        config: TaggingConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> TagCacheResult<Self> {
        config.validate()?;
        let lock = make_lock(Arc::clone(&backend), &config, scheduler);
        tracing::debug!(
            isolation_level = %config.isolation_level,
            delay_ms = config.delay.as_millis() as u64,
            "Tag cache created"
        );
        Ok(Self {
            backend,
            lock,
            config: Arc::new(config),
        })
    }

    /// Create a cache configured from `TAGCACHE_*` environment variables.
    pub fn from_env(backend: Arc<dyn CacheBackend>) -> TagCacheResult<Self> {
        Self::new(backend, TaggingConfig::from_env()?)
    }

    /// Open a session with a freshly generated execution-context id.
    pub fn session(&self) -> CacheSession {
        self.session_with_context(ContextId::generate())
    }

    /// Open a session with a caller-chosen execution-context id.
    ///
    /// Two live sessions must never share an id.
    pub fn session_with_context(&self, context: ContextId) -> CacheSession {
        CacheSession::new(self.clone(), context)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn config(&self) -> &TaggingConfig {
        &self.config
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.config.isolation_level
    }

    pub(crate) fn lock(&self) -> &Arc<dyn TagLock> {
        &self.lock
    }
}

impl std::fmt::Debug for TagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
