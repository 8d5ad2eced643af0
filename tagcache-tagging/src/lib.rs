//! TAGCACHE Tagging - Tag-Based Invalidation Layer
//!
//! Associates cached values with tags and invalidates every value carrying a
//! tag with one call, without scanning keys:
//! - Lazy invalidation through per-tag version tokens
//! - Nested fragment caching: outer entries inherit the tags of inner ones
//! - Four isolation levels guarding cache writes during open transactions
//! - Nested transactions (savepoints) per execution context
//!
//! Start from [`TagCache`] and open one [`CacheSession`] per unit of work.

pub mod cache;
pub mod fragment;
pub mod lock;
pub mod scheduler;
pub mod session;
pub mod transaction;

pub use cache::TagCache;
pub use fragment::{FragmentNode, FragmentTree};
pub use lock::{
    make_lock, ReadCommittedLock, ReadUncommittedLock, RepeatableReadLock, SerializableLock,
    TagLock,
};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
pub use session::{CacheSession, SetOutcome, NO_TAGS};
pub use transaction::{ScopeKind, TransactionManager};

// Re-export the types callers need alongside the facade
pub use tagcache_core::{
    ContextId, IsolationLevel, KeyVersion, TagCacheError, TagCacheResult, TaggingConfig,
};
pub use tagcache_storage::{CacheBackend, InMemoryBackend, LmdbBackend};
