//! TAGCACHE Storage - Backend Trait and Adapters
//!
//! Defines the key-value contract consumed by the tagging layer together with
//! an in-memory adapter and an LMDB adapter.

pub mod cache;

pub use cache::{
    CacheBackend, CacheStats, InMemoryBackend, KeyNamespace, LmdbBackend, LmdbBackendError,
    NamespacedKey, MEMCACHE_MAX_KEY_LENGTH,
};
