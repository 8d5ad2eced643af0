//! Backend adapters.
//!
//! The tagging layer only ever talks to a [`CacheBackend`]: a key-value store
//! with TTL, batch operations and namespace versions. This module provides the
//! trait plus two adapters.
//!
//! - [`InMemoryBackend`]: process-local, lazy expiry. Used by tests.
//! - [`LmdbBackend`]: memory-mapped LMDB store shared by every process on
//!   one host.
//!
//! Keys are qualified with [`KeyNamespace`] so that bumping the namespace
//! version orphans everything written under the previous one.

pub mod lmdb_backend;
pub mod memory;
pub mod namespaced_key;
pub mod traits;

pub use lmdb_backend::{LmdbBackend, LmdbBackendError};
pub use memory::InMemoryBackend;
pub use namespaced_key::{KeyNamespace, NamespacedKey, MEMCACHE_MAX_KEY_LENGTH};
pub use traits::{CacheBackend, CacheStats};
