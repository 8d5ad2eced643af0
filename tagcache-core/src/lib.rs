//! TAGCACHE Core - Shared Types
//!
//! Errors, configuration, execution-context identity and the tag version
//! store primitives. No I/O lives here; every other crate depends on this one.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod tag;

pub use config::{
    IsolationLevel, IsolationLevelParseError, TaggingConfig, BASE_LOCK_TTL, DEFAULT_TAG_TTL,
};
pub use error::{ConfigError, StorageError, TagCacheError, TagCacheResult};
pub use identity::{hostname, ContextId};
pub use record::{LockRecord, LockStatus, TaggedEntry};
pub use tag::{
    generate_tag_version, lock_cache_key, tag_cache_key, TagVersion, LOCK_KEY_PREFIX,
    TAG_KEY_FORMAT,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Logical namespace generation passed through to the backend.
///
/// `None` selects the backend's default version. Orthogonal to tag versions.
pub type KeyVersion = Option<u32>;
