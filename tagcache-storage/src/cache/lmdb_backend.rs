//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store shared by every process on one host.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes little-endian millis][json value]`, where
//! `i64::MAX` marks an entry that never expires. Expired entries are skipped
//! on read and removed by [`LmdbBackend::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `get_many`
//! - Write transactions for `set`, `set_many`, `delete_many` and purging
//! - Statistics are tracked behind a `RwLock`

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use serde_json::Value;
use tagcache_core::{KeyVersion, StorageError, TagCacheResult};

use super::namespaced_key::KeyNamespace;
use super::traits::{CacheBackend, CacheStats};

/// Expiry marker for entries without a TTL.
const NEVER_EXPIRES: i64 = i64::MAX;

/// Length of the expiry header.
const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbBackendError> for StorageError {
    fn from(e: LmdbBackendError) -> Self {
        StorageError::Backend {
            operation: "lmdb".to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<LmdbBackendError> for tagcache_core::TagCacheError {
    fn from(e: LmdbBackendError) -> Self {
        StorageError::from(e).into()
    }
}

fn txn_error(e: heed::Error) -> LmdbBackendError {
    LmdbBackendError::Transaction(e.to_string())
}

/// LMDB-backed cache backend.
///
/// # Example
///
/// ```ignore
/// use tagcache_storage::{CacheBackend, KeyNamespace, LmdbBackend};
///
/// let backend = LmdbBackend::new("/tmp/tagcache", 100, KeyNamespace::new("site", 1))?;
/// backend.set("greeting", json!("hello"), Some(Duration::from_secs(60)), None).await?;
/// ```
pub struct LmdbBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    namespace: KeyNamespace,
    stats: RwLock<CacheStats>,
}

impl LmdbBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `namespace` - Key prefix and default version
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        namespace: KeyNamespace,
    ) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            namespace,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> TagCacheResult<u64> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let iter = self.db.iter(&rtxn).map_err(txn_error)?;
            iter.filter_map(|result| result.ok())
                .filter(|(_, bytes)| decode_expiry(bytes).is_some_and(|at| now >= at))
                .map(|(key, _)| key.to_vec())
                .collect()
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut purged = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                purged += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        self.record(|stats| stats.evictions += purged);
        tracing::debug!(purged, "Purged expired LMDB cache entries");
        Ok(purged)
    }

    fn encoded_key(&self, key: &str, version: KeyVersion) -> String {
        self.namespace.make_key(key, version).encode()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Read one live value inside an open read transaction.
    fn read_live(&self, rtxn: &RoTxn<'_>, encoded_key: &str, now: i64) -> TagCacheResult<Option<Value>> {
        let bytes = match self.db.get(rtxn, encoded_key.as_bytes()).map_err(txn_error)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match decode_expiry(bytes) {
            Some(at) if now < at => {
                let value = serde_json::from_slice(&bytes[HEADER_LEN..]).map_err(|e| {
                    StorageError::Deserialization {
                        key: encoded_key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
            // Expired or truncated
            _ => Ok(None),
        }
    }

    fn encode_value(key: &str, value: &Value, ttl: Option<Duration>) -> TagCacheResult<Vec<u8>> {
        let expires_at = match ttl {
            None => NEVER_EXPIRES,
            Some(ttl) => {
                let millis = i64::try_from(ttl.as_millis()).unwrap_or(NEVER_EXPIRES);
                Utc::now().timestamp_millis().saturating_add(millis)
            }
        };
        let json = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    fn write_all(&self, entries: Vec<(String, Vec<u8>)>) -> TagCacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for (key, bytes) in &entries {
            self.db
                .put(&mut wtxn, key.as_bytes(), bytes)
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}

fn decode_expiry(bytes: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

#[async_trait]
impl CacheBackend for LmdbBackend {
    async fn get(&self, key: &str, version: KeyVersion) -> TagCacheResult<Option<Value>> {
        let encoded = self.encoded_key(key, version);
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self.read_live(&rtxn, &encoded, Utc::now().timestamp_millis())?;
        drop(rtxn);

        if value.is_some() {
            self.record(|stats| stats.hits += 1);
        } else {
            self.record(|stats| stats.misses += 1);
        }
        Ok(value)
    }

    async fn get_many(
        &self,
        keys: &[String],
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, Value>> {
        let now = Utc::now().timestamp_millis();
        let mut found = HashMap::with_capacity(keys.len());
        {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            for key in keys {
                let encoded = self.encoded_key(key, version);
                if let Some(value) = self.read_live(&rtxn, &encoded, now)? {
                    found.insert(key.clone(), value);
                }
            }
        }

        let hits = found.len() as u64;
        let misses = keys.len() as u64 - hits;
        self.record(|stats| {
            stats.hits += hits;
            stats.misses += misses;
        });
        Ok(found)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        let encoded = self.encoded_key(key, version);
        let bytes = Self::encode_value(&encoded, &value, ttl)?;
        self.write_all(vec![(encoded, bytes)])
    }

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        version: KeyVersion,
    ) -> TagCacheResult<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| {
                let encoded = self.encoded_key(key, version);
                let bytes = Self::encode_value(&encoded, value, ttl)?;
                Ok((encoded, bytes))
            })
            .collect::<TagCacheResult<Vec<_>>>()?;
        self.write_all(encoded)
    }

    async fn delete(&self, key: &str, version: KeyVersion) -> TagCacheResult<()> {
        self.delete_many(&[key.to_string()], version).await
    }

    async fn delete_many(&self, keys: &[String], version: KeyVersion) -> TagCacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for key in keys {
            let encoded = self.encoded_key(key, version);
            self.db
                .delete(&mut wtxn, encoded.as_bytes())
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn stats(&self) -> TagCacheResult<CacheStats> {
        let entry_count = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            self.db.len(&rtxn).map_err(txn_error)?
        };
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}
