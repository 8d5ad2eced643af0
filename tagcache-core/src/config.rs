//! Configuration types

use crate::{ConfigError, TagCacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lifetime of a tag version token in the backend.
pub const DEFAULT_TAG_TTL: Duration = Duration::from_secs(24 * 3600);

/// Base lifetime of a lock record, before the propagation delay is added.
pub const BASE_LOCK_TTL: Duration = Duration::from_secs(5);

// ============================================================================
// ISOLATION LEVEL ENUM (replaces String)
// ============================================================================

/// Transaction isolation level enforced by the tag lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Invalidations are visible immediately; release only schedules replica cleanup.
    ReadUncommitted,
    /// Tags touched by a transaction are invalidated again when it finishes.
    #[default]
    ReadCommitted,
    /// Concurrent invalidations make tags unusable for overlapping transactions.
    RepeatableRead,
    /// Same protocol as `RepeatableRead`.
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first.
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// SQL spelling of the level.
    pub fn as_sql_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Parse from the SQL spelling, snake/kebab case, or the historical
    /// misspellings ("READ UNCOMMITED", "READ COMMITED", "REPEATABLE READS").
    pub fn from_sql_str(s: &str) -> Result<Self, IsolationLevelParseError> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c.to_ascii_lowercase() })
            .collect();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "read uncommitted" | "read uncommited" => Ok(IsolationLevel::ReadUncommitted),
            "read committed" | "read commited" => Ok(IsolationLevel::ReadCommitted),
            "repeatable read" | "repeatable reads" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(IsolationLevelParseError(s.to_string())),
        }
    }

    /// Returns true if this level writes lock records.
    pub fn uses_lock_records(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = IsolationLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_sql_str(s)
    }
}

/// Error when parsing an invalid isolation level string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationLevelParseError(pub String);

impl fmt::Display for IsolationLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid isolation level: {}", self.0)
    }
}

impl std::error::Error for IsolationLevelParseError {}

impl From<IsolationLevelParseError> for ConfigError {
    fn from(e: IsolationLevelParseError) -> Self {
        ConfigError::InvalidValue {
            field: "isolation_level".to_string(),
            value: e.0,
            reason: "expected one of READ UNCOMMITTED, READ COMMITTED, REPEATABLE READ, SERIALIZABLE"
                .to_string(),
        }
    }
}

// ============================================================================
// TAGGING CONFIGURATION
// ============================================================================

/// Configuration for the tagging layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggingConfig {
    /// Isolation level enforced across transactions.
    pub isolation_level: IsolationLevel,

    /// Propagation delay for read replicas. Must cover the worst-case
    /// replication lag of the backend.
    pub delay: Duration,

    /// Lock record lifetime. `None` means 5 seconds plus `delay`.
    pub lock_ttl: Option<Duration>,

    /// Lifetime of tag version tokens.
    pub tag_ttl: Duration,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            delay: Duration::ZERO,
            lock_ttl: None,
            tag_ttl: DEFAULT_TAG_TTL,
        }
    }
}

/// Serialized form accepted by [`TaggingConfig::from_toml_str`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTaggingConfig {
    isolation_level: Option<String>,
    delay_secs: Option<f64>,
    lock_ttl_secs: Option<f64>,
    tag_ttl_secs: Option<f64>,
}

impl TaggingConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the replica propagation delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override the lock record lifetime.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Set the tag version token lifetime.
    pub fn with_tag_ttl(mut self, ttl: Duration) -> Self {
        self.tag_ttl = ttl;
        self
    }

    /// Effective lock record lifetime.
    ///
    /// Saturates at `Duration::MAX`; [`validate`](Self::validate) rejects
    /// delays large enough to reach it.
    pub fn effective_lock_ttl(&self) -> Duration {
        self.lock_ttl
            .unwrap_or_else(|| BASE_LOCK_TTL.checked_add(self.delay).unwrap_or(Duration::MAX))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TagCacheResult<()> {
        if self.tag_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "tag_ttl".to_string(),
                value: "0".to_string(),
                reason: "tag versions must outlive the entries that reference them".to_string(),
            }
            .into());
        }

        if self.lock_ttl.is_none() && BASE_LOCK_TTL.checked_add(self.delay).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "delay".to_string(),
                value: format!("{:?}", self.delay),
                reason: "default lock lifetime would overflow".to_string(),
            }
            .into());
        }

        if let Some(lock_ttl) = self.lock_ttl {
            if lock_ttl <= self.delay {
                return Err(ConfigError::InvalidValue {
                    field: "lock_ttl".to_string(),
                    value: format!("{:?}", lock_ttl),
                    reason: format!("must exceed the propagation delay ({:?})", self.delay),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `TAGCACHE_ISOLATION_LEVEL`: isolation level (default: READ COMMITTED)
    /// - `TAGCACHE_DELAY_SECS`: replica propagation delay, fractional seconds (default: 0)
    /// - `TAGCACHE_LOCK_TTL_SECS`: lock record lifetime (default: 5 + delay)
    /// - `TAGCACHE_TAG_TTL_SECS`: tag version lifetime (default: 86400)
    pub fn from_env() -> TagCacheResult<Self> {
        let raw = RawTaggingConfig {
            isolation_level: std::env::var("TAGCACHE_ISOLATION_LEVEL").ok(),
            delay_secs: parse_env_secs("TAGCACHE_DELAY_SECS")?,
            lock_ttl_secs: parse_env_secs("TAGCACHE_LOCK_TTL_SECS")?,
            tag_ttl_secs: parse_env_secs("TAGCACHE_TAG_TTL_SECS")?,
        };
        Self::from_raw(raw)
    }

    /// Parse a config from a TOML document.
    ///
    /// ```toml
    /// isolation_level = "REPEATABLE READ"
    /// delay_secs = 0.5
    /// tag_ttl_secs = 86400
    /// ```
    pub fn from_toml_str(s: &str) -> TagCacheResult<Self> {
        let raw: RawTaggingConfig = toml::from_str(s).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTaggingConfig) -> TagCacheResult<Self> {
        let defaults = Self::default();
        let isolation_level = match raw.isolation_level {
            Some(s) => s.parse::<IsolationLevel>().map_err(ConfigError::from)?,
            None => defaults.isolation_level,
        };

        let config = Self {
            isolation_level,
            delay: secs_to_duration("delay_secs", raw.delay_secs)?.unwrap_or(defaults.delay),
            lock_ttl: secs_to_duration("lock_ttl_secs", raw.lock_ttl_secs)?,
            tag_ttl: secs_to_duration("tag_ttl_secs", raw.tag_ttl_secs)?
                .unwrap_or(defaults.tag_ttl),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_env_secs(var: &str) -> TagCacheResult<Option<f64>> {
    match std::env::var(var) {
        Ok(s) => s.trim().parse::<f64>().map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                field: var.to_string(),
                value: s.clone(),
                reason: e.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn secs_to_duration(field: &str, secs: Option<f64>) -> TagCacheResult<Option<Duration>> {
    match secs {
        None => Ok(None),
        Some(s) => Duration::try_from_secs_f64(s).map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: s.to_string(),
                reason: format!("must be a finite, non-negative number of seconds ({})", e),
            }
            .into()
        }),
    }
}
