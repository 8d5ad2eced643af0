//! Error types for tag cache operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend operation {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all tag cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagCacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A concurrent transaction holds or recently released the tag.
    ///
    /// Raised by repeatable-read and serializable locks while resolving tag
    /// versions. The write path treats it as "do not cache".
    #[error("Tag locked by a concurrent transaction: {tag_key}")]
    TagLocked { tag_key: String },
}

impl TagCacheError {
    /// Returns true if this is a `TagLocked` conflict.
    pub fn is_tag_locked(&self) -> bool {
        matches!(self, Self::TagLocked { .. })
    }
}

/// Result type alias for tag cache operations.
pub type TagCacheResult<T> = Result<T, TagCacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_backend() {
        let err = StorageError::Backend {
            operation: "get_many".to_string(),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("get_many"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "isolation_level".to_string(),
            value: "SNAPSHOT".to_string(),
            reason: "unknown level".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Invalid value for isolation_level: SNAPSHOT - unknown level"
        );
    }

    #[test]
    fn test_storage_error_converts_to_master() {
        let err: TagCacheError = StorageError::LockPoisoned.into();
        assert!(matches!(err, TagCacheError::Storage(StorageError::LockPoisoned)));
        assert!(!err.is_tag_locked());
    }

    #[test]
    fn test_tag_locked_is_detected() {
        let err = TagCacheError::TagLocked {
            tag_key: "tag_v1_abc".to_string(),
        };
        assert!(err.is_tag_locked());
        assert!(format!("{}", err).contains("tag_v1_abc"));
    }
}
