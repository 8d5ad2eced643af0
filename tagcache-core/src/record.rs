//! Records persisted in the backend by the tagging layer.

use crate::{ContextId, TagVersion, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field holding the tag versions of a tagged entry.
const TAG_VERSIONS_FIELD: &str = "tag_versions";

/// Field holding the payload of a tagged entry.
const VALUE_FIELD: &str = "value";

/// A cached value together with the tag versions it was produced against.
///
/// The entry is valid only while every tag still resolves to exactly the
/// recorded version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedEntry {
    pub tag_versions: BTreeMap<String, TagVersion>,
    pub value: Value,
}

impl TaggedEntry {
    pub fn new(tag_versions: BTreeMap<String, TagVersion>, value: Value) -> Self {
        Self {
            tag_versions,
            value,
        }
    }

    /// Interpret a stored value as a tagged entry.
    ///
    /// Returns `None` when the value does not have the `{tag_versions, value}`
    /// shape; such values were written by the raw API and pass through as-is.
    pub fn from_stored(stored: &Value) -> Option<Self> {
        let object = stored.as_object()?;
        if !object.contains_key(TAG_VERSIONS_FIELD) || !object.contains_key(VALUE_FIELD) {
            return None;
        }
        serde_json::from_value(stored.clone()).ok()
    }

    /// Serialize for storage.
    pub fn into_stored(self) -> Value {
        let mut object = serde_json::Map::with_capacity(2);
        let tag_versions = self
            .tag_versions
            .into_iter()
            .map(|(tag, version)| (tag, Value::String(version.as_str().to_string())))
            .collect();
        object.insert(TAG_VERSIONS_FIELD.to_string(), Value::Object(tag_versions));
        object.insert(VALUE_FIELD.to_string(), self.value);
        Value::Object(object)
    }
}

/// Lock record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Acquired,
    Released,
}

/// Per-tag lock record written by repeatable-read and serializable locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// When the status was written.
    pub timestamp: Timestamp,
    pub status: LockStatus,
    /// Execution context that wrote the record.
    pub owner: ContextId,
}

impl LockRecord {
    pub fn new(timestamp: Timestamp, status: LockStatus, owner: ContextId) -> Self {
        Self {
            timestamp,
            status,
            owner,
        }
    }

    /// Parse a stored lock record; malformed records yield `None`.
    pub fn from_stored(stored: &Value) -> Option<Self> {
        serde_json::from_value(stored.clone()).ok()
    }

    /// Serialize for storage.
    pub fn to_stored(&self) -> Value {
        serde_json::json!({
            "timestamp": self.timestamp,
            "status": self.status,
            "owner": self.owner,
        })
    }

    pub fn is_acquired(&self) -> bool {
        self.status == LockStatus::Acquired
    }
}
