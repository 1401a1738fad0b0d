//! Entity snapshot model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::{normalize_text_option, unix_millis_now};

/// Last-known copy of a server entity (ticket, purchase), keyed by
/// `(entity_type, id)`.
///
/// Always replaced wholesale, never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity identifier, unique within its entity type
    pub id: String,
    /// Entity collection, e.g. `tickets` or `purchases`
    pub entity_type: String,
    /// Full entity body as last seen
    pub data: Value,
    /// When the snapshot was written locally (Unix ms)
    pub stored_at: i64,
}

impl EntitySnapshot {
    /// Create a snapshot stamped with the current time.
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>, data: Value) -> Result<Self> {
        let id = normalize_text_option(Some(id.into()))
            .ok_or_else(|| Error::InvalidInput("snapshot id cannot be empty".into()))?;
        let entity_type = normalize_text_option(Some(entity_type.into()))
            .ok_or_else(|| Error::InvalidInput("snapshot entity type cannot be empty".into()))?;

        Ok(Self {
            id,
            entity_type,
            data,
            stored_at: unix_millis_now(),
        })
    }

    /// Restamp with a caller-supplied time (Unix ms)
    #[must_use]
    pub const fn with_stored_at(mut self, stored_at: i64) -> Self {
        self.stored_at = stored_at;
        self
    }

    /// Queue resource key of the entity this snapshot caches
    pub fn resource_key(&self) -> String {
        entity_resource_key(&self.entity_type, &self.id)
    }
}

/// Resource key for an entity: `{entity_type}/{id}`, so equal ids of
/// different types never order against each other
pub fn entity_resource_key(entity_type: &str, id: &str) -> String {
    format!("{}/{}", entity_type.trim(), id.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_new_trims_identity() {
        let snapshot = EntitySnapshot::new(" t-1 ", "tickets", json!({ "status": "open" })).unwrap();
        assert_eq!(snapshot.id, "t-1");
        assert_eq!(snapshot.entity_type, "tickets");
        assert!(snapshot.stored_at > 0);
    }

    #[test]
    fn test_snapshot_rejects_blank_id() {
        assert!(EntitySnapshot::new("  ", "tickets", json!({})).is_err());
        assert!(EntitySnapshot::new("t-1", "", json!({})).is_err());
    }

    #[test]
    fn test_snapshot_restamp_and_resource_key() {
        let snapshot = EntitySnapshot::new("42", "tickets", json!({}))
            .unwrap()
            .with_stored_at(1_000);
        assert_eq!(snapshot.stored_at, 1_000);
        assert_eq!(snapshot.resource_key(), "tickets/42");
        assert_ne!(
            snapshot.resource_key(),
            entity_resource_key("purchases", "42")
        );
    }
}
