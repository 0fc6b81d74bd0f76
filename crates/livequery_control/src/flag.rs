//! The persisted sync flag document.

use serde::{Deserialize, Serialize};
use serde_json::json;

use livequery_engine::Query;

/// Collection holding the flag document.
pub const FLAG_COLLECTION: &str = "sync_state";

/// Well-known id of the singleton flag document.
pub const FLAG_DOCUMENT_ID: &str = "sync_state";

/// The boolean field the loop reads and writes.
pub const FLAG_FIELD: &str = "enabled";

/// The singleton document governing sync.
///
/// At most one instance exists per store; any process with write access
/// can flip `enabled` to toggle sync for every observer of the flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFlag {
    /// Document id; always [`FLAG_DOCUMENT_ID`] in practice.
    #[serde(rename = "_id")]
    pub id: String,
    /// Whether sync should be running.
    #[serde(default)]
    pub enabled: bool,
}

pub(crate) fn select_query(collection: &str, id: &str) -> Query {
    Query::new(format!("SELECT * FROM {collection} WHERE _id = :id")).with_param("id", id)
}

pub(crate) fn insert_default_query(collection: &str, id: &str) -> Query {
    Query::new(format!("INSERT INTO {collection} DOCUMENTS (:flag)"))
        .with_param("flag", json!({ "_id": id, "enabled": false }))
}

pub(crate) fn update_query(collection: &str, id: &str, enabled: bool) -> Query {
    Query::new(format!(
        "UPDATE {collection} SET {FLAG_FIELD} = :enabled WHERE _id = :id"
    ))
    .with_param("enabled", enabled)
    .with_param("id", id)
}

/// Reads the flag value out of one observed snapshot.
///
/// No rows means the flag has not been seeded yet; that reads as
/// disabled, never as an error.
pub(crate) fn flag_value(items: &[SyncFlag]) -> bool {
    items.first().map(|flag| flag.enabled).unwrap_or(false)
}
