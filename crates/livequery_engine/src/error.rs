//! Error types for the engine seam.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a store engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The statement text could not be parsed.
    #[error("malformed statement `{statement}`: {message}")]
    MalformedStatement {
        /// The offending statement text.
        statement: String,
        /// What the parser objected to.
        message: String,
    },

    /// A statement referenced a collection the engine has never seen.
    ///
    /// Only raised when strict queries are enabled; otherwise unknown
    /// collections read as empty.
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),

    /// A statement referenced a parameter the query did not supply.
    #[error("missing parameter `:{0}`")]
    MissingParameter(String),

    /// A plain insert targeted an id that already exists.
    #[error("document `{id}` already exists in collection `{collection}`")]
    DuplicateDocument {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// An inserted document was not an object, or carried a non-string id.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// An unregister call named a subscription the engine does not hold.
    #[error("unknown subscription token {0}")]
    UnknownSubscription(crate::SubscriptionToken),

    /// An unregister call named an observer the engine does not hold.
    #[error("unknown observer token {0}")]
    UnknownObserver(crate::ObserverToken),

    /// The sync machinery refused to start or stop.
    #[error("sync control unavailable: {0}")]
    SyncUnavailable(String),

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl EngineError {
    /// Creates a malformed-statement error.
    pub fn malformed(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedStatement {
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Creates a missing-parameter error.
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter(name.into())
    }

    /// Creates a duplicate-document error.
    pub fn duplicate(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateDocument {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Returns true if this error is a duplicate-document rejection.
    ///
    /// Seeding code that races other writers uses this to treat "someone
    /// else inserted first" as success.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EngineError::DuplicateDocument { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_predicate() {
        assert!(EngineError::duplicate("tasks", "abc").is_duplicate());
        assert!(!EngineError::EngineClosed.is_duplicate());
        assert!(!EngineError::missing_parameter("id").is_duplicate());
    }

    #[test]
    fn error_display() {
        let err = EngineError::malformed("SELEKT *", "unsupported statement `SELEKT`");
        assert!(err.to_string().contains("SELEKT"));

        let err = EngineError::missing_parameter("task");
        assert_eq!(err.to_string(), "missing parameter `:task`");

        let err = EngineError::duplicate("sync_state", "sync_state");
        assert!(err.to_string().contains("sync_state"));
    }
}
