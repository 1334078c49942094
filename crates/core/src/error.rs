//! Error types for the BidGuard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all BidGuard operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Escalation errors ---
    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    // --- Cost-control errors ---
    #[error("Cost control error: {0}")]
    Cost(#[from] CostError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum EscalationError {
    /// The violation record could not be persisted. Fatal to the call:
    /// an unrecorded violation is an audit-integrity gap.
    #[error("Failed to persist violation record for user {user_id}: {reason}")]
    RecordPersistFailed { user_id: String, reason: String },

    #[error("Failed to load violation profile for user {user_id}: {reason}")]
    ProfileLoadFailed { user_id: String, reason: String },

    #[error("Escalation ladder misconfigured: {0}")]
    LadderMisconfigured(String),
}

#[derive(Debug, Error)]
pub enum CostError {
    #[error("Administrative key rejected")]
    Unauthorized,

    #[error("Invalid cost value: {0}")]
    InvalidCost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_persist_failure_displays_user() {
        let err = Error::Escalation(EscalationError::RecordPersistFailed {
            user_id: "user-77".into(),
            reason: "connection refused".into(),
        });
        assert!(err.to_string().contains("user-77"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn unauthorized_reset_displays_correctly() {
        let err = Error::Cost(CostError::Unauthorized);
        assert!(err.to_string().contains("key rejected"));
    }

    #[test]
    fn store_error_converts_to_top_level() {
        let err: Error = StoreError::QueryFailed("bad column".into()).into();
        assert!(matches!(err, Error::Store(_)));
    }
}
