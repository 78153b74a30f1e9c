//! Error types for the persistence layer.

/// Errors that can occur during session and transcript persistence.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No connection could be checked out of the pool.
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The blocking task running the query was cancelled or panicked.
    #[error("task join error: {0}")]
    Join(String),
}
