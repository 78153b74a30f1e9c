use ceddy_db::DbError;
use ceddy_types::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The session reached `Closed` and accepts no further input.
    #[error("Session {0} has ended")]
    Closed(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Storage error: {0}")]
    Store(#[from] DbError),
}
