//! Persistence for Ceddy sessions and transcripts.
//!
//! Provides SQLite connection pooling (via `r2d2`), embedded migrations,
//! synchronous query helpers, and [`SqliteSessionStore`], the async
//! [`SessionStore`] implementation the session pipeline writes through.
//!
//! The pipeline only ever creates sessions, records state changes, and
//! appends utterances. Reads (session lookup, listing, transcript queries)
//! are served to the HTTP layer straight from the query helpers.

mod error;
mod migrations;
mod pool;
mod sessions;
mod store;

pub use error::DbError;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbLocation, DbPool, DbRuntimeSettings, PoolError, MEMORY_PATH};
pub use sessions::{
    append_utterance, close_stale_sessions, count_sessions, count_utterances, get_session,
    insert_session, list_sessions, list_utterances, record_state, update_session,
    UtteranceFilter,
};
pub use store::{SessionStore, SqliteSessionStore};
