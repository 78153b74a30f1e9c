//! The persistence seam used by the session pipeline.

use async_trait::async_trait;
use ceddy_types::{SessionRecord, SessionState, Utterance};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::sessions;

/// Durable storage for session records and transcripts.
///
/// The pipeline only creates, records transitions, and appends. It never
/// reads back through this trait; its in-memory transcript is authoritative
/// for a live session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), DbError>;

    async fn record_state(
        &self,
        session_id: &str,
        state: SessionState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Appends utterances atomically: either all are stored or none.
    async fn append_utterances(&self, utterances: &[Utterance]) -> Result<(), DbError>;
}

/// [`SessionStore`] backed by the SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| DbError::Join(e.to_string()))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), DbError> {
        let session = session.clone();
        self.with_conn(move |conn| sessions::insert_session(conn, &session))
            .await
    }

    async fn record_state(
        &self,
        session_id: &str,
        state: SessionState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| sessions::record_state(conn, &session_id, state, updated_at))
            .await
    }

    async fn append_utterances(&self, utterances: &[Utterance]) -> Result<(), DbError> {
        let utterances = utterances.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for utterance in &utterances {
                sessions::append_utterance(&tx, utterance)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
