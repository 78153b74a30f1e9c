//! SQLite connection pool for the session store.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Path that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Where the session database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Lives as long as its single pooled connection.
    Memory,
}

impl DbLocation {
    pub fn parse(path: &str) -> Self {
        if path == MEMORY_PATH {
            Self::Memory
        } else {
            Self::File(PathBuf::from(path))
        }
    }
}

impl DbRuntimeSettings {
    /// Rejects settings that cannot work for `location`.
    ///
    /// Each in-memory connection sees its own empty database, so a memory
    /// pool must hold exactly one connection.
    pub fn validate(&self, location: &DbLocation) -> Result<(), PoolError> {
        if self.pool_max_size == 0 {
            return Err(PoolError::InvalidSettings(
                "database.pool_max_size must be at least 1".to_string(),
            ));
        }
        if *location == DbLocation::Memory && self.pool_max_size != 1 {
            return Err(PoolError::InvalidSettings(format!(
                "an in-memory database needs database.pool_max_size = 1, got {}",
                self.pool_max_size
            )));
        }
        Ok(())
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid database settings: {0}")]
    InvalidSettings(String),

    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens the session database at `db_path` (or in memory for `:memory:`).
///
/// Every connection gets WAL journaling, foreign keys, and the configured
/// busy timeout. A memory pool keeps its one connection for the life of the
/// pool.
///
/// # Errors
///
/// Returns `PoolError::InvalidSettings` if `settings` do not suit the
/// location, or `PoolError::PoolInit` if the first connection fails.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let location = DbLocation::parse(db_path);
    settings.validate(&location)?;

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let manager = match &location {
        DbLocation::File(path) => SqliteConnectionManager::file(path),
        DbLocation::Memory => SqliteConnectionManager::memory(),
    }
    .with_flags(flags)
    .with_init(move |conn| prepare_connection(conn, settings));

    let mut builder = Pool::builder().max_size(settings.pool_max_size);
    if location == DbLocation::Memory {
        builder = builder.idle_timeout(None).max_lifetime(None);
    }
    Ok(builder.build(manager)?)
}

fn prepare_connection(conn: &Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    conn.pragma_update(None, "foreign_keys", true)?;

    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // In-memory databases report "memory".
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("session database refused WAL, got: {journal_mode}")),
        ));
    }
    Ok(())
}
