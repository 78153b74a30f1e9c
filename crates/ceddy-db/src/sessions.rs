//! Session and transcript queries.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond
//! precision, so lexical order equals chronological order.

use ceddy_types::{
    FunctionCallRecord, Role, RoomReference, SessionPatch, SessionRecord, SessionState, Utterance,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::DbError;

const SESSION_COLUMNS: &str = "session_id, user_id, is_active, state, room_name, \
     participant_identity, created_at, updated_at";

/// Filter for [`list_utterances`].
#[derive(Debug, Clone, Default)]
pub struct UtteranceFilter {
    /// Only utterances owned by this session.
    pub session_id: Option<String>,
    /// Maximum rows to return (default: 100).
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: Option<i64>,
}

pub(crate) fn encode_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

struct RawSession {
    session_id: String,
    user_id: Option<String>,
    is_active: bool,
    state: String,
    room_name: Option<String>,
    participant_identity: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_session_row(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        is_active: row.get(2)?,
        state: row.get(3)?,
        room_name: row.get(4)?,
        participant_identity: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl TryFrom<RawSession> for SessionRecord {
    type Error = DbError;

    fn try_from(raw: RawSession) -> Result<Self, Self::Error> {
        let state: SessionState = raw
            .state
            .parse()
            .map_err(|e| DbError::Corrupt(format!("session {}: {}", raw.session_id, e)))?;
        let room_reference = match (raw.room_name, raw.participant_identity) {
            (Some(room_name), Some(participant_identity)) => Some(RoomReference {
                room_name,
                participant_identity,
            }),
            _ => None,
        };
        Ok(SessionRecord {
            created_at: decode_time(&raw.created_at)?,
            updated_at: decode_time(&raw.updated_at)?,
            session_id: raw.session_id,
            user_id: raw.user_id,
            is_active: raw.is_active,
            state,
            room_reference,
        })
    }
}

/// Inserts a new session row.
pub fn insert_session(conn: &Connection, session: &SessionRecord) -> Result<(), DbError> {
    let (room_name, participant_identity) = match &session.room_reference {
        Some(room) => (
            Some(room.room_name.as_str()),
            Some(room.participant_identity.as_str()),
        ),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO sessions (
            session_id, user_id, is_active, state, room_name,
            participant_identity, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session.session_id,
            session.user_id,
            session.is_active,
            session.state.as_str(),
            room_name,
            participant_identity,
            encode_time(&session.created_at),
            encode_time(&session.updated_at),
        ],
    )?;
    Ok(())
}

/// Retrieves a session by its public id.
pub fn get_session(conn: &Connection, session_id: &str) -> Result<SessionRecord, DbError> {
    let raw = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            [session_id],
            read_session_row,
        )
        .optional()?
        .ok_or_else(|| DbError::SessionNotFound(session_id.to_string()))?;
    raw.try_into()
}

/// Lists sessions, newest first.
pub fn list_sessions(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<Vec<SessionRecord>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         ORDER BY created_at DESC, id DESC
         LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit, offset], read_session_row)?;
    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?.try_into()?);
    }
    Ok(sessions)
}

/// Total number of stored sessions.
pub fn count_sessions(conn: &Connection) -> Result<i64, DbError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?)
}

/// Marks every session not already closed as closed.
///
/// Live state is in memory only, so sessions left open by a previous
/// process can never resume. Returns how many rows changed.
pub fn close_stale_sessions(
    conn: &Connection,
    updated_at: DateTime<Utc>,
) -> Result<usize, DbError> {
    Ok(conn.execute(
        "UPDATE sessions SET state = 'closed', is_active = 0, updated_at = ?1
         WHERE state != 'closed'",
        params![encode_time(&updated_at)],
    )?)
}

/// Applies a metadata patch in a single UPDATE and returns the updated row.
pub fn update_session(
    conn: &Connection,
    session_id: &str,
    patch: &SessionPatch,
    updated_at: DateTime<Utc>,
) -> Result<SessionRecord, DbError> {
    let changed = conn.execute(
        "UPDATE sessions SET
            user_id = COALESCE(?2, user_id),
            is_active = COALESCE(?3, is_active),
            updated_at = ?4
         WHERE session_id = ?1",
        params![
            session_id,
            patch.user_id,
            patch.is_active,
            encode_time(&updated_at)
        ],
    )?;
    if changed == 0 {
        return Err(DbError::SessionNotFound(session_id.to_string()));
    }
    get_session(conn, session_id)
}

/// Records a state transition.
///
/// `closed` is terminal: writes arriving after it are ignored.
pub fn record_state(
    conn: &Connection,
    session_id: &str,
    state: SessionState,
    updated_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE sessions SET state = ?2, updated_at = ?3,
            is_active = CASE WHEN ?2 = 'closed' THEN 0 ELSE is_active END
         WHERE session_id = ?1 AND state != 'closed'",
        params![session_id, state.as_str(), encode_time(&updated_at)],
    )?;
    if changed == 0 {
        let exists = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(DbError::SessionNotFound(session_id.to_string()));
        }
    }
    Ok(())
}

/// Appends one utterance to its session's transcript.
pub fn append_utterance(conn: &Connection, utterance: &Utterance) -> Result<(), DbError> {
    let function_call_json = utterance
        .function_call
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO utterances (
            utterance_id, session_id, role, text, function_call_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            utterance.utterance_id,
            utterance.session_id,
            utterance.role.as_str(),
            utterance.text,
            function_call_json,
            encode_time(&utterance.created_at),
        ],
    )?;
    Ok(())
}

/// Number of utterances matching the filter's session, ignoring paging.
pub fn count_utterances(conn: &Connection, session_id: Option<&str>) -> Result<i64, DbError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM utterances WHERE (?1 IS NULL OR session_id = ?1)",
        params![session_id],
        |row| row.get(0),
    )?)
}

/// Lists utterances in chronological order, optionally for one session.
pub fn list_utterances(
    conn: &Connection,
    filter: &UtteranceFilter,
) -> Result<Vec<Utterance>, DbError> {
    let limit = filter.limit.unwrap_or(100);
    let offset = filter.offset.unwrap_or(0);

    let mut stmt = conn.prepare(
        "SELECT utterance_id, session_id, role, text, function_call_json, created_at
         FROM utterances
         WHERE (?1 IS NULL OR session_id = ?1)
         ORDER BY created_at ASC, id ASC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![filter.session_id, limit, offset], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut utterances = Vec::new();
    for row in rows {
        let (utterance_id, session_id, role, text, function_call_json, created_at) = row?;
        let role: Role = role
            .parse()
            .map_err(|e| DbError::Corrupt(format!("utterance {}: {}", utterance_id, e)))?;
        let function_call = function_call_json
            .map(|json| serde_json::from_str::<FunctionCallRecord>(&json))
            .transpose()?;
        utterances.push(Utterance {
            created_at: decode_time(&created_at)?,
            utterance_id,
            session_id,
            role,
            text,
            function_call,
        });
    }
    Ok(utterances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::Duration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn record(id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: id.to_string(),
            user_id: None,
            is_active: true,
            state: SessionState::Idle,
            room_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn session_round_trips_with_room() {
        let conn = conn();
        let mut session = record("s-1");
        session.room_reference = Some(RoomReference {
            room_name: "range-1".into(),
            participant_identity: "ceddy-s-1".into(),
        });
        insert_session(&conn, &session).unwrap();

        let loaded = get_session(&conn, "s-1").unwrap();
        assert_eq!(loaded.room_reference, session.room_reference);
        assert_eq!(loaded.state, SessionState::Idle);
        assert!(loaded.is_active);
    }

    #[test]
    fn missing_session_is_not_found() {
        let conn = conn();
        assert!(matches!(
            get_session(&conn, "nope"),
            Err(DbError::SessionNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let conn = conn();
        insert_session(&conn, &record("s-2")).unwrap();

        let patch = SessionPatch {
            user_id: Some("golfer-7".into()),
            is_active: None,
        };
        let updated = update_session(&conn, "s-2", &patch, Utc::now()).unwrap();
        assert_eq!(updated.user_id.as_deref(), Some("golfer-7"));
        assert!(updated.is_active);

        let patch = SessionPatch {
            user_id: None,
            is_active: Some(false),
        };
        let updated = update_session(&conn, "s-2", &patch, Utc::now()).unwrap();
        assert_eq!(updated.user_id.as_deref(), Some("golfer-7"));
        assert!(!updated.is_active);
    }

    #[test]
    fn closing_marks_session_inactive() {
        let conn = conn();
        insert_session(&conn, &record("s-3")).unwrap();
        record_state(&conn, "s-3", SessionState::Closed, Utc::now()).unwrap();
        let loaded = get_session(&conn, "s-3").unwrap();
        assert_eq!(loaded.state, SessionState::Closed);
        assert!(!loaded.is_active);

        // A late write from an abandoned turn does not reopen it.
        record_state(&conn, "s-3", SessionState::Speaking, Utc::now()).unwrap();
        assert_eq!(get_session(&conn, "s-3").unwrap().state, SessionState::Closed);
    }

    #[test]
    fn utterances_are_listed_chronologically_and_filtered() {
        let conn = conn();
        insert_session(&conn, &record("a")).unwrap();
        insert_session(&conn, &record("b")).unwrap();

        let base = Utc::now();
        let mut first = Utterance::new("a", Role::User, "hey ceddy what club");
        first.created_at = base;
        let mut second = Utterance::new("a", Role::Assistant, "Take your 7 iron.").with_function_call(
            Some(FunctionCallRecord {
                function_name: "suggest_club".into(),
                arguments: serde_json::json!({"distance": 150}),
                result: serde_json::json!({"club": "7 Iron"}),
            }),
        );
        second.created_at = base + Duration::milliseconds(5);
        let mut other = Utterance::new("b", Role::User, "unrelated");
        other.created_at = base + Duration::milliseconds(1);

        // Insert out of order to prove ordering comes from created_at.
        append_utterance(&conn, &second).unwrap();
        append_utterance(&conn, &other).unwrap();
        append_utterance(&conn, &first).unwrap();

        let filter = UtteranceFilter {
            session_id: Some("a".into()),
            ..Default::default()
        };
        let listed = list_utterances(&conn, &filter).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].role, Role::User);
        assert_eq!(listed[1].role, Role::Assistant);
        assert_eq!(
            listed[1].function_call.as_ref().map(|f| f.function_name.as_str()),
            Some("suggest_club")
        );

        let all = list_utterances(&conn, &UtteranceFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].session_id, "b");
    }

    #[test]
    fn utterance_for_unknown_session_is_rejected() {
        let conn = conn();
        let orphan = Utterance::new("ghost", Role::User, "hello");
        assert!(append_utterance(&conn, &orphan).is_err());
    }

    #[test]
    fn counts_and_stale_close() {
        let conn = conn();
        insert_session(&conn, &record("a")).unwrap();
        insert_session(&conn, &record("b")).unwrap();
        record_state(&conn, "b", SessionState::Closed, Utc::now()).unwrap();
        append_utterance(&conn, &Utterance::new("a", Role::User, "hey ceddy")).unwrap();
        append_utterance(&conn, &Utterance::new("a", Role::Assistant, "hi")).unwrap();

        assert_eq!(count_sessions(&conn).unwrap(), 2);
        assert_eq!(count_utterances(&conn, None).unwrap(), 2);
        assert_eq!(count_utterances(&conn, Some("b")).unwrap(), 0);

        assert_eq!(close_stale_sessions(&conn, Utc::now()).unwrap(), 1);
        let a = get_session(&conn, "a").unwrap();
        assert_eq!(a.state, SessionState::Closed);
        assert!(!a.is_active);
        assert_eq!(close_stale_sessions(&conn, Utc::now()).unwrap(), 0);
    }
}
