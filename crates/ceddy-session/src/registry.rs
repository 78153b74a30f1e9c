//! Owns every live session.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::machine::{Pipeline, SessionStateMachine};
use ceddy_types::{CloseReason, RoomReference, SessionRecord, SessionState};
use ceddy_voice::SegmenterConfig;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Options for [`SessionRegistry::create`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: Option<String>,
    pub room_reference: Option<RoomReference>,
}

/// Map of session id to state machine.
///
/// Uses `std::sync::RwLock` intentionally: every acquisition is a brief map
/// operation and none is held across an `.await`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionStateMachine>>>,
    pipeline: Arc<Pipeline>,
    config: SessionConfig,
    segmenter: SegmenterConfig,
}

impl SessionRegistry {
    pub fn new(
        pipeline: Arc<Pipeline>,
        config: SessionConfig,
        segmenter: SegmenterConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pipeline,
            config,
            segmenter,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SessionStateMachine>>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("session registry lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SessionStateMachine>>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("session registry lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        }
    }

    /// Returns the session for `session_id`, creating and persisting it if
    /// it is not registered. Concurrent callers for one id share one machine.
    pub async fn get_or_create(
        &self,
        session_id: &str,
    ) -> Result<Arc<SessionStateMachine>, SessionError> {
        if let Some(machine) = self.read().get(session_id) {
            return Ok(Arc::clone(machine));
        }
        self.insert(session_id.to_string(), NewSession::default())
            .await
    }

    /// Creates a session under a fresh id.
    pub async fn create(
        &self,
        options: NewSession,
    ) -> Result<Arc<SessionStateMachine>, SessionError> {
        self.insert(Uuid::new_v4().to_string(), options).await
    }

    async fn insert(
        &self,
        session_id: String,
        options: NewSession,
    ) -> Result<Arc<SessionStateMachine>, SessionError> {
        let machine = {
            let mut sessions = self.write();
            if let Some(existing) = sessions.get(&session_id) {
                return Ok(Arc::clone(existing));
            }
            let now = Utc::now();
            let record = SessionRecord {
                session_id: session_id.clone(),
                user_id: options.user_id,
                is_active: true,
                state: SessionState::Idle,
                room_reference: options.room_reference,
                created_at: now,
                updated_at: now,
            };
            let machine = Arc::new(SessionStateMachine::new(
                record,
                Arc::clone(&self.pipeline),
                &self.config,
                &self.segmenter,
            ));
            sessions.insert(session_id.clone(), Arc::clone(&machine));
            machine
        };

        if let Err(e) = self.pipeline.store.create_session(&machine.snapshot()).await {
            self.write().remove(&session_id);
            return Err(e.into());
        }
        info!(%session_id, "session created");
        Ok(machine)
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<SessionStateMachine>, SessionError> {
        self.read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Closes the session and drops it from the registry.
    pub async fn expire(&self, session_id: &str) -> Result<(), SessionError> {
        let machine = self
            .write()
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        machine.close(CloseReason::Terminated).await;
        Ok(())
    }

    /// Snapshots of every registered session, oldest first.
    pub fn list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self.read().values().map(|m| m.snapshot()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Closes every session attached to `room_name`. Returns how many closed.
    pub async fn close_room(&self, room_name: &str) -> usize {
        let attached: Vec<_> = self
            .read()
            .values()
            .filter(|m| m.room_reference().is_some_and(|r| r.room_name == room_name))
            .cloned()
            .collect();
        let mut closed = 0;
        for machine in attached {
            if machine.close(CloseReason::RoomEnded).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(room = %room_name, closed, "closed sessions for finished room");
        }
        closed
    }

    /// Closes idle sessions and evicts sessions closed longer than the
    /// retention period. Returns the number closed by this pass.
    pub async fn reap_idle(&self) -> usize {
        let snapshot: Vec<_> = self.read().values().cloned().collect();
        let idle_timeout = self.config.idle_timeout();
        let mut closed = 0;
        for machine in &snapshot {
            if machine.expire_if_idle(idle_timeout).await {
                closed += 1;
            }
        }

        let retention = self.config.closed_retention();
        let stale: Vec<String> = snapshot
            .iter()
            .filter(|m| m.closed_for().is_some_and(|age| age >= retention))
            .map(|m| m.session_id().to_string())
            .collect();
        if !stale.is_empty() {
            let mut sessions = self.write();
            for session_id in &stale {
                sessions.remove(session_id);
            }
            debug!(evicted = stale.len(), "evicted closed sessions");
        }
        closed
    }

    /// Closes every session. Used on shutdown.
    pub async fn close_all(&self) {
        let all: Vec<_> = self.read().values().cloned().collect();
        for machine in all {
            machine.close(CloseReason::Terminated).await;
        }
    }
}
