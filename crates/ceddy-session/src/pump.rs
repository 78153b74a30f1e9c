//! Feeds a room participant's audio into a session.

use crate::machine::SessionStateMachine;
use ceddy_types::SessionState;
use ceddy_voice::RoomAudioLink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Attaches `link` as the session's output and spawns a task that ingests
/// the link's inbound audio until the stream ends or the session closes.
///
/// Ingestion never waits on a turn: completed buffers are queued and a run
/// is scheduled to drain them. Returns `None` if the link's inbound stream
/// was already taken.
pub fn spawn_room_pump(
    machine: Arc<SessionStateMachine>,
    link: Arc<RoomAudioLink>,
) -> Option<JoinHandle<()>> {
    let mut inbound = link.take_inbound()?;
    machine.attach_output(link.clone());
    let closed = machine.closed_token();
    let room = link.reference().room_name.clone();

    Some(tokio::spawn(async move {
        info!(session_id = %machine.session_id(), %room, "room audio pump started");
        loop {
            let chunk = tokio::select! {
                _ = closed.cancelled() => break,
                chunk = inbound.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            match machine.ingest(&chunk) {
                Ok(queued) => {
                    if queued > 0 || machine.state() == SessionState::Idle {
                        machine.schedule();
                    }
                }
                Err(e) => {
                    debug!(session_id = %machine.session_id(), error = %e, "dropping room audio");
                    break;
                }
            }
        }
        if let Ok(queued) = machine.flush_input() {
            if queued > 0 {
                machine.schedule();
            }
        }
        info!(session_id = %machine.session_id(), %room, "room audio pump stopped");
    }))
}
