//! WebSocket audio streaming for a session.
//!
//! Binary frames from the client are raw PCM and feed the session through a
//! [`RoomAudioLink`]. The server answers with binary reply audio and JSON
//! text frames carrying the session's events.

use crate::api::{live_session, ApiError};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use ceddy_session::{spawn_room_pump, SessionError, SessionStateMachine};
use ceddy_types::RoomReference;
use ceddy_voice::{RoomAudioLink, TransportEnds, DEFAULT_LINK_CAPACITY};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Handler for `GET /sessions/{session_id}/stream`.
pub async fn stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let machine = live_session(&state, &session_id).await?;
    if machine.is_closed() {
        return Err(SessionError::Closed(session_id).into());
    }
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, machine))
        .into_response())
}

async fn handle_socket(socket: WebSocket, machine: Arc<SessionStateMachine>) {
    let session_id = machine.session_id().to_string();
    let reference = machine.room_reference().unwrap_or_else(|| RoomReference {
        room_name: format!("stream-{}", session_id),
        participant_identity: session_id.clone(),
    });
    let (link, TransportEnds { inbound, mut outbound }) =
        RoomAudioLink::open(reference, DEFAULT_LINK_CAPACITY);
    let Some(pump) = spawn_room_pump(Arc::clone(&machine), Arc::new(link)) else {
        tracing::warn!(session_id = %session_id, "stream link already consumed");
        return;
    };

    let mut events = machine.subscribe();
    let closed = machine.closed_token();
    let (mut sender, mut receiver) = socket.split();

    let send_closed = closed.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!("failed to encode session event: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "stream client lagging, dropped session events");
                    }
                    Err(RecvError::Closed) => break,
                },
                audio = outbound.recv() => match audio {
                    Some(audio) => {
                        if sender.send(Message::Binary(audio.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = send_closed.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    tracing::info!(session_id = %session_id, "stream connected");
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    if inbound.send(bytes.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    // The pump flushes buffered speech once its inbound side hangs up.
    drop(inbound);
    if let Err(e) = pump.await {
        tracing::error!(session_id = %session_id, "stream pump join error: {}", e);
    }
    if closed.is_cancelled() {
        let _ = send_task.await;
    } else {
        send_task.abort();
    }
    machine.detach_output();
    tracing::info!(session_id = %session_id, "stream disconnected");
}
