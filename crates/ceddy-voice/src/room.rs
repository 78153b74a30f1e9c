//! Room provider seam and its LiveKit implementation.

use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use ceddy_types::{ParticipantInfo, RoomEventKind, RoomInfo, RoomWebhookEvent};
use livekit_api::access_token::{AccessToken, TokenVerifier, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_api::webhooks::WebhookReceiver;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Parameters for a room join token.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub room_name: String,
    pub participant_name: String,
    pub participant_identity: String,
    /// Overrides the configured TTL.
    pub ttl: Option<Duration>,
    pub metadata: Option<String>,
}

/// A signed join token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub url: String,
    pub room_name: String,
    pub participant_identity: String,
    pub expires_in: u64,
}

/// Room management operations delegated to the transport provider.
#[async_trait]
pub trait RoomManager: Send + Sync {
    async fn create_room(
        &self,
        name: &str,
        empty_timeout: Option<u32>,
    ) -> Result<RoomInfo, VoiceError>;

    async fn delete_room(&self, name: &str) -> Result<(), VoiceError>;

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, VoiceError>;

    async fn list_participants(&self, room_name: &str) -> Result<Vec<ParticipantInfo>, VoiceError>;

    fn issue_token(&self, request: &TokenRequest) -> Result<IssuedToken, VoiceError>;

    /// Verifies a signed webhook delivery and decodes it.
    fn verify_webhook(&self, body: &str, authorization: &str)
        -> Result<RoomWebhookEvent, VoiceError>;
}

/// [`RoomManager`] backed by the LiveKit server API.
#[derive(Debug)]
pub struct LiveKitRoomService {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl LiveKitRoomService {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn require_server(&self) -> Result<(), VoiceError> {
        if self.config.is_enabled() {
            Ok(())
        } else {
            Err(VoiceError::Config(
                "LiveKit url, api key and secret must be configured".to_string(),
            ))
        }
    }

    fn require_credentials(&self) -> Result<(), VoiceError> {
        if self.config.has_credentials() {
            Ok(())
        } else {
            Err(VoiceError::Config(
                "LiveKit api key and secret must be configured".to_string(),
            ))
        }
    }
}

#[async_trait]
impl RoomManager for LiveKitRoomService {
    async fn create_room(
        &self,
        name: &str,
        empty_timeout: Option<u32>,
    ) -> Result<RoomInfo, VoiceError> {
        self.require_server()?;
        let options = CreateRoomOptions {
            empty_timeout: empty_timeout.unwrap_or(self.config.empty_timeout_seconds),
            ..Default::default()
        };

        let room = self
            .room_client
            .create_room(name, options)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        info!(room = %room.name, sid = %room.sid, "room created");
        Ok(room_info(room))
    }

    async fn delete_room(&self, name: &str) -> Result<(), VoiceError> {
        self.require_server()?;
        self.room_client
            .delete_room(name)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        info!(room = %name, "room deleted");
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, VoiceError> {
        self.require_server()?;
        let rooms = self
            .room_client
            .list_rooms(Vec::new())
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        Ok(rooms.into_iter().map(room_info).collect())
    }

    async fn list_participants(&self, room_name: &str) -> Result<Vec<ParticipantInfo>, VoiceError> {
        self.require_server()?;
        let participants = self
            .room_client
            .list_participants(room_name)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        Ok(participants.into_iter().map(participant_info).collect())
    }

    fn issue_token(&self, request: &TokenRequest) -> Result<IssuedToken, VoiceError> {
        self.require_credentials()?;
        if request.room_name.trim().is_empty() {
            return Err(VoiceError::Config("room name must not be empty".to_string()));
        }
        if request.participant_identity.trim().is_empty() {
            return Err(VoiceError::Config(
                "participant identity must not be empty".to_string(),
            ));
        }

        let ttl = request
            .ttl
            .unwrap_or(Duration::from_secs(self.config.token_ttl_seconds));
        let mut token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(&request.participant_identity)
            .with_name(&request.participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: request.room_name.clone(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(ttl);
        if let Some(metadata) = &request.metadata {
            token = token.with_metadata(metadata);
        }

        let jwt = token.to_jwt()?;
        debug!(
            room = %request.room_name,
            identity = %request.participant_identity,
            "issued join token"
        );
        Ok(IssuedToken {
            token: jwt,
            url: self.config.url.clone(),
            room_name: request.room_name.clone(),
            participant_identity: request.participant_identity.clone(),
            expires_in: ttl.as_secs(),
        })
    }

    fn verify_webhook(
        &self,
        body: &str,
        authorization: &str,
    ) -> Result<RoomWebhookEvent, VoiceError> {
        self.require_credentials()?;
        let receiver = WebhookReceiver::new(TokenVerifier::with_api_key(
            &self.config.api_key,
            &self.config.api_secret,
        ));
        let event = receiver
            .receive(body, authorization)
            .map_err(|e| VoiceError::Webhook(e.to_string()))?;

        Ok(RoomWebhookEvent {
            kind: RoomEventKind::from_label(&event.event),
            room_name: event.room.map(|r| r.name).filter(|n| !n.is_empty()),
            participant_identity: event
                .participant
                .map(|p| p.identity)
                .filter(|i| !i.is_empty()),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn room_info(room: livekit_protocol::Room) -> RoomInfo {
    RoomInfo {
        name: room.name,
        sid: room.sid,
        empty_timeout: room.empty_timeout,
        max_participants: room.max_participants,
        num_participants: room.num_participants,
        created_at: room.creation_time,
        metadata: non_empty(room.metadata),
    }
}

fn participant_state_label(state: i32) -> &'static str {
    match state {
        0 => "JOINING",
        1 => "JOINED",
        2 => "ACTIVE",
        3 => "DISCONNECTED",
        _ => "UNKNOWN",
    }
}

fn participant_info(participant: livekit_protocol::ParticipantInfo) -> ParticipantInfo {
    ParticipantInfo {
        identity: participant.identity,
        name: non_empty(participant.name),
        state: Some(participant_state_label(participant.state).to_string()),
        metadata: non_empty(participant.metadata),
        joined_at: (participant.joined_at > 0).then_some(participant.joined_at),
    }
}
