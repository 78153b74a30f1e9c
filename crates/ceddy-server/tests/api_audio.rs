mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::*;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn chunk_upload_answers_after_the_wake_phrase() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;

    let (status, json) = server
        .send(
            Request::post(format!("/sessions/{id}/audio"))
                .body(Body::from(utterances(&[WAKE_MS, CLUB_MS])))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deferred"], false);
    assert_eq!(json["state"], "listening");
    let turns = json["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["status"], "replied");
    assert_eq!(turns[0]["user_text"], "What club for 150 yards?");
    assert_eq!(turns[0]["assistant_text"], "Go with the 7 Iron.");
    assert_eq!(turns[0]["audio_base64"], BASE64.encode(REPLY_AUDIO));
}

#[tokio::test]
async fn speech_without_wake_phrase_produces_no_turns() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;

    let (status, json) = server
        .send(
            Request::post(format!("/sessions/{id}/audio"))
                .body(Body::from(utterances(&[CLUB_MS])))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["turns"].as_array().unwrap().is_empty());

    let (_, json) = server.get(&format!("/transcripts?session_id={id}")).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn empty_chunk_is_rejected() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;
    let (status, _) = server
        .send(
            Request::post(format!("/sessions/{id}/audio"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn interaction_returns_reply_audio() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;

    let response = server
        .app()
        .oneshot(multipart_request(
            &format!("/sessions/{id}/interaction"),
            "audio_file",
            b"Hey Ceddy, what club for 150 yards?",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(response.headers()["x-ceddy-turn"], "replied");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], REPLY_AUDIO);

    let (_, json) = server.get(&format!("/transcripts?session_id={id}")).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["items"][0]["text"], "what club for 150 yards?");
}

#[tokio::test]
async fn interaction_without_wake_phrase_is_empty() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;

    let response = server
        .app()
        .oneshot(multipart_request(
            &format!("/sessions/{id}/interaction"),
            "audio_file",
            b"nice shot",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ceddy-turn"], "not_triggered");
    assert!(response.headers().get("x-ceddy-notice").is_none());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn interaction_needs_an_audio_field() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;

    let (status, json) = server
        .send(multipart_request(
            &format!("/sessions/{id}/interaction"),
            "attachment",
            b"hey ceddy",
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "missing audio_file field");

    let (status, _) = server
        .send(multipart_request(
            "/sessions/nope/interaction",
            "audio_file",
            b"hey ceddy",
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_upload_is_refused() {
    let server = TestServer::new();
    let id = server.create_session(json!({})).await;
    let too_big = vec![0u8; server.state.max_upload_bytes + 1];

    let response = server
        .app()
        .oneshot(
            Request::post(format!("/sessions/{id}/audio"))
                .body(Body::from(too_big))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
