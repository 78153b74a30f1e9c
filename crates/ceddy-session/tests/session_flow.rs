mod common;

use ceddy_session::{
    FeedOutcome, NewSession, SessionConfig, SessionError, SessionEvent, TurnOutcome,
    TurnStatus, TRANSCRIPTION_FAILED_NOTICE,
};
use ceddy_types::{CloseReason, Role, SessionPatch, SessionState};
use ceddy_voice::{ContainerFormat, Encoding};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn replies(outcome: &FeedOutcome) -> Vec<&ceddy_session::TurnReply> {
    outcome.turns().iter().filter_map(TurnOutcome::reply).collect()
}

#[tokio::test]
async fn wake_then_command_appends_one_pair() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    let outcome = session
        .feed(&utterances(&[WAKE_MS, CLUB_MS]))
        .await
        .unwrap();

    let replies = replies(&outcome);
    assert_eq!(replies.len(), 1);
    let reply = replies[0];
    assert_eq!(reply.user.text, "What club for 150 yards?");
    assert_eq!(reply.assistant.text, "Go with the 7 Iron.");
    assert_eq!(reply.audio.as_deref(), Some(REPLY_AUDIO));
    let call = reply.assistant.function_call.as_ref().unwrap();
    assert_eq!(call.function_name, "suggest_club");
    assert_eq!(call.result["club"], "7 Iron");

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].role, Role::Assistant);
    assert!(transcript[0].created_at <= transcript[1].created_at);
    assert_eq!(h.store.utterances(), transcript);

    assert_eq!(session.state(), SessionState::Listening);
    let stored = h.store.session(session.session_id()).unwrap();
    assert_eq!(stored.state, SessionState::Listening);
}

#[tokio::test]
async fn gate_admits_a_single_command() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[WAKE_MS, CLUB_MS, WIND_MS]))
        .await
        .unwrap();

    assert_eq!(replies(&outcome).len(), 1);
    assert_eq!(h.model.calls(), 1);
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn command_in_the_same_breath_as_the_wake_phrase() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session.feed(&utterances(&[WAKE_AND_WIND_MS])).await.unwrap();

    let replies = replies(&outcome);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].user.text, "How windy is it?");
    assert_eq!(replies[0].assistant.text, "You asked: How windy is it?");
    assert!(replies[0].assistant.function_call.is_none());
}

#[tokio::test]
async fn long_utterance_is_gated_on_its_opening_words() {
    let h = HarnessBuilder::new()
        .config(SessionConfig {
            wake_check_ms: WAKE_HEAD_MS,
            ..SessionConfig::default()
        })
        .build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session.feed(&utterances(&[LONG_WAKE_MS])).await.unwrap();

    let replies = replies(&outcome);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].user.text, "what club for 150 yards?");
    let heard: Vec<u128> = h
        .stt
        .heard()
        .iter()
        .map(|buffer| buffer.duration().as_millis())
        .collect();
    assert_eq!(heard, vec![WAKE_HEAD_MS as u128, LONG_WAKE_MS as u128]);
}

#[tokio::test]
async fn speech_without_the_wake_phrase_is_ignored() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[CLUB_MS, WIND_MS]))
        .await
        .unwrap();

    assert!(outcome.turns().is_empty());
    assert_eq!(h.model.calls(), 0);
    assert!(session.transcript().is_empty());
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn chunks_split_mid_frame_still_segment() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let stream = utterances(&[WAKE_MS, CLUB_MS]);
    let mut replied = 0;
    for chunk in stream.chunks(1_001) {
        replied += replies(&session.feed(chunk).await.unwrap()).len();
    }
    assert_eq!(replied, 1);
}

#[tokio::test]
async fn unintelligible_command_consumes_the_gate() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[WAKE_MS, MUMBLE_MS, CLUB_MS]))
        .await
        .unwrap();

    let statuses: Vec<_> = outcome.turns().iter().map(TurnOutcome::status).collect();
    assert_eq!(statuses, vec![TurnStatus::Unintelligible]);
    assert!(outcome.turns()[0].notice().is_some());
    assert_eq!(h.model.calls(), 0);
    assert!(session.transcript().is_empty());
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn transcription_failure_aborts_the_turn() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[WAKE_MS, GARBLED_MS]))
        .await
        .unwrap();

    let turn = &outcome.turns()[0];
    assert!(matches!(turn, TurnOutcome::TranscriptionFailed { .. }));
    assert_eq!(turn.notice(), Some(TRANSCRIPTION_FAILED_NOTICE));
    assert!(session.transcript().is_empty());
    assert_eq!(session.state(), SessionState::Listening);

    // The session keeps working afterwards.
    let outcome = session
        .feed(&utterances(&[WAKE_MS, CLUB_MS]))
        .await
        .unwrap();
    assert_eq!(replies(&outcome).len(), 1);
}

#[tokio::test]
async fn dispatch_failure_reports_without_recording() {
    let h = HarnessBuilder::new()
        .model(FakeModel::new(ModelMode::Fail))
        .build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[WAKE_MS, CLUB_MS]))
        .await
        .unwrap();

    assert_eq!(outcome.turns().len(), 1);
    assert_eq!(outcome.turns()[0].status(), TurnStatus::DispatchFailed);
    assert!(session.transcript().is_empty());
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn synthesis_failure_still_records_the_text() {
    let h = HarnessBuilder::new().failing_tts().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let outcome = session
        .feed(&utterances(&[WAKE_MS, CLUB_MS]))
        .await
        .unwrap();

    let reply = replies(&outcome)[0];
    assert!(reply.audio.is_none());
    assert!(reply.synthesis_error.is_some());
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn runs_never_overlap() {
    let h = HarnessBuilder::new()
        .model(FakeModel::with_delay(
            ModelMode::Golf,
            Duration::from_millis(30),
        ))
        .build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session.feed(&utterances(&[WAKE_MS, CLUB_MS])).await
        }));
    }
    let artifact = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .process_artifact(b"hey ceddy how windy is it".to_vec())
                .await
        })
    };

    let mut replied = 0;
    for task in tasks {
        replied += replies(&task.await.unwrap().unwrap()).len();
    }
    assert!(artifact.await.unwrap().unwrap().reply().is_some());
    replied += 1;

    assert_eq!(replied, 4);
    assert_eq!(h.model.max_in_flight(), 1);

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 8);
    for pair in transcript.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
    assert!(transcript
        .windows(2)
        .all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn closing_cancels_the_turn_in_flight() {
    let h = HarnessBuilder::new()
        .model(FakeModel::new(ModelMode::Hang))
        .build();
    let session = h.registry.create(NewSession::default()).await.unwrap();
    let mut events = session.subscribe();

    let running = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.feed(&utterances(&[WAKE_MS, CLUB_MS])).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::StateChanged {
                to: SessionState::Processing,
                ..
            }) = events.recv().await
            {
                break;
            }
        }
    })
    .await
    .expect("turn reached processing");

    assert!(session.close(CloseReason::Terminated).await);
    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("turn stopped")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.turns().len(), 1);
    assert_eq!(outcome.turns()[0].status(), TurnStatus::Cancelled);
    assert!(session.transcript().is_empty());
    assert!(h.store.utterances().is_empty());
    assert_eq!(
        h.store.session(session.session_id()).unwrap().state,
        SessionState::Closed
    );
    assert!(matches!(
        session.feed(&tone(100)).await,
        Err(SessionError::Closed(_))
    ));
    assert!(!session.close(CloseReason::Terminated).await);
}

#[tokio::test]
async fn lifecycle_events_follow_the_turn() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();
    let mut events = session.subscribe();

    session
        .feed(&utterances(&[WAKE_MS, CLUB_MS]))
        .await
        .unwrap();

    let mut transitions = Vec::new();
    let mut finished = None;
    let mut woke = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { from, to, .. } => transitions.push((from, to)),
            SessionEvent::WakeDetected { .. } => woke = true,
            SessionEvent::TurnFinished { status, .. } => finished = Some(status),
            SessionEvent::Closed { .. } => unreachable!(),
        }
    }

    use SessionState::*;
    assert!(woke);
    assert_eq!(
        transitions,
        vec![
            (Idle, Listening),
            (Listening, Capturing),
            (Capturing, Processing),
            (Processing, Speaking),
            (Speaking, Listening),
        ]
    );
    assert_eq!(finished, Some(TurnStatus::Replied));
}

#[tokio::test]
async fn artifacts_are_gated_on_the_wake_phrase() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let ignored = session
        .process_artifact(b"what club for 150 yards".to_vec())
        .await
        .unwrap();
    assert_eq!(ignored.status(), TurnStatus::NotTriggered);
    assert_eq!(h.model.calls(), 0);

    let bare = session.process_artifact(b"Hey Ceddy".to_vec()).await.unwrap();
    assert_eq!(bare.status(), TurnStatus::NoCommand);
    assert_eq!(session.state(), SessionState::Listening);

    let answered = session
        .process_artifact(b"Hey Ceddy, what club for 150 yards?".to_vec())
        .await
        .unwrap();
    let reply = answered.reply().unwrap();
    assert_eq!(reply.user.text, "what club for 150 yards?");
    assert_eq!(reply.audio.as_deref(), Some(REPLY_AUDIO));
    assert_eq!(session.transcript().len(), 2);
    assert_eq!(session.state(), SessionState::Listening);
}

#[tokio::test]
async fn uploaded_mp3_reaches_the_transcriber_unchanged() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();
    let mp3 = b"ID3\x04\x00\x00 Hey Ceddy, how windy is it?".to_vec();

    let outcome = session.process_artifact(mp3.clone()).await.unwrap();
    assert_eq!(outcome.status(), TurnStatus::Replied);

    let heard = h.stt.heard();
    assert_eq!(heard.len(), 1);
    assert_eq!(heard[0].encoding(), Encoding::Container);
    let (bytes, format) = heard[0].encoded();
    assert_eq!(bytes, mp3);
    assert_eq!(format, ContainerFormat::Mp3);
}

#[tokio::test]
async fn deactivating_closes_the_session() {
    let h = HarnessBuilder::new().build();
    let session = h.registry.create(NewSession::default()).await.unwrap();

    let record = session
        .apply_patch(&SessionPatch {
            user_id: Some("golfer-7".into()),
            is_active: None,
        })
        .await
        .unwrap();
    assert_eq!(record.user_id.as_deref(), Some("golfer-7"));
    assert!(record.is_active);

    let record = session
        .apply_patch(&SessionPatch {
            user_id: None,
            is_active: Some(false),
        })
        .await
        .unwrap();
    assert!(!record.is_active);
    assert_eq!(record.state, SessionState::Closed);
    assert!(matches!(
        session.apply_patch(&SessionPatch::default()).await,
        Err(SessionError::Closed(_))
    ));
}
