//! The per-session state machine.
//!
//! A session owns its segmenter, wake gate, transcript and lifecycle
//! state. Audio enters through [`SessionStateMachine::ingest`], which only
//! segments and queues; [`SessionStateMachine::drive`] then runs the queued
//! buffers through wake detection, transcription, response generation and
//! synthesis. At most one run is active per session: a `drive` that finds
//! another run in progress returns [`FeedOutcome::Deferred`] and the active
//! run picks up the new buffers in arrival order.
//!
//! The session lock is a `std::sync::Mutex` held only for short, non-async
//! sections. It is never held across an `.await`.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::outcome::{FeedOutcome, SessionEvent, TurnOutcome, TurnReply};
use ceddy_assistant::ResponseDispatcher;
use ceddy_db::SessionStore;
use ceddy_types::{
    CloseReason, Role, RoomReference, SessionPatch, SessionRecord, SessionState, Utterance,
};
use ceddy_voice::{
    match_wake_phrase, AudioBuffer, AudioSink, GateDecision, SegmenterConfig, SynthesisAdapter,
    TranscriptionAdapter, UtteranceSegmenter, WakeGate,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Providers and storage shared by every session.
#[derive(Clone)]
pub struct Pipeline {
    pub transcriber: Arc<TranscriptionAdapter>,
    pub dispatcher: Arc<ResponseDispatcher>,
    pub synthesizer: Arc<SynthesisAdapter>,
    pub store: Arc<dyn SessionStore>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("transcriber", &self.transcriber.provider_name())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// What a turn starts from: a captured audio buffer, or text already
/// transcribed alongside the wake phrase.
enum Command {
    Audio(AudioBuffer),
    Text(String),
}

struct Inner {
    state: SessionState,
    user_id: Option<String>,
    room_reference: Option<RoomReference>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_activity: Instant,
    closed_at: Option<Instant>,
    transcript: Vec<Utterance>,
    segmenter: UtteranceSegmenter,
    pending: VecDeque<AudioBuffer>,
    running: bool,
    /// Uploaded recordings currently being answered.
    artifacts: usize,
}

pub struct SessionStateMachine {
    session_id: String,
    inner: Mutex<Inner>,
    gate: WakeGate,
    pipeline: Arc<Pipeline>,
    sample_rate: u32,
    cancel: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    output: Mutex<Option<Arc<dyn AudioSink>>>,
    /// Held for the whole of each turn so streamed and uploaded audio never
    /// reach the providers concurrently.
    turn_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionStateMachine {
    pub fn new(
        record: SessionRecord,
        pipeline: Arc<Pipeline>,
        config: &SessionConfig,
        segmenter: &SegmenterConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let gate = WakeGate::new(config.wake_phrase.clone(), pipeline.transcriber.clone())
            .with_check_window(config.wake_check_window());
        let closed = record.state == SessionState::Closed;
        Self {
            session_id: record.session_id,
            inner: Mutex::new(Inner {
                state: record.state,
                user_id: record.user_id,
                room_reference: record.room_reference,
                created_at: record.created_at,
                updated_at: record.updated_at,
                last_activity: Instant::now(),
                closed_at: closed.then(Instant::now),
                transcript: Vec::new(),
                segmenter: UtteranceSegmenter::new(segmenter),
                pending: VecDeque::new(),
                running: false,
                artifacts: 0,
            }),
            gate,
            pipeline,
            sample_rate: segmenter.sample_rate,
            cancel: CancellationToken::new(),
            events,
            output: Mutex::new(None),
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(
                    session_id = %self.session_id,
                    "session lock poisoned, recovering with stale state"
                );
                poisoned.into_inner()
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn room_reference(&self) -> Option<RoomReference> {
        self.lock().room_reference.clone()
    }

    pub fn snapshot(&self) -> SessionRecord {
        let inner = self.lock();
        SessionRecord {
            session_id: self.session_id.clone(),
            user_id: inner.user_id.clone(),
            is_active: inner.state != SessionState::Closed,
            state: inner.state,
            room_reference: inner.room_reference.clone(),
            created_at: inner.created_at,
            updated_at: inner.updated_at,
        }
    }

    /// The session's transcript so far, oldest first.
    pub fn transcript(&self) -> Vec<Utterance> {
        self.lock().transcript.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Fires when the session closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sends future reply audio to `sink`, replacing any previous output.
    pub fn attach_output(&self, sink: Arc<dyn AudioSink>) {
        match self.output.lock() {
            Ok(mut slot) => *slot = Some(sink),
            Err(poisoned) => *poisoned.into_inner() = Some(sink),
        }
    }

    pub fn detach_output(&self) {
        match self.output.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn output(&self) -> Option<Arc<dyn AudioSink>> {
        match self.output.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Time since the session closed, if it has.
    pub(crate) fn closed_for(&self) -> Option<Duration> {
        self.lock().closed_at.map(|at| at.elapsed())
    }

    /// Segments `chunk` and queues the buffers it completes.
    ///
    /// Never waits on a provider. Returns the number of buffers queued.
    pub fn ingest(&self, chunk: &[u8]) -> Result<usize, SessionError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(SessionError::Closed(self.session_id.clone()));
        }
        inner.last_activity = Instant::now();
        let Inner {
            segmenter, pending, ..
        } = &mut *inner;
        let before = pending.len();
        pending.extend(segmenter.feed(chunk));
        Ok(pending.len() - before)
    }

    /// Ends the inbound stream, queueing any speech still being collected.
    pub fn flush_input(&self) -> Result<usize, SessionError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(SessionError::Closed(self.session_id.clone()));
        }
        let flushed = inner.segmenter.flush();
        let queued = flushed.len();
        inner.pending.extend(flushed);
        Ok(queued)
    }

    /// Runs the pipeline over every queued buffer.
    ///
    /// Returns [`FeedOutcome::Deferred`] when another run is already
    /// draining this session.
    pub async fn drive(&self) -> Result<FeedOutcome, SessionError> {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(SessionError::Closed(self.session_id.clone()));
            }
            if inner.running {
                return Ok(FeedOutcome::Deferred);
            }
            inner.running = true;
        }
        let mut guard = RunGuard {
            machine: self,
            armed: true,
        };

        if self.state() == SessionState::Idle {
            self.enter(SessionState::Listening).await?;
        }

        let mut outcomes = Vec::new();
        loop {
            let buffer = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(buffer) => buffer,
                    None => {
                        // Cleared under the same lock as the empty check, so
                        // a concurrent ingest either lands before this or
                        // starts a new run.
                        inner.running = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            if let Some(outcome) = self.handle_buffer(buffer).await {
                outcomes.push(outcome);
            }
            if self.is_closed() {
                break;
            }
        }
        Ok(FeedOutcome::Processed(outcomes))
    }

    /// [`ingest`](Self::ingest) followed by [`drive`](Self::drive).
    pub async fn feed(&self, chunk: &[u8]) -> Result<FeedOutcome, SessionError> {
        self.ingest(chunk)?;
        self.drive().await
    }

    /// Drives the session on a background task.
    pub fn schedule(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let machine = Arc::clone(self);
        tokio::spawn(async move {
            match machine.drive().await {
                Ok(FeedOutcome::Processed(turns)) if !turns.is_empty() => {
                    debug!(session_id = %machine.session_id, turns = turns.len(), "run finished");
                }
                Ok(_) => {}
                Err(e) => debug!(session_id = %machine.session_id, error = %e, "run skipped"),
            }
        })
    }

    /// Handles one uploaded recording: the whole artifact is transcribed,
    /// gated on the wake phrase, and whatever follows the phrase is answered.
    pub async fn process_artifact(&self, bytes: Vec<u8>) -> Result<TurnOutcome, SessionError> {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(SessionError::Closed(self.session_id.clone()));
            }
            inner.last_activity = Instant::now();
            inner.artifacts += 1;
        }
        let _active = ArtifactGuard(self);
        let _turn = self.turn_lock.lock().await;
        let _recover = TurnGuard(self);

        if self.state() == SessionState::Idle {
            self.enter(SessionState::Listening).await?;
        }

        let buffer = AudioBuffer::artifact(bytes, self.sample_rate);
        let text = match self
            .guarded(self.pipeline.transcriber.transcribe(&buffer))
            .await
        {
            None => return Ok(self.finish(TurnOutcome::Cancelled)),
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "artifact transcription failed");
                return Ok(self.finish(TurnOutcome::TranscriptionFailed {
                    error: e.to_string(),
                }));
            }
            Some(Ok(text)) => text,
        };
        if text.trim().is_empty() {
            return Ok(self.finish(TurnOutcome::Unintelligible));
        }

        // An artifact is gated on its own; a wake phrase heard on the live
        // stream stays armed for the stream's next buffer.
        let Some(command) = match_wake_phrase(&text, self.gate.phrase()) else {
            return Ok(self.finish(TurnOutcome::NotTriggered));
        };
        self.emit(SessionEvent::WakeDetected {
            session_id: self.session_id.clone(),
        });
        self.enter(SessionState::Capturing).await?;
        if command.is_empty() {
            return Ok(self.settle(TurnOutcome::NoCommand).await);
        }
        Ok(self.run_turn(Command::Text(command)).await)
    }

    async fn handle_buffer(&self, buffer: AudioBuffer) -> Option<TurnOutcome> {
        let _turn = self.turn_lock.lock().await;
        let _recover = TurnGuard(self);
        if self.is_closed() {
            return None;
        }

        if self.gate.take_command() {
            self.enter(SessionState::Capturing).await.ok()?;
            return Some(self.run_turn(Command::Audio(buffer)).await);
        }

        match self.guarded(self.gate.evaluate(&buffer)).await? {
            GateDecision::NotTriggered => None,
            GateDecision::Triggered { remainder, .. } => {
                info!(session_id = %self.session_id, "wake phrase detected");
                self.emit(SessionEvent::WakeDetected {
                    session_id: self.session_id.clone(),
                });
                self.enter(SessionState::Capturing).await.ok()?;
                let command = remainder?;
                self.gate.take_command();
                Some(self.run_turn(Command::Text(command)).await)
            }
        }
    }

    async fn run_turn(&self, command: Command) -> TurnOutcome {
        if self.enter(SessionState::Processing).await.is_err() {
            return self.finish(TurnOutcome::Cancelled);
        }

        let user_text = match command {
            Command::Text(text) => text,
            Command::Audio(buffer) => match self
                .guarded(self.pipeline.transcriber.transcribe(&buffer))
                .await
            {
                None => return self.finish(TurnOutcome::Cancelled),
                Some(Err(e)) => {
                    warn!(session_id = %self.session_id, error = %e, "command transcription failed");
                    return self
                        .settle(TurnOutcome::TranscriptionFailed {
                            error: e.to_string(),
                        })
                        .await;
                }
                Some(Ok(text)) => text,
            },
        };
        let user_text = user_text.trim().to_string();
        if user_text.is_empty() {
            return self.settle(TurnOutcome::Unintelligible).await;
        }

        let history = self.transcript();
        let reply = match self
            .guarded(self.pipeline.dispatcher.respond(&history, &user_text))
            .await
        {
            None => return self.finish(TurnOutcome::Cancelled),
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "response generation failed");
                return self
                    .settle(TurnOutcome::DispatchFailed {
                        error: e.to_string(),
                    })
                    .await;
            }
            Some(Ok(reply)) => reply,
        };

        if self.enter(SessionState::Speaking).await.is_err() {
            return self.finish(TurnOutcome::Cancelled);
        }
        let (audio, synthesis_error) = match self
            .guarded(self.pipeline.synthesizer.synthesize(&reply.text))
            .await
        {
            None => return self.finish(TurnOutcome::Cancelled),
            Some(Ok(audio)) => (Some(audio), None),
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "reply will be text only");
                (None, Some(e.to_string()))
            }
        };

        let user = Utterance::new(self.session_id.as_str(), Role::User, user_text);
        let mut assistant = Utterance::new(self.session_id.as_str(), Role::Assistant, reply.text)
            .with_function_call(reply.function_call);
        if assistant.created_at < user.created_at {
            assistant.created_at = user.created_at;
        }
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed || self.cancel.is_cancelled() {
                return self.finish(TurnOutcome::Cancelled);
            }
            inner.transcript.push(user.clone());
            inner.transcript.push(assistant.clone());
        }
        let pair = [user, assistant];
        if let Err(e) = self.pipeline.store.append_utterances(&pair).await {
            warn!(session_id = %self.session_id, error = %e, "failed to persist transcript entries");
        }

        let mut delivered = false;
        if let (Some(audio), Some(sink)) = (&audio, self.output()) {
            match self.guarded(sink.push_audio(audio.clone())).await {
                Some(Ok(())) => delivered = true,
                Some(Err(e)) => {
                    warn!(session_id = %self.session_id, error = %e, "reply audio not delivered")
                }
                None => {}
            }
        }

        let [user, assistant] = pair;
        let outcome = TurnOutcome::Replied(Box::new(TurnReply {
            user,
            assistant,
            audio,
            synthesis_error,
            delivered,
        }));
        self.settle(outcome).await
    }

    /// Returns to `Listening` and reports the outcome.
    async fn settle(&self, outcome: TurnOutcome) -> TurnOutcome {
        if let Err(e) = self.enter(SessionState::Listening).await {
            debug!(session_id = %self.session_id, error = %e, "turn ended after close");
            if matches!(e, SessionError::Closed(_)) && outcome.reply().is_none() {
                return self.finish(TurnOutcome::Cancelled);
            }
        }
        self.finish(outcome)
    }

    fn finish(&self, outcome: TurnOutcome) -> TurnOutcome {
        self.emit(SessionEvent::turn_finished(&self.session_id, &outcome));
        outcome
    }

    /// Runs `fut` unless the session closes first.
    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Moves to `next` and persists the change.
    async fn enter(&self, next: SessionState) -> Result<(), SessionError> {
        let (from, at) = {
            let mut inner = self.lock();
            let from = inner.state;
            if from == next {
                return Ok(());
            }
            if from == SessionState::Closed {
                return Err(SessionError::Closed(self.session_id.clone()));
            }
            if !from.can_transition_to(next) {
                return Err(SessionError::InvalidTransition { from, to: next });
            }
            let at = Utc::now();
            inner.state = next;
            inner.updated_at = at;
            self.emit(SessionEvent::StateChanged {
                session_id: self.session_id.clone(),
                from,
                to: next,
                at,
            });
            (from, at)
        };
        debug!(session_id = %self.session_id, %from, state = %next, "state changed");
        self.persist_state(next, at).await;
        Ok(())
    }

    async fn persist_state(&self, state: SessionState, at: DateTime<Utc>) {
        if let Err(e) = self
            .pipeline
            .store
            .record_state(&self.session_id, state, at)
            .await
        {
            warn!(session_id = %self.session_id, %state, error = %e, "failed to persist state");
        }
    }

    /// Closes the session, cancelling any in-flight provider call.
    ///
    /// Returns `false` if it was already closed.
    pub async fn close(&self, reason: CloseReason) -> bool {
        self.close_where(reason, |_| true).await
    }

    /// Closes the session if it has been idle for `idle_timeout` and neither
    /// a stream run nor an uploaded recording is being answered.
    pub async fn expire_if_idle(&self, idle_timeout: Duration) -> bool {
        self.close_where(CloseReason::IdleTimeout, |inner| {
            !inner.running
                && inner.artifacts == 0
                && !inner.state.is_busy()
                && inner.last_activity.elapsed() >= idle_timeout
        })
        .await
    }

    async fn close_where(
        &self,
        reason: CloseReason,
        should_close: impl FnOnce(&Inner) -> bool,
    ) -> bool {
        let at = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed || !should_close(&inner) {
                return false;
            }
            let from = inner.state;
            let at = Utc::now();
            inner.state = SessionState::Closed;
            inner.updated_at = at;
            inner.closed_at = Some(Instant::now());
            inner.pending.clear();
            inner.segmenter.reset();
            self.emit(SessionEvent::StateChanged {
                session_id: self.session_id.clone(),
                from,
                to: SessionState::Closed,
                at,
            });
            self.emit(SessionEvent::Closed {
                session_id: self.session_id.clone(),
                reason,
            });
            at
        };
        self.cancel.cancel();
        self.gate.close();
        info!(session_id = %self.session_id, reason = reason.as_str(), "session closed");
        self.persist_state(SessionState::Closed, at).await;
        true
    }

    /// Applies a metadata patch. Deactivating closes the session.
    pub async fn apply_patch(&self, patch: &SessionPatch) -> Result<SessionRecord, SessionError> {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(SessionError::Closed(self.session_id.clone()));
            }
            if let Some(user_id) = &patch.user_id {
                inner.user_id = Some(user_id.clone());
            }
        }
        if patch.is_active == Some(false) {
            self.close(CloseReason::Terminated).await;
        }
        Ok(self.snapshot())
    }
}

/// Releases the run flag if a drive ends early.
struct RunGuard<'a> {
    machine: &'a SessionStateMachine,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.machine.lock().running = false;
        }
    }
}

/// Counts an uploaded recording as in flight until its turn ends or is
/// dropped.
struct ArtifactGuard<'a>(&'a SessionStateMachine);

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        inner.artifacts = inner.artifacts.saturating_sub(1);
    }
}

/// Puts a session whose turn future was dropped mid-flight back into
/// `Listening`.
struct TurnGuard<'a>(&'a SessionStateMachine);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let machine = self.0;
        let at = {
            let mut inner = machine.lock();
            let from = inner.state;
            if !matches!(from, SessionState::Processing | SessionState::Speaking) {
                return;
            }
            let at = Utc::now();
            inner.state = SessionState::Listening;
            inner.updated_at = at;
            machine.emit(SessionEvent::StateChanged {
                session_id: machine.session_id.clone(),
                from,
                to: SessionState::Listening,
                at,
            });
            at
        };
        machine.gate.close();
        warn!(session_id = %machine.session_id, "turn abandoned, back to listening");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&machine.pipeline.store);
            let session_id = machine.session_id.clone();
            handle.spawn(async move {
                if let Err(e) = store
                    .record_state(&session_id, SessionState::Listening, at)
                    .await
                {
                    warn!(%session_id, error = %e, "failed to persist state");
                }
            });
        }
    }
}
