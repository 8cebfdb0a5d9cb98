//! # Live Session Management
//!
//! Top-level state machine for the one live conversation. The manager owns
//! the channel lifecycle and wires the audio, transcript and tool components
//! to the inbound and outbound streams.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: acquire the output and input devices, open the channel
//! 2. **Active**: capture gate open, microphone running, dispatch task draining
//!    inbound messages
//! 3. **Disconnecting**: close the gate, stop capture, abort tool calls, stop
//!    dispatch, flush and close playback, close the channel
//! 4. **Disconnected**: transcript buffers cleared, observer notified
//!
//! `Error` sits between a failure and teardown and is only ever visible while
//! the observer's `on_error` runs.
//!
//! ## Concurrency:
//! `connect` and `disconnect` serialize on one async mutex that also holds the
//! live session, so two sessions can never exist at once. A `disconnect` issued
//! while a handshake is in flight cancels it instead of waiting it out. A
//! channel close or error seen by the dispatch task tears down *that* session
//! only; a signal arriving after the session was already replaced is ignored.

pub mod dispatch;
pub mod observer;
pub mod state;

#[cfg(test)]
pub mod testing;

use crate::audio::capture::{CaptureBridge, CaptureStats, SessionGate};
use crate::audio::device::{AudioDevice, AudioOutput};
use crate::audio::playback::PlaybackScheduler;
use crate::channel::{LiveChannel, SessionSetup};
use crate::config::AppConfig;
use crate::error::{SessionError, SessionResult};
use crate::tools::{search_news_declaration, NewsSearch, ToolDispatcher};
use crate::transcript::TranscriptReconciler;
use chrono::{DateTime, Utc};
use dispatch::{DispatchExit, SessionDispatch};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use observer::{LoggingObserver, SessionObserver};
pub use state::SessionState;

/// Everything one live session owns. Dropped at the end of teardown.
pub struct LiveSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    capture: CaptureBridge,
    tools: Arc<ToolDispatcher>,
    playback: Arc<Mutex<PlaybackScheduler>>,
    transcript: Arc<Mutex<TranscriptReconciler>>,
    dispatch: JoinHandle<()>,
    dispatch_cancel: CancellationToken,
    channel_shutdown: CancellationToken,
}

/// Collaborators the manager is built from.
pub struct SessionDeps {
    pub channel: Arc<dyn LiveChannel>,
    pub device: Arc<dyn AudioDevice>,
    pub search: Arc<dyn NewsSearch>,
    pub observer: Arc<dyn SessionObserver>,
}

struct Inner {
    config: AppConfig,
    deps: SessionDeps,
    gate: SessionGate,
    state: RwLock<SessionState>,
    session: tokio::sync::Mutex<Option<LiveSession>>,
    /// Cancels the handshake of a `connect` in progress.
    establishing: Mutex<Option<CancellationToken>>,
    capture_stats: RwLock<Option<Arc<CaptureStats>>>,
}

/// Entry point for the UI layer.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: AppConfig, deps: SessionDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                gate: SessionGate::new(),
                state: RwLock::new(SessionState::Disconnected),
                session: tokio::sync::Mutex::new(None),
                establishing: Mutex::new(None),
                capture_stats: RwLock::new(None),
            }),
        }
    }

    /// Start a session with the given system instruction.
    ///
    /// A session that is already live is fully torn down first.
    pub async fn connect(&self, system_instruction: &str) -> SessionResult<()> {
        let mut slot = self.inner.session.lock().await;

        if let Some(previous) = slot.take() {
            info!(session_id = %previous.id, "Replacing live session");
            self.inner.teardown(previous, None).await;
        }

        let cancel = CancellationToken::new();
        *self.inner.establishing.lock() = Some(cancel.clone());
        self.inner.set_state(SessionState::Connecting);
        let result = self.inner.establish(system_instruction, &cancel).await;
        self.inner.establishing.lock().take();

        match result {
            Ok(Some(session)) => {
                info!(session_id = %session.id, "Session active");
                *slot = Some(session);
                self.inner.set_state(SessionState::Active);
                self.inner.deps.observer.on_connect();
                Ok(())
            }
            Ok(None) => {
                info!("Connect cancelled by disconnect");
                self.inner.set_state(SessionState::Disconnecting);
                self.inner.finish_teardown();
                Err(SessionError::ConnectFailure("Connect cancelled".to_string()))
            }
            Err(err) => {
                self.inner.fail(&err);
                self.inner.set_state(SessionState::Disconnecting);
                self.inner.finish_teardown();
                Err(err)
            }
        }
    }

    /// End the live session, if any. From `Disconnected` this does nothing.
    ///
    /// A handshake still in progress is abandoned.
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.inner.establishing.lock().as_ref() {
            cancel.cancel();
        }
        let mut slot = self.inner.session.lock().await;
        match slot.take() {
            Some(session) => self.inner.teardown(session, None).await,
            None => debug!("Disconnect requested with no live session"),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Identity of the live session.
    pub async fn session_id(&self) -> Option<Uuid> {
        self.inner.session.lock().await.as_ref().map(|s| s.id)
    }

    /// Capture counters of the current (or most recent) session.
    pub fn capture_stats(&self) -> Option<Arc<CaptureStats>> {
        self.inner.capture_stats.read().clone()
    }
}

impl Inner {
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "Session state change");
            *state = next;
        } else {
            warn!(from = %*state, to = %next, "Rejected illegal session state change");
        }
    }

    /// Enter `Error` and report a user-visible failure.
    fn fail(&self, err: &SessionError) {
        warn!(kind = err.kind(), "Session failed: {}", err);
        self.set_state(SessionState::Error);
        self.deps.observer.on_error(err);
    }

    /// Acquire devices, open the channel and start the session's tasks.
    ///
    /// Anything acquired before a failing step is released before returning.
    /// `Ok(None)` means `cancel` fired before the channel was open.
    async fn establish(
        self: &Arc<Self>,
        system_instruction: &str,
        cancel: &CancellationToken,
    ) -> SessionResult<Option<LiveSession>> {
        let audio = &self.config.audio;
        let session_id = Uuid::new_v4();

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let output = self
            .deps
            .device
            .open_output(audio.playback_sample_rate, audio.playback_channels, completions_tx)
            .await
            .map_err(|e| SessionError::ConnectFailure(format!("Playback device: {}", e)))?;

        let input = match self.deps.device.open_input(audio.capture_sample_rate).await {
            Ok(input) => input,
            Err(e) => {
                close_output(output.as_ref());
                return Err(SessionError::ConnectFailure(format!("Microphone: {}", e)));
            }
        };

        let setup = SessionSetup {
            model: self.config.live.model.clone(),
            voice: self.config.live.voice.clone(),
            system_instruction: system_instruction.to_string(),
            tools: vec![search_news_declaration()],
        };
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.deps.channel.open(setup) => Some(opened),
        };
        let connection = match opened {
            Some(Ok(connection)) => connection,
            None => {
                close_output(output.as_ref());
                return Ok(None);
            }
            Some(Err(err)) => {
                close_output(output.as_ref());
                return Err(match err {
                    err @ SessionError::ConnectFailure(_) => err,
                    other => SessionError::ConnectFailure(other.to_string()),
                });
            }
        };

        let playback = Arc::new(Mutex::new(PlaybackScheduler::new(output)));
        let transcript = Arc::new(Mutex::new(TranscriptReconciler::new()));
        let tools = Arc::new(ToolDispatcher::new(
            self.deps.search.clone(),
            connection.outbound.clone(),
            &self.config.tools.fallback_result,
        ));

        let mut capture = CaptureBridge::new(input, self.gate.clone(), audio.capture_frame_size);
        self.gate.open(connection.outbound.clone());
        if let Err(e) = capture.start() {
            self.gate.close();
            connection.shutdown.cancel();
            playback.lock().close();
            return Err(SessionError::ConnectFailure(format!("Microphone: {}", e)));
        }
        *self.capture_stats.write() = Some(capture.stats());

        let dispatch_cancel = CancellationToken::new();
        let dispatch = SessionDispatch {
            session_id,
            inbound: connection.inbound,
            completions: completions_rx,
            playback: playback.clone(),
            transcript: transcript.clone(),
            tools: tools.clone(),
            observer: self.deps.observer.clone(),
            playback_sample_rate: audio.playback_sample_rate,
            playback_channels: audio.playback_channels,
            cancel: dispatch_cancel.clone(),
        };
        let dispatch = tokio::spawn(supervise(Arc::downgrade(self), dispatch));

        Ok(Some(LiveSession {
            id: session_id,
            started_at: Utc::now(),
            capture,
            tools,
            playback,
            transcript,
            dispatch,
            dispatch_cancel,
            channel_shutdown: connection.shutdown,
        }))
    }

    /// Release everything the session owns, then report `Disconnected`.
    ///
    /// Each step runs regardless of earlier failures.
    async fn teardown(&self, mut session: LiveSession, cause: Option<SessionError>) {
        if let Some(err) = cause {
            self.fail(&err);
        }
        self.set_state(SessionState::Disconnecting);
        info!(session_id = %session.id, "Tearing down session");

        self.gate.close();
        session.capture.stop();
        session.tools.cancel_all();

        session.dispatch_cancel.cancel();
        if let Err(e) = (&mut session.dispatch).await {
            warn!(session_id = %session.id, "Dispatch task ended abnormally: {}", e);
        }

        session.playback.lock().close();
        session.channel_shutdown.cancel();
        session.transcript.lock().reset();

        let lifetime = Utc::now() - session.started_at;
        info!(
            session_id = %session.id,
            seconds = lifetime.num_seconds(),
            "Session closed"
        );
        self.finish_teardown();
    }

    fn finish_teardown(&self) {
        self.set_state(SessionState::Disconnected);
        self.deps.observer.on_disconnect();
    }

    /// Tear down `session_id` if it is still the live session.
    async fn end_session(&self, session_id: Uuid, cause: Option<SessionError>) {
        let mut slot = self.session.lock().await;
        // Copy the id out: a borrow of the session can't live across the teardown await
        let live_id = slot.as_ref().map(|session| session.id);
        if live_id != Some(session_id) {
            debug!(session_id = %session_id, "Ignoring end signal from a replaced session");
            return;
        }
        if let Some(session) = slot.take() {
            self.teardown(session, cause).await;
        }
    }
}

fn close_output(output: &dyn AudioOutput) {
    if let Err(e) = output.close() {
        warn!("Failed to release playback device: {}", e);
    }
}

/// Run the dispatch loop and turn a channel-side exit into session teardown.
async fn supervise(manager: Weak<Inner>, dispatch: SessionDispatch) {
    let session_id = dispatch.session_id;
    let cause = match dispatch.run().await {
        DispatchExit::Cancelled => return,
        DispatchExit::ChannelClosed(reason) => {
            info!(session_id = %session_id, reason = ?reason, "Channel closed by remote");
            None
        }
        DispatchExit::ChannelFailed(cause) => Some(SessionError::ChannelError(cause)),
    };

    // Teardown awaits this task, so it has to run on its own
    if let Some(inner) = manager.upgrade() {
        tokio::spawn(async move { inner.end_session(session_id, cause).await });
    }
}
