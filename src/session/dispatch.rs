//! # Inbound Dispatch
//!
//! One task per session drains the channel's inbound stream in arrival order
//! and routes each message to the transcript, playback and tool components.
//!
//! ## Per-Message Order:
//! 1. Transcript deltas (user, then assistant)
//! 2. Tool call cancellations, then new tool calls (spawned, never awaited)
//! 3. Assistant audio, decoded and scheduled back-to-back
//! 4. Interruption: flush playback, clear the assistant transcript
//! 5. Turn-complete and go-away notices (logged only)
//!
//! The loop also consumes playback-completion notices from the output device,
//! so the scheduler's active set is only ever touched from this task or from
//! teardown.

use crate::audio::codec::AudioFrameCodec;
use crate::audio::device::SegmentId;
use crate::audio::playback::PlaybackScheduler;
use crate::channel::{ChannelEvent, InboundMessage};
use crate::session::observer::SessionObserver;
use crate::tools::ToolDispatcher;
use crate::transcript::{Speaker, TranscriptReconciler, TranscriptSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchExit {
    /// Teardown asked the loop to stop.
    Cancelled,
    /// The remote side closed the channel.
    ChannelClosed(Option<String>),
    /// The channel reported a fault.
    ChannelFailed(String),
}

/// State owned by one session's dispatch task.
pub struct SessionDispatch {
    pub(crate) session_id: Uuid,
    pub(crate) inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pub(crate) completions: mpsc::UnboundedReceiver<SegmentId>,
    pub(crate) playback: Arc<Mutex<PlaybackScheduler>>,
    pub(crate) transcript: Arc<Mutex<TranscriptReconciler>>,
    pub(crate) tools: Arc<ToolDispatcher>,
    pub(crate) observer: Arc<dyn SessionObserver>,
    pub(crate) playback_sample_rate: u32,
    pub(crate) playback_channels: u16,
    pub(crate) cancel: CancellationToken,
}

impl SessionDispatch {
    /// Process events until cancelled or the channel ends.
    pub async fn run(mut self) -> DispatchExit {
        debug!(session_id = %self.session_id, "Dispatch loop started");

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break DispatchExit::Cancelled,

                Some(segment) = self.completions.recv() => {
                    self.playback.lock().complete(segment);
                }

                event = self.inbound.recv() => match event {
                    Some(ChannelEvent::Message(message)) => self.handle_message(message),
                    Some(ChannelEvent::Error(cause)) => break DispatchExit::ChannelFailed(cause),
                    Some(ChannelEvent::Closed(reason)) => break DispatchExit::ChannelClosed(reason),
                    None => break DispatchExit::ChannelClosed(None),
                },
            }
        };

        debug!(session_id = %self.session_id, exit = ?exit, "Dispatch loop stopped");
        exit
    }

    /// Handle one inbound message. Never awaits.
    pub fn handle_message(&self, message: InboundMessage) {
        if let Some(delta) = message.input_transcription.as_deref() {
            let snapshot = self.transcript.lock().apply(Speaker::User, delta);
            self.publish(snapshot);
        }
        if let Some(delta) = message.output_transcription.as_deref() {
            let snapshot = self.transcript.lock().apply(Speaker::Assistant, delta);
            self.publish(snapshot);
        }

        if !message.cancelled_tool_calls.is_empty() {
            self.tools.cancel(&message.cancelled_tool_calls);
        }
        for call in message.tool_calls {
            self.tools.dispatch(call);
        }

        for cause in &message.malformed_audio {
            warn!(session_id = %self.session_id, "Skipping malformed audio chunk: {}", cause);
        }
        for chunk in &message.audio_chunks {
            self.schedule_audio(chunk);
        }

        if message.interrupted {
            info!(session_id = %self.session_id, "Assistant interrupted, flushing playback");
            self.playback.lock().flush();
            let snapshot = self.transcript.lock().interrupt();
            self.publish(snapshot);
        }

        if message.turn_complete {
            debug!(session_id = %self.session_id, "Turn complete");
        }
        if let Some(time_left) = message.go_away {
            info!(session_id = %self.session_id, time_left = %time_left, "Server will close the session soon");
        }
    }

    fn schedule_audio(&self, chunk: &[u8]) {
        let buffer = match AudioFrameCodec::decode(
            chunk,
            self.playback_sample_rate,
            self.playback_channels,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(session_id = %self.session_id, kind = e.kind(), "Skipping audio chunk: {}", e);
                return;
            }
        };
        if buffer.frame_count() == 0 {
            return;
        }

        if let Err(e) = self.playback.lock().schedule(buffer) {
            warn!(session_id = %self.session_id, "Failed to schedule playback: {}", e);
        }
    }

    fn publish(&self, snapshot: TranscriptSnapshot) {
        self.observer
            .on_transcript_update(&snapshot.user, &snapshot.assistant);
    }
}
