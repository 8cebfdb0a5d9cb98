//! In-memory collaborators for exercising the session without hardware or a
//! network: a manually clocked output, a push-driven input, a scripted
//! channel, a recording observer and a controllable news search.

use crate::audio::device::{
    AudioDevice, AudioInput, AudioOutput, CompletionSender, FrameCallback, SegmentId,
};
use crate::audio::frame::{AudioFrame, PlaybackBuffer};
use crate::channel::{
    ChannelConnection, ChannelEvent, LiveChannel, OutboundHandle, OutboundMessage, SessionSetup,
};
use crate::error::{SessionError, SessionResult};
use crate::session::observer::SessionObserver;
use crate::tools::NewsSearch;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A segment handed to `MemoryOutput::play`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSegment {
    pub id: SegmentId,
    pub start_at: f64,
    pub duration: f64,
}

/// Output device with a clock that only moves when the test says so.
#[derive(Default)]
pub struct MemoryOutput {
    clock: Mutex<f64>,
    started: Mutex<Vec<StartedSegment>>,
    stopped: Mutex<Vec<SegmentId>>,
    completions: Mutex<Option<CompletionSender>>,
    fail_next_play: AtomicBool,
    close_count: AtomicUsize,
}

impl MemoryOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_completions(completions: CompletionSender) -> Arc<Self> {
        let output = Self::default();
        *output.completions.lock() = Some(completions);
        Arc::new(output)
    }

    pub fn advance(&self, seconds: f64) {
        *self.clock.lock() += seconds;
    }

    pub fn started(&self) -> Vec<StartedSegment> {
        self.started.lock().clone()
    }

    pub fn stopped(&self) -> Vec<SegmentId> {
        self.stopped.lock().clone()
    }

    pub fn fail_next_play(&self) {
        self.fail_next_play.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Report `id` as finished, the way a real device would.
    pub fn finish(&self, id: SegmentId) {
        if let Some(tx) = self.completions.lock().as_ref() {
            let _ = tx.send(id);
        }
    }
}

impl AudioOutput for MemoryOutput {
    fn current_time(&self) -> f64 {
        *self.clock.lock()
    }

    fn play(&self, id: SegmentId, buffer: PlaybackBuffer, start_at: f64) -> anyhow::Result<()> {
        if self.fail_next_play.swap(false, Ordering::SeqCst) {
            anyhow::bail!("output rejected {}", id);
        }
        self.started.lock().push(StartedSegment {
            id,
            start_at,
            duration: buffer.duration(),
        });
        Ok(())
    }

    fn stop(&self, id: SegmentId) -> anyhow::Result<()> {
        self.stopped.lock().push(id);
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInputState {
    callback: Option<FrameCallback>,
    frame_len: usize,
    started: bool,
    stop_count: usize,
    fail_start: bool,
}

/// Input device driven by `emit` calls from the test.
#[derive(Clone, Default)]
pub struct MemoryInput {
    state: Arc<Mutex<MemoryInputState>>,
}

impl MemoryInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame if capture is running.
    pub fn emit(&self, frame: AudioFrame) {
        // Clone out of the lock so the callback runs unlocked
        let callback = self.state.lock().callback.clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stop_count
    }

    pub fn frame_len(&self) -> usize {
        self.state.lock().frame_len
    }

    pub fn fail_next_start(&self) {
        self.state.lock().fail_start = true;
    }
}

impl AudioInput for MemoryInput {
    fn start(&mut self, frame_len: usize, on_frame: FrameCallback) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_start) {
            anyhow::bail!("microphone unavailable");
        }
        state.callback = Some(on_frame);
        state.frame_len = frame_len;
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.started {
            state.stop_count += 1;
        }
        state.callback = None;
        state.started = false;
        Ok(())
    }
}

/// Device handing out one shared `MemoryInput` and a fresh `MemoryOutput` per open.
#[derive(Default)]
pub struct MemoryDevice {
    input: MemoryInput,
    outputs: Mutex<Vec<Arc<MemoryOutput>>>,
    fail_input: AtomicBool,
    fail_output: AtomicBool,
}

impl MemoryDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn input(&self) -> MemoryInput {
        self.input.clone()
    }

    pub fn outputs(&self) -> Vec<Arc<MemoryOutput>> {
        self.outputs.lock().clone()
    }

    pub fn last_output(&self) -> Option<Arc<MemoryOutput>> {
        self.outputs.lock().last().cloned()
    }

    pub fn fail_input(&self) {
        self.fail_input.store(true, Ordering::SeqCst);
    }

    pub fn fail_output(&self) {
        self.fail_output.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioDevice for MemoryDevice {
    async fn open_input(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn AudioInput>> {
        if self.fail_input.swap(false, Ordering::SeqCst) {
            anyhow::bail!("microphone permission denied");
        }
        Ok(Box::new(self.input.clone()))
    }

    async fn open_output(
        &self,
        _sample_rate: u32,
        _channels: u16,
        completions: CompletionSender,
    ) -> anyhow::Result<Arc<dyn AudioOutput>> {
        if self.fail_output.swap(false, Ordering::SeqCst) {
            anyhow::bail!("no output device");
        }
        let output = MemoryOutput::with_completions(completions);
        self.outputs.lock().push(output.clone());
        Ok(output)
    }
}

/// Test-side ends of one scripted connection.
pub struct ScriptedRemote {
    pub setup: SessionSetup,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub shutdown: CancellationToken,
}

impl ScriptedRemote {
    /// Next outbound message, waiting up to two seconds.
    pub async fn next_outbound(&mut self) -> Option<OutboundMessage> {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain everything already queued.
    pub fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            drained.push(message);
        }
        drained
    }
}

/// Channel whose connections are driven by the test.
#[derive(Default)]
pub struct ScriptedChannel {
    remotes: Mutex<VecDeque<ScriptedRemote>>,
    open_count: AtomicUsize,
    fail_next_open: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test side of the oldest connection not yet claimed.
    pub fn take_remote(&self) -> Option<ScriptedRemote> {
        self.remotes.lock().pop_front()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Make every later handshake take `delay` before it completes.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl LiveChannel for ScriptedChannel {
    async fn open(&self, setup: SessionSetup) -> SessionResult<ChannelConnection> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(SessionError::ConnectFailure("handshake refused".to_string()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        self.remotes.lock().push_back(ScriptedRemote {
            setup,
            events: events_tx,
            outbound: outbound_rx,
            shutdown: shutdown.clone(),
        });

        Ok(ChannelConnection {
            inbound: events_rx,
            outbound: OutboundHandle::new(outbound_tx),
            shutdown,
        })
    }
}

/// One notification seen by `RecordingObserver`.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Connected,
    Disconnected,
    Error(SessionError),
    Transcript(String, String),
}

/// Observer that remembers every notification in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Lifecycle notifications only, transcripts filtered out.
    pub fn lifecycle(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| !matches!(e, ObservedEvent::Transcript(..)))
            .cloned()
            .collect()
    }

    pub fn transcripts(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Transcript(user, assistant) => {
                    Some((user.clone(), assistant.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connect(&self) {
        self.events.lock().push(ObservedEvent::Connected);
    }

    fn on_disconnect(&self) {
        self.events.lock().push(ObservedEvent::Disconnected);
    }

    fn on_error(&self, error: &SessionError) {
        self.events.lock().push(ObservedEvent::Error(error.clone()));
    }

    fn on_transcript_update(&self, user: &str, assistant: &str) {
        self.events
            .lock()
            .push(ObservedEvent::Transcript(user.to_string(), assistant.to_string()));
    }
}

/// News search whose answers the test releases explicitly.
///
/// Topics registered with `hold` wait for the returned sender; any other
/// topic answers immediately.
#[derive(Default)]
pub struct ControlledSearch {
    held: Mutex<HashMap<String, oneshot::Receiver<anyhow::Result<String>>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ControlledSearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hold(&self, topic: &str) -> oneshot::Sender<anyhow::Result<String>> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().insert(topic.to_string(), rx);
        tx
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl NewsSearch for ControlledSearch {
    async fn search(&self, topic: &str, date: Option<&str>) -> anyhow::Result<String> {
        self.calls
            .lock()
            .push((topic.to_string(), date.map(str::to_string)));

        let held = self.held.lock().remove(topic);
        match held {
            Some(rx) => rx
                .await
                .map_err(|_| anyhow::anyhow!("search for {} abandoned", topic))?,
            None => Ok(format!("Top stories about {}", topic)),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
