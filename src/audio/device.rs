//! # Audio Device Capability
//!
//! The session never talks to audio hardware directly. It acquires an input and
//! an output through the `AudioDevice` trait and holds the returned handles for
//! exactly as long as the session lives.
//!
//! ## Ownership:
//! - **AudioInput**: boxed and owned by the capture bridge; `start` installs the
//!   frame callback, `stop` removes it and releases the device
//! - **AudioOutput**: shared (`Arc`) between the playback scheduler and the
//!   device's own completion machinery
//!
//! Completion of a scheduled segment is reported as a message on the channel
//! passed to `open_output`, not as a callback into the scheduler.

use crate::audio::frame::{AudioFrame, PlaybackBuffer};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of one scheduled playback segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment-{}", self.0)
    }
}

/// Callback invoked by the input device for every captured frame.
///
/// May be called from a device thread, concurrently with session processing.
pub type FrameCallback = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Sender half used by an output device to report finished segments.
pub type CompletionSender = mpsc::UnboundedSender<SegmentId>;

/// A microphone-like source delivering fixed-size frames.
pub trait AudioInput: Send {
    /// Begin delivering frames of `frame_len` samples to `on_frame`.
    fn start(&mut self, frame_len: usize, on_frame: FrameCallback) -> anyhow::Result<()>;

    /// Stop delivery and release the device. Calling it again is a no-op.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// A sink that plays buffers at scheduled times on its own clock.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start at `start_at` seconds on the output clock.
    fn play(&self, id: SegmentId, buffer: PlaybackBuffer, start_at: f64) -> anyhow::Result<()>;

    /// Stop a queued or playing segment immediately.
    fn stop(&self, id: SegmentId) -> anyhow::Result<()>;

    /// Release the output. Segments still queued are discarded.
    fn close(&self) -> anyhow::Result<()>;
}

/// Factory for input and output handles.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Acquire the capture device at the given sample rate.
    async fn open_input(&self, sample_rate: u32) -> anyhow::Result<Box<dyn AudioInput>>;

    /// Acquire the playback device; finished segments are reported on `completions`.
    async fn open_output(
        &self,
        sample_rate: u32,
        channels: u16,
        completions: CompletionSender,
    ) -> anyhow::Result<Arc<dyn AudioOutput>>;
}
