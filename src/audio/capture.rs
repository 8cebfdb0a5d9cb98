//! # Capture Bridge
//!
//! Moves microphone frames from the input device to the live session.
//!
//! ## Gating Rule:
//! A frame is forwarded only if a session is active *at the moment the frame is
//! delivered*. Otherwise it is dropped on the spot; nothing is buffered, so no
//! audio captured before the session exists, or after teardown begins, can
//! ever reach a session.
//!
//! ## Thread Safety:
//! The device may invoke the frame callback from its own thread while the
//! session lifecycle runs elsewhere. The gate is a `parking_lot::RwLock`. A
//! frame is sent while the read lock is held, so once `close()` has taken the
//! write lock and returned, no further frame can be queued.

use crate::audio::codec::AudioFrameCodec;
use crate::audio::device::{AudioInput, FrameCallback};
use crate::audio::frame::AudioFrame;
use crate::channel::OutboundHandle;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared "is a session active" switch plus the active session's outbound sink.
///
/// Owned by the session manager; the capture bridge only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    outbound: Arc<RwLock<Option<OutboundHandle>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route frames to `outbound` from now on.
    pub fn open(&self, outbound: OutboundHandle) {
        *self.outbound.write() = Some(outbound);
    }

    /// Stop routing frames. Idempotent.
    pub fn close(&self) {
        *self.outbound.write() = None;
    }

    pub fn is_open(&self) -> bool {
        self.outbound.read().is_some()
    }

    /// Queue an encoded frame on the active session's outbound stream.
    ///
    /// Returns `None` when the gate is closed, otherwise whether the sink took
    /// the frame. The send is non-blocking and happens under the read lock.
    pub fn send_audio(&self, data: Vec<u8>, sample_rate: u32) -> Option<bool> {
        let outbound = self.outbound.read();
        outbound
            .as_ref()
            .map(|handle| handle.send_audio(data, sample_rate))
    }
}

/// Counters shared with the frame callback.
#[derive(Debug, Default)]
pub struct CaptureStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureStats {
    pub fn frames_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the input device for the lifetime of one session.
pub struct CaptureBridge {
    input: Box<dyn AudioInput>,
    gate: SessionGate,
    frame_size: usize,
    stats: Arc<CaptureStats>,
    running: bool,
}

impl CaptureBridge {
    /// Wrap an acquired input device. Nothing is captured until `start`.
    pub fn new(input: Box<dyn AudioInput>, gate: SessionGate, frame_size: usize) -> Self {
        Self {
            input,
            gate,
            frame_size,
            stats: Arc::new(CaptureStats::default()),
            running: false,
        }
    }

    /// Install the frame callback and begin delivery.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.running {
            return Ok(());
        }

        let callback = Self::frame_callback(self.gate.clone(), self.stats.clone());
        self.input.start(self.frame_size, callback)?;
        self.running = true;

        info!(frame_size = self.frame_size, "Microphone capture started");
        Ok(())
    }

    /// Stop delivery and release the device.
    ///
    /// Safe to call any number of times; a failing device is logged, not
    /// propagated, so teardown always completes.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        if let Err(e) = self.input.stop() {
            warn!("Failed to stop microphone capture: {}", e);
        }

        info!(
            forwarded = self.stats.frames_forwarded(),
            dropped = self.stats.frames_dropped(),
            "Microphone capture stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Build the per-frame handler: encode, then forward through the gate.
    fn frame_callback(gate: SessionGate, stats: Arc<CaptureStats>) -> FrameCallback {
        Arc::new(move |frame: AudioFrame| {
            let data = AudioFrameCodec::encode(frame.samples());
            match gate.send_audio(data, frame.sample_rate()) {
                Some(true) => {
                    stats.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Some(false) => {
                    // Session sink already gone; teardown is in progress
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(sequence = frame.sequence(), "Capture frame discarded after teardown");
                }
                None => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutboundMessage;
    use crate::session::testing::MemoryInput;
    use tokio::sync::mpsc;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0.25; 4], 16_000, seq)
    }

    #[test]
    fn test_frames_dropped_while_gate_closed() {
        let input = MemoryInput::new();
        let gate = SessionGate::new();
        let mut bridge = CaptureBridge::new(Box::new(input.clone()), gate.clone(), 4);
        bridge.start().unwrap();

        input.emit(frame(0));
        input.emit(frame(1));

        let stats = bridge.stats();
        assert_eq!(stats.frames_forwarded(), 0);
        assert_eq!(stats.frames_dropped(), 2);
    }

    #[test]
    fn test_frames_forwarded_only_while_open() {
        let input = MemoryInput::new();
        let gate = SessionGate::new();
        let mut bridge = CaptureBridge::new(Box::new(input.clone()), gate.clone(), 4);
        bridge.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        input.emit(frame(0));
        gate.open(OutboundHandle::new(tx));
        input.emit(frame(1));
        gate.close();
        input.emit(frame(2));

        match rx.try_recv().unwrap() {
            OutboundMessage::Audio { data, sample_rate } => {
                assert_eq!(sample_rate, 16_000);
                assert_eq!(data, AudioFrameCodec::encode(&[0.25; 4]));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(bridge.stats().frames_forwarded(), 1);
        assert_eq!(bridge.stats().frames_dropped(), 2);
    }

    #[test]
    fn test_no_frame_queued_after_gate_close_returns() {
        let input = MemoryInput::new();
        let gate = SessionGate::new();
        let mut bridge = CaptureBridge::new(Box::new(input.clone()), gate.clone(), 4);
        bridge.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        gate.open(OutboundHandle::new(tx));

        // Another thread keeps delivering frames while the gate closes
        let producer = {
            let input = input.clone();
            std::thread::spawn(move || {
                for seq in 0..2_000 {
                    input.emit(frame(seq));
                }
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(1));
        gate.close();

        let mut queued_before_close = 0u64;
        while rx.try_recv().is_ok() {
            queued_before_close += 1;
        }
        producer.join().unwrap();

        assert!(rx.try_recv().is_err());
        let stats = bridge.stats();
        assert_eq!(stats.frames_forwarded(), queued_before_close);
        assert_eq!(stats.frames_forwarded() + stats.frames_dropped(), 2_000);
    }

    #[test]
    fn test_gate_send_reports_closed() {
        let gate = SessionGate::new();
        assert_eq!(gate.send_audio(vec![0, 0], 16_000), None);

        let (tx, mut rx) = mpsc::unbounded_channel();
        gate.open(OutboundHandle::new(tx));
        assert_eq!(gate.send_audio(vec![0, 0], 16_000), Some(true));
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert_eq!(gate.send_audio(vec![0, 0], 16_000), Some(false));
        gate.close();
        assert!(!gate.is_open());
        assert_eq!(gate.send_audio(vec![0, 0], 16_000), None);
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_device() {
        let input = MemoryInput::new();
        let mut bridge = CaptureBridge::new(Box::new(input.clone()), SessionGate::new(), 4);

        bridge.stop();
        assert_eq!(input.stop_count(), 0);

        bridge.start().unwrap();
        assert!(input.is_started());
        bridge.stop();
        bridge.stop();
        assert!(!input.is_started());
        assert_eq!(input.stop_count(), 1);

        // Frames after release never reach the callback
        input.emit(frame(9));
        assert_eq!(bridge.stats().frames_dropped(), 0);
    }
}
