//! # Audio Frames and Playable Buffers
//!
//! Value types that move through the audio pipeline:
//! - **AudioFrame**: one fixed-size block of mono capture samples, immutable once produced
//! - **PlaybackBuffer**: decoded assistant speech ready to be scheduled on the output
//!
//! Both own their sample data. A frame is handed from the device callback to the
//! capture bridge and dropped right after encoding; a playback buffer is handed
//! from the codec to the scheduler and then to the output device.

use std::sync::Arc;

/// A fixed-length block of single-channel samples.
///
/// ## Immutability:
/// Fields are private and the samples live behind an `Arc<[f32]>`, so a frame
/// can be cloned cheaply but never modified after the producer creates it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// Create a frame from captured samples.
    ///
    /// ## Parameters:
    /// - **samples**: Mono samples in the range [-1.0, 1.0]
    /// - **sample_rate**: Rate the samples were captured at (16 kHz for the microphone)
    /// - **sequence**: Position of this frame in the capture stream
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the frame in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decoded audio ready for playback.
///
/// Samples are stored per channel (de-interleaved), each channel holding the
/// same number of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Build a single-channel buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|c| c.as_slice())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Playback duration in seconds.
    ///
    /// ## Calculation:
    /// Duration = frame_count / sample_rate
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}
