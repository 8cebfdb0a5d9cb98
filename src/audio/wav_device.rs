//! # WAV File Device
//!
//! A headless `AudioDevice`: the "microphone" replays a 16-bit PCM WAV file
//! and the "speaker" records everything scheduled on it into another WAV
//! file. Used by the binary to drive a real session without sound hardware.
//!
//! ## Input:
//! Samples are cut into frames of the requested length (the last frame is
//! zero-padded) and delivered from a Tokio task, paced at real time unless
//! pacing is disabled. When the file is exhausted the device's `input_finished`
//! token is cancelled.
//!
//! ## Output:
//! The clock is wall time since the output was opened. Each segment is written
//! into the recording at its start time, and a timer reports completion when
//! the segment's end time passes. Stopping a segment cuts the recording at the
//! current clock. The file is written on `close`.

use crate::audio::codec::AudioFrameCodec;
use crate::audio::device::{
    AudioDevice, AudioInput, AudioOutput, CompletionSender, FrameCallback, SegmentId,
};
use crate::audio::frame::{AudioFrame, PlaybackBuffer};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wav::{BitDepth, Header};

/// File-backed replacement for a microphone and speaker.
#[derive(Debug, Clone)]
pub struct WavFileDevice {
    input_path: PathBuf,
    output_path: Option<PathBuf>,
    paced: bool,
    input_finished: CancellationToken,
}

impl WavFileDevice {
    /// Replay `input_path` as the microphone; record playback to `output_path` if given.
    pub fn new(input_path: impl Into<PathBuf>, output_path: Option<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path,
            paced: true,
            input_finished: CancellationToken::new(),
        }
    }

    /// Deliver frames as fast as possible instead of at real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Cancelled once the whole input file has been delivered.
    pub fn input_finished(&self) -> CancellationToken {
        self.input_finished.clone()
    }
}

#[async_trait]
impl AudioDevice for WavFileDevice {
    async fn open_input(&self, sample_rate: u32) -> Result<Box<dyn AudioInput>> {
        let path = self.input_path.clone();
        let samples = tokio::task::spawn_blocking(move || read_mono(&path, sample_rate))
            .await
            .context("WAV reader task failed")??;

        info!(
            path = %self.input_path.display(),
            samples = samples.len(),
            sample_rate,
            "Opened WAV input"
        );
        Ok(Box::new(WavFileInput {
            samples: Arc::from(samples),
            sample_rate,
            paced: self.paced,
            finished: self.input_finished.clone(),
            stop: None,
        }))
    }

    async fn open_output(
        &self,
        sample_rate: u32,
        channels: u16,
        completions: CompletionSender,
    ) -> Result<Arc<dyn AudioOutput>> {
        if channels == 0 {
            bail!("output needs at least one channel");
        }
        Ok(Arc::new(WavFileOutput {
            path: self.output_path.clone(),
            sample_rate,
            channels,
            opened_at: Instant::now(),
            completions,
            recording: Mutex::new(Vec::new()),
            timers: Arc::new(Mutex::new(HashMap::new())),
            closed: Mutex::new(false),
        }))
    }
}

/// Read a 16-bit (or float) WAV file as mono `f32` samples at `sample_rate`.
// wav 1.x deprecates the `BitDepth` variants and `channel_count` it still exposes
#[allow(deprecated)]
fn read_mono(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let mut file =
        File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let (header, data) =
        wav::read(&mut file).with_context(|| format!("Cannot parse {}", path.display()))?;

    if header.sampling_rate != sample_rate {
        bail!(
            "{} is {} Hz, capture needs {} Hz",
            path.display(),
            header.sampling_rate,
            sample_rate
        );
    }

    let interleaved: Vec<f32> = match data {
        BitDepth::Sixteen(samples) => samples.into_iter().map(AudioFrameCodec::from_pcm16).collect(),
        BitDepth::ThirtyTwoFloat(samples) => samples,
        _ => bail!("{} must be 16-bit PCM or 32-bit float", path.display()),
    };

    // Keep the first channel of multi-channel input
    let channels = header.channel_count.max(1) as usize;
    Ok(interleaved.into_iter().step_by(channels).collect())
}

struct WavFileInput {
    samples: Arc<[f32]>,
    sample_rate: u32,
    paced: bool,
    finished: CancellationToken,
    stop: Option<CancellationToken>,
}

impl AudioInput for WavFileInput {
    fn start(&mut self, frame_len: usize, on_frame: FrameCallback) -> Result<()> {
        if frame_len == 0 {
            bail!("frame length must be positive");
        }
        if self.stop.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("WAV input needs a Tokio runtime: {}", e))?;

        let stop = CancellationToken::new();
        self.stop = Some(stop.clone());

        let samples = self.samples.clone();
        let sample_rate = self.sample_rate;
        let frame_period = Duration::from_secs_f64(frame_len as f64 / sample_rate as f64);
        let paced = self.paced;
        let finished = self.finished.clone();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            for (sequence, chunk) in samples.chunks(frame_len).enumerate() {
                if paced {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = ticker.tick() => {}
                    }
                } else if stop.is_cancelled() {
                    return;
                } else {
                    tokio::task::yield_now().await;
                }

                let mut frame = chunk.to_vec();
                frame.resize(frame_len, 0.0);
                on_frame(AudioFrame::new(frame, sample_rate, sequence as u64));
            }
            debug!("WAV input exhausted");
            finished.cancel();
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        Ok(())
    }
}

impl Drop for WavFileInput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

type TimerMap = Arc<Mutex<HashMap<SegmentId, AbortHandle>>>;

struct WavFileOutput {
    path: Option<PathBuf>,
    sample_rate: u32,
    channels: u16,
    opened_at: Instant,
    completions: CompletionSender,
    /// Interleaved samples, index 0 at clock 0
    recording: Mutex<Vec<f32>>,
    timers: TimerMap,
    closed: Mutex<bool>,
}

impl WavFileOutput {
    fn sample_index(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate as f64).round() as usize * self.channels as usize
    }

    #[allow(deprecated)]
    fn write_file(&self, path: &Path) -> Result<()> {
        let samples: Vec<i16> = self
            .recording
            .lock()
            .iter()
            .map(|s| AudioFrameCodec::to_pcm16(*s))
            .collect();
        let header = Header::new(wav::header::WAV_FORMAT_PCM, self.channels, self.sample_rate, 16);

        let mut file =
            File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        wav::write(header, &BitDepth::Sixteen(samples), &mut file)
            .with_context(|| format!("Cannot write {}", path.display()))?;
        Ok(())
    }
}

impl AudioOutput for WavFileOutput {
    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn play(&self, id: SegmentId, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if *self.closed.lock() {
            bail!("output closed");
        }
        if buffer.channel_count() != self.channels as usize {
            bail!(
                "{} has {} channels, output has {}",
                id,
                buffer.channel_count(),
                self.channels
            );
        }

        {
            let mut recording = self.recording.lock();
            let start = self.sample_index(start_at);
            let end = start + buffer.frame_count() * self.channels as usize;
            if recording.len() < end {
                recording.resize(end, 0.0);
            }
            for ch in 0..buffer.channel_count() {
                let Some(samples) = buffer.channel(ch) else { continue };
                for (frame, sample) in samples.iter().enumerate() {
                    recording[start + frame * self.channels as usize + ch] = *sample;
                }
            }
        }

        let end_time = start_at + buffer.duration();
        let wait = Duration::from_secs_f64((end_time - self.current_time()).max(0.0));
        let completions = self.completions.clone();
        let timers = self.timers.clone();

        let mut pending = self.timers.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            timers.lock().remove(&id);
            let _ = completions.send(id);
        });
        pending.insert(id, timer.abort_handle());
        Ok(())
    }

    fn stop(&self, id: SegmentId) -> Result<()> {
        if let Some(timer) = self.timers.lock().remove(&id) {
            timer.abort();
        }
        let cut = self.sample_index(self.current_time());
        let mut recording = self.recording.lock();
        if recording.len() > cut {
            recording.truncate(cut);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }

        match &self.path {
            Some(path) => {
                self.write_file(path)?;
                info!(
                    path = %path.display(),
                    seconds = self.recording.lock().len() as f64
                        / (self.sample_rate as f64 * self.channels as f64),
                    "Recorded assistant audio"
                );
            }
            None => debug!("Playback output closed without recording"),
        }
        Ok(())
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to finalize WAV output: {}", e);
        }
    }
}
