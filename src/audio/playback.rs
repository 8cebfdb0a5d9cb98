//! # Playback Scheduling
//!
//! Schedules decoded assistant speech back-to-back on the output clock.
//!
//! ## Cursor Invariant:
//! Every new segment starts at `max(cursor, now)` and the cursor advances by
//! exactly that segment's duration right after scheduling. Segments therefore
//! never overlap, and a gap only appears when the output clock has already
//! moved past the cursor (the network delivered audio late).
//!
//! ## Interruption:
//! `flush` stops everything that is queued or playing, forgets it, and pulls
//! the cursor back to the current clock so the next response starts at once.

use crate::audio::device::{AudioOutput, SegmentId};
use crate::audio::frame::PlaybackBuffer;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where and for how long a segment was placed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledSegment {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Owns the "next start time" cursor and the set of active segments.
///
/// ## Thread Safety:
/// Not shared. The session's dispatch task owns the scheduler and is the only
/// caller, which is what keeps segments in strict arrival order.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    next_start_time: f64,
    active: BTreeSet<SegmentId>,
    next_segment: u64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let next_start_time = output.current_time();
        Self {
            output,
            next_start_time,
            active: BTreeSet::new(),
            next_segment: 0,
            closed: false,
        }
    }

    /// Schedule a buffer right after everything scheduled before it.
    ///
    /// ## State Changes:
    /// - start = max(cursor, now)
    /// - cursor = start + duration
    /// - segment joins the active set until the output reports completion
    ///
    /// If the output rejects the segment the cursor and the active set are left
    /// untouched and the error is returned.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> anyhow::Result<ScheduledSegment> {
        if self.closed {
            return Err(anyhow::anyhow!("playback output already closed"));
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration();
        let id = SegmentId(self.next_segment);

        self.output.play(id, buffer, start_time)?;

        self.next_segment += 1;
        self.next_start_time = start_time + duration;
        self.active.insert(id);

        debug!(
            segment = %id,
            start_time,
            duration,
            active = self.active.len(),
            "Scheduled playback segment"
        );

        Ok(ScheduledSegment {
            id,
            start_time,
            duration,
        })
    }

    /// Playback of `id` finished on the output.
    pub fn complete(&mut self, id: SegmentId) {
        if self.active.remove(&id) {
            debug!(segment = %id, "Playback segment finished");
        }
    }

    /// Stop all active segments and reset the cursor to the output clock.
    ///
    /// Safe to call with nothing scheduled, and safe to call repeatedly.
    pub fn flush(&mut self) {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active) {
            if let Err(e) = self.output.stop(id) {
                warn!(segment = %id, "Failed to stop playback segment: {}", e);
            }
        }

        self.next_start_time = self.output.current_time();
        if stopped > 0 {
            debug!(stopped, cursor = self.next_start_time, "Flushed playback");
        }
    }

    /// Flush and release the output device.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        if let Err(e) = self.output.close() {
            warn!("Failed to close playback output: {}", e);
        }
        self.closed = true;
    }

    /// Current value of the "next start time" cursor.
    pub fn cursor(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: SegmentId) -> bool {
        self.active.contains(&id)
    }
}
