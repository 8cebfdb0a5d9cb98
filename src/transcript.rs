//! # Transcript Reconciliation
//!
//! The service streams recognized speech for both speakers as small text
//! deltas. This module stitches them into two on-screen buffers, one per
//! speaker, and decides when a buffer starts over.
//!
//! ## Turn Boundaries:
//! A speaker's turn opens with its first delta and stays open until the other
//! speaker produces a delta. A delta that arrives while its own speaker's
//! turn is closed and the other speaker has text on screen starts a fresh
//! utterance, so that speaker's old text is cleared before the delta is
//! appended. Everything else appends, including the user's next words after
//! an interruption has emptied the assistant buffer.
//!
//! For `user:"a"`, `user:"b"`, `assistant:"x"`, `user:"c"` the snapshots are
//! `("a","")`, `("ab","")`, `("ab","x")`, `("c","x")`.
//!
//! Turn-complete signals from the service are deliberately not used: they do
//! not arrive reliably for both speakers.

use std::fmt;

/// Which side of the conversation a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn other(self) -> Speaker {
        match self {
            Speaker::User => Speaker::Assistant,
            Speaker::Assistant => Speaker::User,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Accumulated text for one speaker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptBuffer {
    text: String,
    turn_open: bool,
}

impl TranscriptBuffer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_turn_open(&self) -> bool {
        self.turn_open
    }

    fn clear(&mut self) {
        self.text.clear();
        self.turn_open = false;
    }
}

/// What the UI shows after each update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    pub user: String,
    pub assistant: String,
}

impl TranscriptSnapshot {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Two speaker buffers plus the reset policy.
///
/// Owned by the session's dispatch task; deltas are applied in arrival order.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    user: TranscriptBuffer,
    assistant: TranscriptBuffer,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one recognized-speech delta and return the resulting snapshot.
    pub fn apply(&mut self, speaker: Speaker, delta: &str) -> TranscriptSnapshot {
        let (own, other) = match speaker {
            Speaker::User => (&mut self.user, &mut self.assistant),
            Speaker::Assistant => (&mut self.assistant, &mut self.user),
        };

        if !own.turn_open && !other.text.is_empty() {
            own.text.clear();
        }
        own.turn_open = true;
        other.turn_open = false;
        own.text.push_str(delta);

        self.snapshot()
    }

    /// The user barged in: drop whatever the assistant was saying.
    pub fn interrupt(&mut self) -> TranscriptSnapshot {
        self.assistant.clear();
        self.snapshot()
    }

    /// Clear both buffers and turn state.
    pub fn reset(&mut self) {
        self.user.clear();
        self.assistant.clear();
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot::new(self.user.text.clone(), self.assistant.text.clone())
    }

    pub fn buffer(&self, speaker: Speaker) -> &TranscriptBuffer {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Assistant => &self.assistant,
        }
    }
}
