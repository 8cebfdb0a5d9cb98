//! # Live News Assistant
//!
//! Session core of a voice news assistant: one persistent bidirectional
//! streaming session with the Gemini Live service, carrying microphone audio
//! out and synthesized speech, transcripts and tool calls back in.
//!
//! ## Architecture:
//! - **audio**: codec, capture gating, playback scheduling, device traits
//! - **channel**: the live channel trait, wire model and WebSocket transport
//! - **transcript**: per-speaker transcript reconciliation
//! - **tools**: the `search_news` tool and its dispatcher
//! - **session**: the lifecycle state machine tying it all together
//! - **config** / **error**: settings and the error taxonomy

pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod session;
pub mod tools;
pub mod transcript;

pub use config::AppConfig;
pub use error::{SessionError, SessionResult};
pub use session::{SessionDeps, SessionManager, SessionObserver, SessionState};
