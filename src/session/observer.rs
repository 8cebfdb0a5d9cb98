//! Lifecycle callbacks exposed to the UI layer.

use crate::error::SessionError;
use tracing::{error, info};

/// Receives session lifecycle and transcript notifications.
///
/// Every method has an empty default so observers implement only what they
/// need. Callbacks run on the session's own tasks and must not block.
pub trait SessionObserver: Send + Sync {
    /// The session is live and audio flows in both directions.
    fn on_connect(&self) {}

    /// Teardown finished; the manager is back in `Disconnected`.
    fn on_disconnect(&self) {}

    /// A connect failure or mid-session channel fault.
    fn on_error(&self, _error: &SessionError) {}

    /// New transcript snapshot after a delta or an interruption.
    fn on_transcript_update(&self, _user: &str, _assistant: &str) {}
}

/// Observer that writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_connect(&self) {
        info!("Session connected");
    }

    fn on_disconnect(&self) {
        info!("Session disconnected");
    }

    fn on_error(&self, err: &SessionError) {
        error!(kind = err.kind(), "Session error: {}", err);
    }

    fn on_transcript_update(&self, user: &str, assistant: &str) {
        info!(user, assistant, "Transcript");
    }
}
