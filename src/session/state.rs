//! Session lifecycle states and the transitions allowed between them.

use std::fmt;

/// Current lifecycle state of the session manager.
///
/// ## Lifecycle:
/// Disconnected → Connecting → Active → Disconnecting → Disconnected
///
/// `Error` is entered from `Connecting` or `Active` and always continues to
/// `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Active,
    Disconnecting,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Active)
                | (Connecting, Error)
                | (Connecting, Disconnecting)
                | (Active, Disconnecting)
                | (Active, Error)
                | (Error, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }

    /// A session exists (or is being established) in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
