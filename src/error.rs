//! # Error Handling
//!
//! Error taxonomy for the live session core. Only two kinds of failure are ever
//! visible to the UI layer; everything else is absorbed where it happens.
//!
//! ## Propagation Policy:
//! - **ConnectFailure / ChannelError**: reported through `SessionObserver::on_error`,
//!   the session is torn down, no automatic retry
//! - **MalformedAudio**: one audio segment is skipped, the session keeps running
//! - **ToolExecutionFailure**: the tool call resolves with fallback text instead
//! - **Config**: only surfaces from the binary while loading settings
//!
//! Collaborator traits (devices, search) return `anyhow::Result` and are mapped
//! into this enum at the boundary where the session consumes them.

use thiserror::Error;

/// Errors produced by the session core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Handshake with the remote service or device acquisition failed.
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// The channel reported a fault while the session was live.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// One audio payload could not be decoded.
    #[error("Malformed audio: {0}")]
    MalformedAudio(String),

    /// The search collaborator failed while serving a tool call.
    #[error("Tool execution failure: {0}")]
    ToolExecutionFailure(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this error is reported to the UI layer.
    ///
    /// Everything else is logged and handled locally.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectFailure(_) | SessionError::ChannelError(_)
        )
    }

    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::ConnectFailure(_) => "connect_failure",
            SessionError::ChannelError(_) => "channel_error",
            SessionError::MalformedAudio(_) => "malformed_audio",
            SessionError::ToolExecutionFailure(_) => "tool_execution_failure",
            SessionError::Config(_) => "config_error",
        }
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(err: base64::DecodeError) -> Self {
        SessionError::MalformedAudio(format!("base64 payload: {}", err))
    }
}

/// Shorthand for results that use the session error type.
pub type SessionResult<T> = Result<T, SessionError>;
