//! # Live Channel
//!
//! The bidirectional message stream between the session and the remote
//! multimodal service, described in domain terms. The concrete Gemini Live
//! WebSocket transport lives in `gemini`; its JSON shapes live in `wire`.
//!
//! ## Message Flow:
//! - **Inbound**: `ChannelEvent`s arrive on an mpsc receiver that the session's
//!   dispatch task drains in arrival order
//! - **Outbound**: anything holding an `OutboundHandle` can enqueue audio chunks
//!   or tool responses; the transport writes them in order
//! - **Shutdown**: cancelling the connection's token closes the transport

pub mod gemini;
pub mod wire;

use crate::error::SessionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A tool-invocation request issued by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    /// String argument lookup; non-string values are ignored.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Answer to exactly one `ToolCall`, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: String,
}

/// One inbound message, already decoded from the wire.
///
/// A single message may carry several parts at once (for example an output
/// transcription delta together with an audio chunk); the dispatcher handles
/// them in a fixed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// "User speech recognized" delta
    pub input_transcription: Option<String>,
    /// "Assistant speech recognized" delta
    pub output_transcription: Option<String>,
    /// Assistant audio chunks as raw PCM bytes, in order
    pub audio_chunks: Vec<Vec<u8>>,
    /// Audio chunks whose transport encoding could not be decoded
    pub malformed_audio: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Ids of tool calls the service no longer wants answered
    pub cancelled_tool_calls: Vec<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
    /// Server announced it will close the connection soon
    pub go_away: Option<String>,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        *self == InboundMessage::default()
    }
}

/// What the inbound stream can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(InboundMessage),
    /// The transport failed mid-session
    Error(String),
    /// The remote side closed the stream
    Closed(Option<String>),
}

/// Messages the session sends to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// PCM16 little-endian microphone audio
    Audio { data: Vec<u8>, sample_rate: u32 },
    ToolResponse(ToolResponse),
}

/// Send-only capability on the outbound stream.
///
/// Cloned into the capture bridge (through the gate) and the tool dispatcher.
/// Once the session is torn down the receiving side is gone, and every send
/// is discarded.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Enqueue a message; returns `false` when the stream is already closed.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                debug!("Outbound stream closed, message discarded");
                false
            }
        }
    }

    pub fn send_audio(&self, data: Vec<u8>, sample_rate: u32) -> bool {
        self.send(OutboundMessage::Audio { data, sample_rate })
    }

    pub fn send_tool_response(&self, response: ToolResponse) -> bool {
        self.send(OutboundMessage::ToolResponse(response))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Declaration of a callable tool, advertised to the service at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema style parameter description
    pub parameters: Value,
}

/// Everything the channel needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
}

/// An open channel, split into its two directions plus a shutdown switch.
pub struct ChannelConnection {
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pub outbound: OutboundHandle,
    pub shutdown: CancellationToken,
}

/// Capability to open the bidirectional stream.
///
/// `open` resolves once the handshake has completed; a failed handshake is a
/// `ConnectFailure`.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn open(&self, setup: SessionSetup) -> SessionResult<ChannelConnection>;
}
