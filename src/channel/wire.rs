//! # Gemini Live Wire Format
//!
//! JSON shapes exchanged over the `BidiGenerateContent` WebSocket. Each client
//! frame is an object with exactly one top-level key naming its kind
//! (`setup`, `realtimeInput`, `toolResponse`); server frames may carry several
//! optional parts at once.
//!
//! Unknown server fields are ignored so newer service revisions keep parsing.

use crate::channel::{InboundMessage, OutboundMessage, SessionSetup, ToolCall, ToolDeclaration};
use crate::error::SessionError;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
    pub input_audio_transcription: Value,
    pub output_audio_transcription: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload tagged with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseBody {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl From<&ToolDeclaration> for FunctionDeclaration {
    fn from(decl: &ToolDeclaration) -> Self {
        Self {
            name: decl.name.clone(),
            description: decl.description.clone(),
            parameters: decl.parameters.clone(),
        }
    }
}

impl ClientMessage {
    /// First frame of every session.
    pub fn setup(setup: &SessionSetup) -> Self {
        let tools = if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: setup.tools.iter().map(FunctionDeclaration::from).collect(),
            }]
        };

        ClientMessage::Setup(Setup {
            model: setup.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(setup.system_instruction.clone()),
                    inline_data: None,
                }],
            },
            tools,
            input_audio_transcription: json!({}),
            output_audio_transcription: json!({}),
        })
    }

    /// Map a domain-level outbound message onto its wire frame.
    pub fn from_outbound(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Audio { data, sample_rate } => {
                ClientMessage::RealtimeInput(RealtimeInput {
                    media_chunks: vec![Blob {
                        mime_type: format!("audio/pcm;rate={}", sample_rate),
                        data: B64.encode(data),
                    }],
                })
            }
            OutboundMessage::ToolResponse(response) => {
                ClientMessage::ToolResponse(ToolResponseBody {
                    function_responses: vec![FunctionResponse {
                        id: response.id,
                        name: response.name,
                        response: json!({ "result": response.result }),
                    }],
                })
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBody>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBody {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Convert into the domain message, decoding audio payloads.
    ///
    /// Audio parts whose base64 cannot be decoded are reported in
    /// `malformed_audio` rather than failing the whole message.
    pub fn into_inbound(self) -> InboundMessage {
        let mut inbound = InboundMessage::default();

        if let Some(content) = self.server_content {
            inbound.input_transcription = content.input_transcription.and_then(|t| t.text);
            inbound.output_transcription = content.output_transcription.and_then(|t| t.text);
            inbound.turn_complete = content.turn_complete.unwrap_or(false);
            inbound.interrupted = content.interrupted.unwrap_or(false);

            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for blob in parts.into_iter().filter_map(|p| p.inline_data) {
                if !blob.mime_type.starts_with("audio/") {
                    continue;
                }
                match B64.decode(blob.data.as_bytes()) {
                    Ok(bytes) => inbound.audio_chunks.push(bytes),
                    Err(e) => inbound.malformed_audio.push(SessionError::from(e).to_string()),
                }
            }
        }

        if let Some(tool_call) = self.tool_call {
            inbound.tool_calls = tool_call
                .function_calls
                .into_iter()
                .map(|fc| ToolCall {
                    // Responses must echo an id, so synthesize one when absent
                    id: fc
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    name: fc.name,
                    args: fc.args.unwrap_or_default(),
                })
                .collect();
        }

        if let Some(cancel) = self.tool_call_cancellation {
            inbound.cancelled_tool_calls = cancel.ids;
        }

        if let Some(go_away) = self.go_away {
            inbound.go_away = Some(go_away.time_left.unwrap_or_default());
        }

        inbound
    }
}
