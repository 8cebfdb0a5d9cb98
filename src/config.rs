//! # Configuration Management
//!
//! Loads settings for the live session from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `GEMINI_API_KEY` / `API_KEY` for the service key
//! 2. Environment variables (APP_LIVE__MODEL, APP_AUDIO__CAPTURE_FRAME_SIZE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::error::SessionError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Endpoint of the Gemini Live bidirectional streaming service.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Main configuration that groups every setting the session needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub tools: ToolsConfig,
}

/// Remote service settings.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL without the key query parameter
/// - `model`: Fully qualified model name sent in the setup frame
/// - `voice`: Prebuilt voice used for synthesized speech
/// - `api_key`: Key appended to the endpoint; usually supplied by the environment
/// - `handshake_timeout_ms`: How long to wait for `setupComplete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    #[serde(default)]
    pub api_key: String,
    pub handshake_timeout_ms: u64,
}

/// Audio pipeline settings.
///
/// The capture rate and playback rate are fixed by the service contract
/// (16 kHz in, 24 kHz out); they are configurable so tests and file-backed
/// devices can run at the same rates without special cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub playback_channels: u16,
    /// Samples per capture frame (one frame = one outbound chunk)
    pub capture_frame_size: usize,
}

/// Tool call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Result text sent back when a tool call cannot be served
    pub fallback_result: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            live: LiveConfig::default(),
            audio: AudioConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Kore".to_string(),
            api_key: String::new(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            playback_channels: 1,
            capture_frame_size: 4096,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fallback_result: "I couldn't look up the news right now. Please try again in a moment."
                .to_string(),
        }
    }
}

impl LiveConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_LIVE__VOICE=Puck`: Override the synthesized voice
    /// - `APP_AUDIO__CAPTURE_FRAME_SIZE=2048`: Smaller capture frames
    /// - `GEMINI_API_KEY=...`: Service key (takes priority over `API_KEY`)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Keys are conventionally provided without the APP_ prefix
        if let Ok(key) = env::var("API_KEY") {
            settings = settings.set_override("live.api_key", key)?;
        }
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(SessionError::from)?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.live.model.trim().is_empty() {
            return Err(SessionError::Config("Live model name cannot be empty".to_string()).into());
        }

        if self.live.handshake_timeout_ms == 0 {
            return Err(
                SessionError::Config("Handshake timeout must be greater than 0".to_string()).into(),
            );
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(
                SessionError::Config("Sample rates must be greater than 0".to_string()).into(),
            );
        }

        if self.audio.playback_channels == 0 {
            return Err(
                SessionError::Config("Playback channel count must be greater than 0".to_string()).into(),
            );
        }

        if self.audio.capture_frame_size == 0 {
            return Err(
                SessionError::Config("Capture frame size must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Render the effective configuration as TOML (the API key is masked).
    pub fn to_toml_string(&self) -> Result<String> {
        let mut redacted = self.clone();
        if !redacted.live.api_key.is_empty() {
            redacted.live.api_key = "********".to_string();
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}
