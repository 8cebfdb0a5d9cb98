//! # Audio Pipeline
//!
//! Everything between the sound devices and the live channel.
//!
//! ## Key Components:
//! - **Codec**: float samples to and from little-endian 16-bit PCM
//! - **Capture Bridge**: gates microphone frames onto the active session
//! - **Playback Scheduler**: gapless back-to-back scheduling with flush on interruption
//! - **Devices**: the device capability traits plus a WAV file implementation
//!
//! ## Audio Format Requirements:
//! - **Capture**: 16 kHz mono, 16-bit PCM
//! - **Playback**: 24 kHz, 16-bit PCM
//! - **Encoding**: Little-endian signed integers

pub mod capture; // Session gate and microphone forwarding
pub mod codec; // PCM encode/decode
pub mod device; // Input/output capability traits
pub mod frame; // AudioFrame and PlaybackBuffer
pub mod playback; // Next-start-time cursor
pub mod wav_device; // File-backed device for headless runs
