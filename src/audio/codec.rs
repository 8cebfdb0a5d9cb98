//! # Audio Frame Codec
//!
//! Converts between floating-point samples and the 16-bit PCM representation
//! required by the live channel.
//!
//! ## Wire Format:
//! - **Encoding**: Little-endian signed 16-bit integers
//! - **Capture**: 16 kHz mono
//! - **Playback**: 24 kHz, channel count given by the service (mono in practice)
//!
//! Decode failures are recoverable: the caller logs and skips the segment.

use crate::audio::frame::PlaybackBuffer;
use crate::error::{SessionError, SessionResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Bytes per encoded sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Stateless PCM encoder/decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioFrameCodec;

impl AudioFrameCodec {
    /// Scale one sample to i16, saturating outside [-1.0, 1.0].
    pub fn to_pcm16(sample: f32) -> i16 {
        (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
    }

    pub fn from_pcm16(sample: i16) -> f32 {
        sample as f32 / 32768.0
    }

    /// Encode float samples as little-endian 16-bit PCM.
    ///
    /// ## Conversion:
    /// Scales from [-1.0, 1.0] to the i16 range. Out-of-range input saturates
    /// at the i16 bounds instead of wrapping.
    pub fn encode(samples: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for &sample in samples {
            // Writing into a Vec cannot fail
            let _ = bytes.write_i16::<LittleEndian>(Self::to_pcm16(sample));
        }
        bytes
    }

    /// Decode little-endian 16-bit PCM into a playable buffer.
    ///
    /// ## Parameters:
    /// - **bytes**: Raw PCM payload from the channel
    /// - **sample_rate**: Rate the payload was synthesized at
    /// - **channel_count**: Number of interleaved channels
    ///
    /// ## Errors:
    /// `MalformedAudio` when the payload is not a whole number of 16-bit samples,
    /// not a whole number of interleaved frames, or the channel count is zero.
    pub fn decode(
        bytes: &[u8],
        sample_rate: u32,
        channel_count: u16,
    ) -> SessionResult<PlaybackBuffer> {
        if channel_count == 0 {
            return Err(SessionError::MalformedAudio(
                "channel count must be at least 1".to_string(),
            ));
        }

        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(SessionError::MalformedAudio(format!(
                "payload of {} bytes is not a whole number of 16-bit samples",
                bytes.len()
            )));
        }

        let channels = channel_count as usize;
        let total_samples = bytes.len() / BYTES_PER_SAMPLE;
        if total_samples % channels != 0 {
            return Err(SessionError::MalformedAudio(format!(
                "{} samples cannot be split into {} channels",
                total_samples, channels
            )));
        }

        let frame_count = total_samples / channels;
        let mut data = vec![Vec::with_capacity(frame_count); channels];

        let mut cursor = Cursor::new(bytes);
        for index in 0..total_samples {
            let sample = cursor
                .read_i16::<LittleEndian>()
                .map_err(|e| SessionError::MalformedAudio(e.to_string()))?;
            data[index % channels].push(Self::from_pcm16(sample));
        }

        Ok(PlaybackBuffer::new(data, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = AudioFrameCodec::encode(&[0.0, 0.5, -0.5]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(&bytes[0..2], &[0x00, 0x00]);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 16384);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -16384);
    }

    #[test]
    fn test_encode_saturates_out_of_range() {
        let bytes = AudioFrameCodec::encode(&[1.0, -1.0, 3.5, -7.0]);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let result = AudioFrameCodec::decode(&[0u8; 15], 24_000, 1);
        assert!(matches!(result, Err(SessionError::MalformedAudio(_))));
    }

    #[test]
    fn test_decode_rejects_partial_stereo_frame() {
        // 3 samples cannot form whole stereo frames
        let result = AudioFrameCodec::decode(&[0u8; 6], 24_000, 2);
        assert!(matches!(result, Err(SessionError::MalformedAudio(_))));

        let result = AudioFrameCodec::decode(&[0u8; 4], 24_000, 0);
        assert!(matches!(result, Err(SessionError::MalformedAudio(_))));
    }

    #[test]
    fn test_decode_deinterleaves_channels() {
        let mut bytes = Vec::new();
        for sample in [16384i16, -16384, 8192, -8192] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let buffer = AudioFrameCodec::decode(&bytes, 24_000, 2).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
    }

    #[test]
    fn test_pcm_conversion_accuracy() {
        let original = vec![0.0f32, 0.25, -0.25, 0.999, -1.0];
        let bytes = AudioFrameCodec::encode(&original);
        let decoded = AudioFrameCodec::decode(&bytes, 16_000, 1).unwrap();

        for (a, b) in original.iter().zip(decoded.channel(0).unwrap()) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_decode_empty_payload() {
        let buffer = AudioFrameCodec::decode(&[], 24_000, 1).unwrap();
        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }
}
