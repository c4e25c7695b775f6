//! Frame codec contracts.
//!
//! Compressed downlink frames are self-contained codec frames; the decoder
//! turns one of them into PCM in the session format. Codec math lives in the
//! implementations, not here.

#[cfg(feature = "opus")]
mod opus_codec;

#[cfg(feature = "opus")]
pub use opus_codec::{OpusDecoder, OpusEncoder};

use crate::audio::format::AudioFormat;
use crate::error::{Result, VoxlinkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Wire codec of the audio frames exchanged with the chat service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    /// Raw 16-bit PCM in the session format.
    #[default]
    Pcm,
    /// Opus packets, one per downlink frame. Needs the `opus` feature.
    Opus,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecKind::Pcm => "pcm",
            CodecKind::Opus => "opus",
        })
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" | "raw" => Ok(CodecKind::Pcm),
            "opus" => Ok(CodecKind::Opus),
            other => Err(format!("unknown codec '{}' (expected pcm or opus)", other)),
        }
    }
}

/// Single-frame decode failures. Never fatal to the decode task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Decodes one compressed frame per call.
pub trait FrameDecoder: Send {
    /// Decodes `frame` into `out`, returning the number of PCM bytes written.
    fn decode(&mut self, frame: &[u8], out: &mut [u8]) -> std::result::Result<usize, DecodeError>;

    /// PCM format produced by `decode`.
    fn output_format(&self) -> AudioFormat;

    /// Drops any inter-frame state.
    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Single-frame encode failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("expected {expected} PCM bytes per frame, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("encoder rejected frame: {0}")]
    Rejected(String),
}

/// Packs one fixed-size PCM frame per call into a wire packet.
pub trait FrameEncoder: Send {
    /// Encodes exactly `frame_bytes()` of PCM.
    fn encode(&mut self, pcm: &[u8]) -> std::result::Result<Vec<u8>, EncodeError>;

    /// PCM bytes consumed by one `encode` call.
    fn frame_bytes(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Builds the decoder for `kind` producing PCM in `format`.
pub fn open_decoder(kind: CodecKind, format: AudioFormat) -> Result<Box<dyn FrameDecoder>> {
    match kind {
        CodecKind::Pcm => Ok(Box::new(PcmDecoder::new(format)?)),
        #[cfg(feature = "opus")]
        CodecKind::Opus => Ok(Box::new(OpusDecoder::new(format)?)),
        #[cfg(not(feature = "opus"))]
        CodecKind::Opus => Err(missing_opus()),
    }
}

/// Builds the encoder a loopback service needs to speak `kind`.
///
/// `None` when frames travel as raw PCM.
#[cfg_attr(not(feature = "opus"), allow(unused_variables))]
pub fn open_encoder(
    kind: CodecKind,
    format: AudioFormat,
    frame: Duration,
) -> Result<Option<Box<dyn FrameEncoder>>> {
    match kind {
        CodecKind::Pcm => Ok(None),
        #[cfg(feature = "opus")]
        CodecKind::Opus => Ok(Some(Box::new(OpusEncoder::new(format, frame)?))),
        #[cfg(not(feature = "opus"))]
        CodecKind::Opus => Err(missing_opus()),
    }
}

#[cfg(not(feature = "opus"))]
fn missing_opus() -> VoxlinkError {
    VoxlinkError::DecoderInit {
        message: "built without the `opus` feature".to_string(),
    }
}

/// Pass-through "codec" for links that carry raw PCM.
///
/// A frame is corrupt when it does not hold a whole number of sample blocks.
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    format: AudioFormat,
}

impl PcmDecoder {
    pub fn new(format: AudioFormat) -> Result<Self> {
        format.validate().map_err(|e| VoxlinkError::DecoderInit {
            message: e.to_string(),
        })?;
        Ok(Self { format })
    }
}

impl FrameDecoder for PcmDecoder {
    fn decode(&mut self, frame: &[u8], out: &mut [u8]) -> std::result::Result<usize, DecodeError> {
        let align = self.format.block_align();
        if frame.is_empty() || frame.len() % align != 0 {
            return Err(DecodeError::Corrupt(format!(
                "{} bytes is not a multiple of the {}-byte sample block",
                frame.len(),
                align
            )));
        }
        if frame.len() > out.len() {
            return Err(DecodeError::BufferTooSmall {
                needed: frame.len(),
                available: out.len(),
            });
        }
        out[..frame.len()].copy_from_slice(frame);
        Ok(frame.len())
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn name(&self) -> &'static str {
        "pcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_decoder_copies_whole_blocks() {
        let mut decoder = PcmDecoder::new(AudioFormat::default()).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(decoder.decode(&[1, 2, 3, 4], &mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_pcm_decoder_rejects_partial_sample() {
        let mut decoder = PcmDecoder::new(AudioFormat::default()).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(
            decoder.decode(&[1, 2, 3], &mut out),
            Err(DecodeError::Corrupt(_))
        ));
        assert!(matches!(
            decoder.decode(&[], &mut out),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_pcm_decoder_buffer_too_small() {
        let mut decoder = PcmDecoder::new(AudioFormat::default()).unwrap();
        let mut out = [0u8; 2];
        assert_eq!(
            decoder.decode(&[0; 4], &mut out),
            Err(DecodeError::BufferTooSmall {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_pcm_decoder_init_validates_format() {
        let err = PcmDecoder::new(AudioFormat::new(16000, 1, 12)).unwrap_err();
        assert!(matches!(err, VoxlinkError::DecoderInit { .. }));
    }

    #[test]
    fn test_codec_kind_parse_and_display() {
        assert_eq!("opus".parse::<CodecKind>().unwrap(), CodecKind::Opus);
        assert_eq!(" PCM ".parse::<CodecKind>().unwrap(), CodecKind::Pcm);
        assert!("mp3".parse::<CodecKind>().is_err());
        assert_eq!(CodecKind::Opus.to_string(), "opus");
        assert_eq!(CodecKind::default(), CodecKind::Pcm);
    }

    #[test]
    fn test_open_pcm_codec() {
        let decoder = open_decoder(CodecKind::Pcm, AudioFormat::default()).unwrap();
        assert_eq!(decoder.name(), "pcm");
        let encoder =
            open_encoder(CodecKind::Pcm, AudioFormat::default(), Duration::from_millis(20))
                .unwrap();
        assert!(encoder.is_none());
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn test_opus_unavailable_without_feature() {
        let err = open_decoder(CodecKind::Opus, AudioFormat::default()).err().unwrap();
        assert!(matches!(err, VoxlinkError::DecoderInit { .. }));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Corrupt("bad toc byte".to_string());
        assert_eq!(err.to_string(), "corrupt frame: bad toc byte");
    }
}
