//! Opus frames via libopus.

use super::{DecodeError, EncodeError, FrameDecoder, FrameEncoder};
use crate::audio::format::AudioFormat;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use opus::{Application, Channels};
use std::time::Duration;
use tracing::warn;

const SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Frame durations libopus accepts, in microseconds.
const FRAME_DURATIONS_US: [u128; 6] = [2_500, 5_000, 10_000, 20_000, 40_000, 60_000];

/// Longest audio one packet can carry.
const MAX_PACKET_DURATION: Duration = Duration::from_millis(120);

fn opus_channels(format: &AudioFormat) -> Result<Channels> {
    if format.bits_per_sample != 16 {
        return Err(init_error(format!(
            "opus produces 16-bit PCM, session uses {} bits",
            format.bits_per_sample
        )));
    }
    if !SAMPLE_RATES.contains(&format.sample_rate) {
        return Err(init_error(format!(
            "opus does not support {} Hz",
            format.sample_rate
        )));
    }
    match format.channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        n => Err(init_error(format!("opus supports 1 or 2 channels, not {}", n))),
    }
}

fn init_error(message: String) -> VoxlinkError {
    VoxlinkError::DecoderInit { message }
}

/// Decodes one Opus packet per call into interleaved little-endian PCM.
pub struct OpusDecoder {
    inner: opus::Decoder,
    format: AudioFormat,
    samples: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(format: AudioFormat) -> Result<Self> {
        let channels = opus_channels(&format)?;
        let inner = opus::Decoder::new(format.sample_rate, channels)
            .map_err(|e| init_error(e.to_string()))?;
        Ok(Self {
            inner,
            format,
            samples: vec![0; format.samples_for(MAX_PACKET_DURATION)],
        })
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8], out: &mut [u8]) -> std::result::Result<usize, DecodeError> {
        // libopus treats an empty packet as a loss to conceal
        if frame.is_empty() {
            return Err(DecodeError::Corrupt("empty packet".to_string()));
        }
        let per_channel = self
            .inner
            .decode(frame, &mut self.samples, false)
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        let total = per_channel * self.format.channels as usize;
        let needed = total * 2;
        if needed > out.len() {
            return Err(DecodeError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        for (dst, sample) in out.chunks_exact_mut(2).zip(&self.samples[..total]) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(needed)
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn reset(&mut self) {
        if let Err(e) = self.inner.reset_state() {
            warn!(error = %e, "failed to reset opus decoder");
        }
    }

    fn name(&self) -> &'static str {
        "opus"
    }
}

/// Encodes fixed-duration PCM frames into Opus packets.
pub struct OpusEncoder {
    inner: opus::Encoder,
    frame_bytes: usize,
    samples: Vec<i16>,
    packet: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(format: AudioFormat, frame: Duration) -> Result<Self> {
        let channels = opus_channels(&format)?;
        if !FRAME_DURATIONS_US.contains(&frame.as_micros()) {
            return Err(init_error(format!("opus cannot frame {:?} of audio", frame)));
        }
        let inner = opus::Encoder::new(format.sample_rate, channels, Application::Voip)
            .map_err(|e| init_error(e.to_string()))?;
        Ok(Self {
            inner,
            frame_bytes: format.bytes_for(frame),
            samples: Vec::with_capacity(format.samples_for(frame)),
            packet: vec![0; defaults::MAX_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[u8]) -> std::result::Result<Vec<u8>, EncodeError> {
        if pcm.len() != self.frame_bytes {
            return Err(EncodeError::FrameSize {
                expected: self.frame_bytes,
                actual: pcm.len(),
            });
        }
        self.samples.clear();
        self.samples
            .extend(pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])));
        let len = self
            .inner
            .encode(&self.samples, &mut self.packet)
            .map_err(|e| EncodeError::Rejected(e.to_string()))?;
        Ok(self.packet[..len].to_vec())
    }

    fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn name(&self) -> &'static str {
        "opus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(20);

    fn tone(format: &AudioFormat) -> Vec<u8> {
        (0..format.samples_for(FRAME))
            .flat_map(|i| {
                let phase = i as f32 * 440.0 * std::f32::consts::TAU / format.sample_rate as f32;
                ((phase.sin() * 8000.0) as i16).to_le_bytes()
            })
            .collect()
    }

    #[test]
    fn test_decodes_encoded_packet() {
        let format = AudioFormat::default();
        let mut encoder = OpusEncoder::new(format, FRAME).unwrap();
        let mut decoder = OpusDecoder::new(format).unwrap();

        let packet = encoder.encode(&tone(&format)).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() < encoder.frame_bytes());

        let mut out = vec![0u8; format.bytes_for(Duration::from_millis(60))];
        let written = decoder.decode(&packet, &mut out).unwrap();
        assert_eq!(written, format.bytes_for(FRAME));
        assert!(out[..written].iter().any(|&b| b != 0));
    }

    #[test]
    fn test_rejects_corrupt_packets() {
        let mut decoder = OpusDecoder::new(AudioFormat::default()).unwrap();
        let mut out = vec![0u8; 4096];
        // Code-3 TOC with no frame count byte
        assert!(matches!(
            decoder.decode(&[0x03], &mut out),
            Err(DecodeError::Corrupt(_))
        ));
        // Frame count that overruns the 120 ms packet limit
        assert!(matches!(
            decoder.decode(&[0xFF, 0xFF, 0xFF], &mut out),
            Err(DecodeError::Corrupt(_))
        ));
        assert!(matches!(
            decoder.decode(&[], &mut out),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_decoding_continues_after_corrupt_packet() {
        let format = AudioFormat::default();
        let mut encoder = OpusEncoder::new(format, FRAME).unwrap();
        let mut decoder = OpusDecoder::new(format).unwrap();
        let mut out = vec![0u8; 4096];

        assert!(decoder.decode(&[0x03], &mut out).is_err());
        decoder.reset();
        let packet = encoder.encode(&tone(&format)).unwrap();
        assert_eq!(
            decoder.decode(&packet, &mut out).unwrap(),
            format.bytes_for(FRAME)
        );
    }

    #[test]
    fn test_output_buffer_too_small() {
        let format = AudioFormat::default();
        let mut encoder = OpusEncoder::new(format, FRAME).unwrap();
        let mut decoder = OpusDecoder::new(format).unwrap();
        let packet = encoder.encode(&tone(&format)).unwrap();

        let mut out = vec![0u8; 100];
        assert!(matches!(
            decoder.decode(&packet, &mut out),
            Err(DecodeError::BufferTooSmall { available: 100, .. })
        ));
    }

    #[test]
    fn test_unsupported_formats() {
        assert!(OpusDecoder::new(AudioFormat::new(44100, 1, 16)).is_err());
        assert!(OpusDecoder::new(AudioFormat::new(16000, 1, 32)).is_err());
        assert!(OpusDecoder::new(AudioFormat::new(16000, 4, 16)).is_err());
        assert!(OpusEncoder::new(AudioFormat::default(), Duration::from_millis(30)).is_err());
    }

    #[test]
    fn test_encoder_requires_whole_frame() {
        let mut encoder = OpusEncoder::new(AudioFormat::default(), FRAME).unwrap();
        assert_eq!(
            encoder.encode(&[0; 10]),
            Err(EncodeError::FrameSize {
                expected: 640,
                actual: 10
            })
        );
    }
}
