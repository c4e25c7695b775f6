//! Negotiated session audio format and input channel roles.

use crate::defaults;
use crate::error::{Result, VoxlinkError};
use std::fmt;
use std::time::Duration;

/// PCM format negotiated once at session start.
///
/// Immutable for the lifetime of a session; every stage (capture, front-end,
/// decoder output, playback) must agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            bits_per_sample: defaults::BITS_PER_SAMPLE,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes per sample for a single channel.
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Bytes per interleaved sample frame (all channels).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Number of bytes covering `duration` of audio, rounded down to whole blocks.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.block_align()
    }

    /// Number of interleaved samples covering `duration`.
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.channels as usize
    }

    /// Duration covered by `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let align = self.block_align();
        if align == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = (bytes / align) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }

    /// Checks the format is one the pipeline can carry.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VoxlinkError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.channels == 0 {
            return Err(VoxlinkError::ConfigInvalidValue {
                key: "audio.channels".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !matches!(self.bits_per_sample, 16 | 32) {
            return Err(VoxlinkError::ConfigInvalidValue {
                key: "audio.bits_per_sample".to_string(),
                message: format!("{} is not supported (use 16 or 32)", self.bits_per_sample),
            });
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Role of one interleaved input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Microphone signal.
    Mic,
    /// Playback reference used for echo cancellation.
    Reference,
    /// Unused slot.
    Unused,
}

/// Ordered channel roles, parsed from strings like `"MR"` or `"RMNM"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRoles(Vec<ChannelRole>);

impl ChannelRoles {
    /// Parses a role string: `M` microphone, `R` reference, `N` unused.
    pub fn parse(roles: &str) -> Result<Self> {
        let parsed = roles
            .chars()
            .map(|c| match c.to_ascii_uppercase() {
                'M' => Ok(ChannelRole::Mic),
                'R' => Ok(ChannelRole::Reference),
                'N' => Ok(ChannelRole::Unused),
                other => Err(VoxlinkError::FrontEndInit {
                    message: format!("unknown channel role '{}' in \"{}\"", other, roles),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        if !parsed.contains(&ChannelRole::Mic) {
            return Err(VoxlinkError::FrontEndInit {
                message: format!("channel roles \"{}\" contain no microphone", roles),
            });
        }

        Ok(Self(parsed))
    }

    /// Ensures there is exactly one role per negotiated channel.
    pub fn check_against(&self, format: &AudioFormat) -> Result<()> {
        if self.0.len() != format.channels as usize {
            return Err(VoxlinkError::FrontEndInit {
                message: format!(
                    "{} channel roles for a {}-channel format",
                    self.0.len(),
                    format.channels
                ),
            });
        }
        Ok(())
    }

    /// Index of the first microphone channel.
    pub fn primary_mic(&self) -> usize {
        self.0
            .iter()
            .position(|role| *role == ChannelRole::Mic)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn roles(&self) -> &[ChannelRole] {
        &self.0
    }
}

/// Extracts one channel of interleaved little-endian PCM as 16-bit samples.
///
/// 32-bit input keeps the upper 16 bits.
pub fn extract_channel(pcm: &[u8], format: &AudioFormat, channel: usize) -> Vec<i16> {
    let align = format.block_align();
    let width = format.bytes_per_sample();
    if align == 0 || channel >= format.channels as usize {
        return Vec::new();
    }

    pcm.chunks_exact(align)
        .map(|block| {
            let offset = channel * width;
            match width {
                4 => {
                    let raw = i32::from_le_bytes([
                        block[offset],
                        block[offset + 1],
                        block[offset + 2],
                        block[offset + 3],
                    ]);
                    (raw >> 16) as i16
                }
                _ => i16::from_le_bytes([block[offset], block[offset + 1]]),
            }
        })
        .collect()
}

/// Encodes 16-bit samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes little-endian bytes into 16-bit samples; a trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
