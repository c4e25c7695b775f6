//! WAV-file microphone and speaker for host-side simulation.

use crate::audio::device::{Microphone, Speaker};
use crate::audio::format::{AudioFormat, bytes_to_samples};
use crate::error::{Result, VoxlinkError};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;
use std::time::Duration;

/// Decodes a WAV stream into interleaved PCM bytes in `format`.
///
/// Source audio is downmixed to mono, resampled to the session rate, then
/// replicated into every output channel at the session bit depth.
pub fn read_pcm(reader: impl Read, format: &AudioFormat) -> Result<Vec<u8>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxlinkError::AudioDevice {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(VoxlinkError::AudioDevice {
            message: format!(
                "Unsupported WAV sample format: {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| VoxlinkError::AudioDevice {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono = downmix(&raw_samples, spec.channels);
    let samples = resample(&mono, spec.sample_rate, format.sample_rate);

    let channels = format.channels as usize;
    let mut pcm = Vec::with_capacity(samples.len() * format.block_align());
    for sample in samples {
        for _ in 0..channels {
            match format.bits_per_sample {
                32 => pcm.extend_from_slice(&((sample as i32) << 16).to_le_bytes()),
                _ => pcm.extend_from_slice(&sample.to_le_bytes()),
            }
        }
    }
    Ok(pcm)
}

/// Loads a WAV file from disk as PCM in `format`.
pub fn load_pcm(path: &Path, format: &AudioFormat) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| VoxlinkError::AudioDevice {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    read_pcm(std::io::BufReader::new(file), format)
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Microphone that replays a WAV file, then reports exhaustion.
pub struct WavMicrophone {
    pcm: Vec<u8>,
    position: usize,
}

impl WavMicrophone {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: impl Read, format: &AudioFormat) -> Result<Self> {
        Ok(Self {
            pcm: read_pcm(reader, format)?,
            position: 0,
        })
    }

    pub fn open(path: &Path, format: &AudioFormat) -> Result<Self> {
        Ok(Self {
            pcm: load_pcm(path, format)?,
            position: 0,
        })
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.pcm.len() - self.position
    }
}

impl Microphone for WavMicrophone {
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.pcm[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Speaker that records playback into a WAV stream.
///
/// The header is finalized on `flush` and when the speaker is dropped.
pub struct WavSpeaker<W: Write + Seek> {
    writer: hound::WavWriter<W>,
    format: AudioFormat,
}

impl WavSpeaker<BufWriter<File>> {
    pub fn create(path: &Path, format: &AudioFormat) -> Result<Self> {
        let writer = hound::WavWriter::create(path, wav_spec(format)).map_err(|e| {
            VoxlinkError::AudioDevice {
                message: format!("Failed to create {}: {}", path.display(), e),
            }
        })?;
        Ok(Self {
            writer,
            format: *format,
        })
    }
}

impl<W: Write + Seek> WavSpeaker<W> {
    pub fn from_writer(writer: W, format: &AudioFormat) -> Result<Self> {
        let writer =
            hound::WavWriter::new(writer, wav_spec(format)).map_err(|e| VoxlinkError::AudioDevice {
                message: format!("Failed to start WAV stream: {}", e),
            })?;
        Ok(Self {
            writer,
            format: *format,
        })
    }
}

fn wav_spec(format: &AudioFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    }
}

impl<W: Write + Seek + Send> Speaker for WavSpeaker<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let to_device_error = |e: hound::Error| VoxlinkError::AudioDevice {
            message: format!("Failed to write WAV samples: {}", e),
        };

        match self.format.bits_per_sample {
            32 => {
                for chunk in buf.chunks_exact(4) {
                    let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    self.writer.write_sample(sample).map_err(to_device_error)?;
                }
                Ok(buf.len() / 4 * 4)
            }
            _ => {
                for sample in bytes_to_samples(buf) {
                    self.writer.write_sample(sample).map_err(to_device_error)?;
                }
                Ok(buf.len() / 2 * 2)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| VoxlinkError::AudioDevice {
            message: format!("Failed to flush WAV file: {}", e),
        })
    }
}
