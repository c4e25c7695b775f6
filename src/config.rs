use crate::audio::format::{AudioFormat, ChannelRoles};
use crate::audio::vad::VadConfig;
use crate::codec::CodecKind;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::gate::detector::EnergyDetectorConfig;
use crate::gate::strategy::GateMode;
use crate::pipeline::capture::CaptureSettings;
use crate::pipeline::orchestrator::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub gate: GateConfig,
    pub capture: CaptureConfig,
    pub downlink: DownlinkConfig,
    pub playback: PlaybackConfig,
    pub conversation: ConversationConfig,
}

/// Negotiated session format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// One letter per input channel: M mic, R reference, N unused
    pub channel_roles: String,
}

/// Front-end gate and reference detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub mode: GateMode,
    pub wake_hold_ms: u64,
    pub vad_threshold: f32,
    pub vad_min_speech_ms: u32,
    pub vad_min_noise_ms: u32,
    /// Onset level reported as a wake word; omit to never wake
    pub wake_threshold: Option<f32>,
    pub command_timeout_ms: u64,
}

/// Capture task and its handoff queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub frame_bytes: usize,
    pub queue_slots: usize,
    pub write_timeout_ms: u64,
    pub yield_ms: u64,
    pub read_timeout_ms: u64,
}

/// Receive callback and decode queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownlinkConfig {
    pub codec: CodecKind,
    pub max_packet_size: usize,
    pub queue_slots: usize,
    pub max_frame_ms: u32,
}

/// Playback path and drain watchdog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub queue_slots: usize,
    pub feed_timeout_ms: u64,
    pub timeout_ms: u64,
    pub watchdog_poll_ms: u64,
    pub flush_bytes: usize,
    pub volume: u8,
}

/// Conversation state machine and supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationConfig {
    pub queue_capacity: usize,
    pub channel_error_threshold: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            bits_per_sample: defaults::BITS_PER_SAMPLE,
            channel_roles: defaults::CHANNEL_ROLES.to_string(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::WakeWord,
            wake_hold_ms: defaults::WAKE_HOLD_MS,
            vad_threshold: defaults::VAD_THRESHOLD,
            vad_min_speech_ms: defaults::VAD_MIN_SPEECH_MS,
            vad_min_noise_ms: defaults::VAD_MIN_NOISE_MS,
            wake_threshold: Some(defaults::WAKE_THRESHOLD),
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_bytes: defaults::CAPTURE_FRAME_BYTES,
            queue_slots: defaults::CAPTURE_QUEUE_SLOTS,
            write_timeout_ms: defaults::CAPTURE_WRITE_TIMEOUT_MS,
            yield_ms: defaults::CAPTURE_YIELD_MS,
            read_timeout_ms: defaults::MIC_READ_TIMEOUT_MS,
        }
    }
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Pcm,
            max_packet_size: defaults::MAX_PACKET_SIZE,
            queue_slots: defaults::DECODE_QUEUE_SLOTS,
            max_frame_ms: defaults::MAX_FRAME_MS,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_slots: defaults::PLAYBACK_QUEUE_SLOTS,
            feed_timeout_ms: defaults::PLAYBACK_FEED_TIMEOUT_MS,
            timeout_ms: defaults::PLAYBACK_TIMEOUT_MS,
            watchdog_poll_ms: defaults::WATCHDOG_POLL_MS,
            flush_bytes: defaults::FLUSH_BYTES,
            volume: defaults::PLAYBACK_VOLUME,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::CONVERSATION_QUEUE_CAPACITY,
            channel_error_threshold: defaults::CHANNEL_ERROR_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxlinkError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxlinkError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(VoxlinkError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLINK_GATE_MODE → gate.mode
    /// - VOXLINK_CODEC → downlink.codec
    /// - VOXLINK_SAMPLE_RATE → audio.sample_rate
    /// - VOXLINK_VOLUME → playback.volume
    ///
    /// Empty or unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(mode) = std::env::var("VOXLINK_GATE_MODE")
            && let Ok(mode) = mode.parse::<GateMode>()
        {
            self.gate.mode = mode;
        }

        if let Ok(codec) = std::env::var("VOXLINK_CODEC")
            && let Ok(codec) = codec.parse::<CodecKind>()
        {
            self.downlink.codec = codec;
        }

        if let Ok(rate) = std::env::var("VOXLINK_SAMPLE_RATE")
            && let Ok(rate) = rate.trim().parse::<u32>()
        {
            self.audio.sample_rate = rate;
        }

        if let Ok(volume) = std::env::var("VOXLINK_VOLUME")
            && let Ok(volume) = volume.trim().parse::<u8>()
        {
            self.playback.volume = volume;
        }

        self
    }

    /// Checks cross-field constraints the TOML types cannot express.
    pub fn validate(&self) -> Result<()> {
        self.audio_format().validate()?;
        ChannelRoles::parse(&self.audio.channel_roles)
            .and_then(|roles| roles.check_against(&self.audio_format()))
            .map_err(|e| invalid("audio.channel_roles", e.to_string()))?;

        let non_zero = [
            ("capture.frame_bytes", self.capture.frame_bytes),
            ("capture.queue_slots", self.capture.queue_slots),
            ("downlink.max_packet_size", self.downlink.max_packet_size),
            ("downlink.queue_slots", self.downlink.queue_slots),
            ("downlink.max_frame_ms", self.downlink.max_frame_ms as usize),
            ("playback.queue_slots", self.playback.queue_slots),
            ("conversation.queue_capacity", self.conversation.queue_capacity),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero".to_string()));
            }
        }

        if self.capture.frame_bytes % self.audio_format().block_align() != 0 {
            return Err(invalid(
                "capture.frame_bytes",
                format!(
                    "{} is not a whole number of {}-byte sample blocks",
                    self.capture.frame_bytes,
                    self.audio_format().block_align()
                ),
            ));
        }
        if self.playback.volume > 100 {
            return Err(invalid(
                "playback.volume",
                format!("{} is above 100", self.playback.volume),
            ));
        }
        if !(0.0..=1.0).contains(&self.gate.vad_threshold) {
            return Err(invalid(
                "gate.vad_threshold",
                "must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.audio.sample_rate,
            self.audio.channels,
            self.audio.bits_per_sample,
        )
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VoxlinkError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxlink/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            VoxlinkError::Other("Could not determine config directory".to_string())
        })?;
        Ok(dir.join("voxlink").join("config.toml"))
    }
}

fn invalid(key: &str, message: String) -> VoxlinkError {
    VoxlinkError::ConfigInvalidValue {
        key: key.to_string(),
        message,
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            format: config.audio_format(),
            channel_roles: config.audio.channel_roles.clone(),
            mode: config.gate.mode,
            wake_hold: Duration::from_millis(config.gate.wake_hold_ms),
            capture: CaptureSettings {
                frame_bytes: config.capture.frame_bytes,
                write_timeout: Duration::from_millis(config.capture.write_timeout_ms),
                yield_interval: Duration::from_millis(config.capture.yield_ms),
                read_timeout: Duration::from_millis(config.capture.read_timeout_ms),
            },
            capture_slots: config.capture.queue_slots,
            frontend_poll: Duration::from_millis(defaults::FRONTEND_POLL_MS),
            max_packet_size: config.downlink.max_packet_size,
            decode_slots: config.downlink.queue_slots,
            max_frame: Duration::from_millis(u64::from(config.downlink.max_frame_ms)),
            playback_slots: config.playback.queue_slots,
            feed_timeout: Duration::from_millis(config.playback.feed_timeout_ms),
            playback_timeout: Duration::from_millis(config.playback.timeout_ms),
            watchdog_poll: Duration::from_millis(config.playback.watchdog_poll_ms),
            flush_bytes: config.playback.flush_bytes,
            volume: config.playback.volume,
        }
    }
}

impl From<&Config> for EnergyDetectorConfig {
    fn from(config: &Config) -> Self {
        Self {
            vad: VadConfig {
                speech_threshold: config.gate.vad_threshold,
                min_speech_ms: config.gate.vad_min_speech_ms,
                min_noise_ms: config.gate.vad_min_noise_ms,
            },
            wake_threshold: config.gate.wake_threshold,
            command_timeout: Duration::from_millis(config.gate.command_timeout_ms),
        }
    }
}
