//! Default configuration constants for voxlink.
//!
//! Values mirror what the device firmware runs with, so a default
//! `Config` reproduces its timing and buffering behavior.

/// Negotiated session sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Negotiated channel count.
pub const CHANNELS: u16 = 1;

/// Negotiated bit depth.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Channel-role string for a single-microphone board.
pub const CHANNEL_ROLES: &str = "M";

/// Bytes read from the microphone per capture iteration (three 4 KiB periods).
pub const CAPTURE_FRAME_BYTES: usize = 4096 * 3;

/// Cooperative yield between capture iterations.
pub const CAPTURE_YIELD_MS: u64 = 10;

/// Upper bound on a single microphone read.
pub const MIC_READ_TIMEOUT_MS: u64 = 200;

/// Slots in the capture → front-end handoff queue.
pub const CAPTURE_QUEUE_SLOTS: usize = 5;

/// How long the capture task waits for a free handoff slot.
pub const CAPTURE_WRITE_TIMEOUT_MS: u64 = 100;

/// Largest compressed packet accepted from the chat channel.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Slots in the drop-newest decode queue.
pub const DECODE_QUEUE_SLOTS: usize = 32;

/// Longest codec frame the decoder must hold, in milliseconds.
pub const MAX_FRAME_MS: u32 = 60;

/// Slots in the decode → playback handoff queue.
pub const PLAYBACK_QUEUE_SLOTS: usize = 5;

/// How long `feed` waits for a free playback slot.
pub const PLAYBACK_FEED_TIMEOUT_MS: u64 = 500;

/// Silence after which the playback watchdog flushes the output path.
pub const PLAYBACK_TIMEOUT_MS: u64 = 500;

/// Watchdog polling granularity.
pub const WATCHDOG_POLL_MS: u64 = 10;

/// Size of the zero buffer written on a watchdog flush.
pub const FLUSH_BYTES: usize = 32;

/// Default software playback volume (0-100).
pub const PLAYBACK_VOLUME: u8 = 70;

/// End-of-utterance hold in wake-word mode.
pub const WAKE_HOLD_MS: u64 = 60_000;

/// RMS threshold for the reference energy detector.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Onset RMS at which the energy detector reports a wake word.
pub const WAKE_THRESHOLD: f32 = 0.1;

/// Minimum speech before VAD_START is reported.
pub const VAD_MIN_SPEECH_MS: u32 = 64;

/// Silence before VAD_END is reported.
pub const VAD_MIN_NOISE_MS: u32 = 1000;

/// Command-detection window length.
pub const COMMAND_TIMEOUT_MS: u64 = 6000;

/// How often the front-end checks gate holds when no frame arrives.
pub const FRONTEND_POLL_MS: u64 = 100;

/// Depth of the front-end event fan-out channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Depth of the conversation state-machine event queue.
pub const CONVERSATION_QUEUE_CAPACITY: usize = 10;

/// Consecutive uplink failures before the supervisor raises ERROR_OCCURRED.
pub const CHANNEL_ERROR_THRESHOLD: u32 = 50;
