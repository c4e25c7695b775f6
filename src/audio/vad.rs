//! Voice Activity Detection (VAD) module.
//!
//! Detects speech activity in audio streams using RMS-based thresholding
//! and a small state machine that debounces both onset and release.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use std::time::Instant;

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Speech must persist this long before it is reported (milliseconds).
    pub min_speech_ms: u32,
    /// Silence must persist this long before speech is considered ended (milliseconds).
    pub min_noise_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            min_speech_ms: defaults::VAD_MIN_SPEECH_MS,
            min_noise_ms: defaults::VAD_MIN_NOISE_MS,
        }
    }
}

/// Current state of voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech detected.
    Idle,
    /// Energy above threshold, waiting to confirm onset.
    MaybeSpeech,
    /// Speech is being detected.
    Speaking,
    /// Silence detected, waiting to confirm speech end.
    MaybeSilence,
}

/// Edge reported by [`Vad::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    /// Nothing changed.
    None,
    /// Speech onset confirmed.
    SpeechStart,
    /// Speech release confirmed.
    SpeechEnd,
}

/// Voice Activity Detector state machine.
pub struct Vad<C: Clock = SystemClock> {
    config: VadConfig,
    state: VadState,
    edge_start: Option<Instant>,
    clock: C,
}

impl<C: Clock> Vad<C> {
    /// Creates a new VAD instance with the given configuration and clock.
    pub fn with_clock(config: VadConfig, clock: C) -> Self {
        Self {
            config,
            state: VadState::Idle,
            edge_start: None,
            clock,
        }
    }

    /// Processes one block of mono samples and reports any confirmed edge.
    pub fn process(&mut self, samples: &[i16]) -> VadTransition {
        let is_speech = calculate_rms(samples) > self.config.speech_threshold;
        let now = self.clock.now();
        let held_ms = |start: Option<Instant>| {
            start
                .map(|s| now.duration_since(s).as_millis() as u32)
                .unwrap_or(0)
        };

        match (self.state, is_speech) {
            (VadState::Idle, true) => {
                self.edge_start = Some(now);
                if self.config.min_speech_ms == 0 {
                    self.state = VadState::Speaking;
                    return VadTransition::SpeechStart;
                }
                self.state = VadState::MaybeSpeech;
                VadTransition::None
            }
            (VadState::Idle, false) => VadTransition::None,
            (VadState::MaybeSpeech, true) => {
                if held_ms(self.edge_start) >= self.config.min_speech_ms {
                    self.state = VadState::Speaking;
                    self.edge_start = None;
                    VadTransition::SpeechStart
                } else {
                    VadTransition::None
                }
            }
            (VadState::MaybeSpeech, false) => {
                self.state = VadState::Idle;
                self.edge_start = None;
                VadTransition::None
            }
            (VadState::Speaking, true) => VadTransition::None,
            (VadState::Speaking, false) => {
                self.state = VadState::MaybeSilence;
                self.edge_start = Some(now);
                VadTransition::None
            }
            (VadState::MaybeSilence, true) => {
                self.state = VadState::Speaking;
                self.edge_start = None;
                VadTransition::None
            }
            (VadState::MaybeSilence, false) => {
                if held_ms(self.edge_start) >= self.config.min_noise_ms {
                    self.state = VadState::Idle;
                    self.edge_start = None;
                    VadTransition::SpeechEnd
                } else {
                    VadTransition::None
                }
            }
        }
    }

    /// Returns the current VAD state.
    pub fn state(&self) -> VadState {
        self.state
    }

    /// True while speech is confirmed (including the release hangover).
    pub fn is_active(&self) -> bool {
        matches!(self.state, VadState::Speaking | VadState::MaybeSilence)
    }

    /// Resets the VAD to idle state.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.edge_start = None;
    }
}

impl Vad<SystemClock> {
    /// Creates a new VAD instance with the given configuration using the system clock.
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
