//! Front-end detector contract and an energy-based reference detector.
//!
//! Vendor front-ends (AEC, wake-word models) sit behind [`FrontEndDetector`].
//! The pipeline only relies on the event contract, so any detector that
//! turns PCM frames into [`EventKind`]s can be plugged in.

use crate::audio::format::{AudioFormat, ChannelRoles, extract_channel};
use crate::audio::vad::{Vad, VadConfig, VadTransition, calculate_rms};
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::gate::event::EventKind;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Voice front-end: classifies raw capture frames into events.
pub trait FrontEndDetector: Send {
    /// Prepares the detector for the session format.
    ///
    /// Failure is fatal: the capture pipeline does not start.
    fn init(&mut self, format: &AudioFormat, roles: &ChannelRoles) -> Result<()>;

    /// Analyses one interleaved capture frame and returns the events it produced.
    fn feed(&mut self, pcm: &[u8]) -> Vec<EventKind>;

    /// Starts (or restarts) the command-detection window.
    fn begin_command_detection(&mut self);

    /// Abandons the current command-detection window, if any.
    fn cancel_command_detection(&mut self);

    fn name(&self) -> &'static str;
}

/// Tuning for [`EnergyDetector`].
#[derive(Debug, Clone, Copy)]
pub struct EnergyDetectorConfig {
    pub vad: VadConfig,
    /// Onset energy that counts as a wake word; `None` never wakes.
    pub wake_threshold: Option<f32>,
    pub command_timeout: Duration,
}

impl Default for EnergyDetectorConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            wake_threshold: Some(defaults::WAKE_THRESHOLD),
            command_timeout: Duration::from_millis(defaults::COMMAND_TIMEOUT_MS),
        }
    }
}

/// RMS voice-activity detector on the primary microphone channel.
///
/// A speech onset louder than `wake_threshold` also reports WAKE_START, which
/// stands in for a wake-word model. WAKE_END is never emitted here; the wake
/// gate's hold time ends the session.
pub struct EnergyDetector {
    config: EnergyDetectorConfig,
    vad: Vad<Arc<dyn Clock>>,
    clock: Arc<dyn Clock>,
    format: Option<AudioFormat>,
    mic_channel: usize,
    peak_rms: f32,
    command_deadline: Option<Instant>,
}

impl EnergyDetector {
    pub fn new(config: EnergyDetectorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EnergyDetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            vad: Vad::with_clock(config.vad, clock.clone()),
            clock,
            format: None,
            mic_channel: 0,
            peak_rms: 0.0,
            command_deadline: None,
        }
    }

    /// True while a command window is open.
    pub fn command_window_open(&self) -> bool {
        self.command_deadline.is_some()
    }
}

impl FrontEndDetector for EnergyDetector {
    fn init(&mut self, format: &AudioFormat, roles: &ChannelRoles) -> Result<()> {
        format.validate().map_err(|e| VoxlinkError::FrontEndInit {
            message: e.to_string(),
        })?;
        roles.check_against(format)?;
        self.mic_channel = roles.primary_mic();
        self.format = Some(*format);
        self.vad.reset();
        debug!(%format, mic_channel = self.mic_channel, "energy detector ready");
        Ok(())
    }

    fn feed(&mut self, pcm: &[u8]) -> Vec<EventKind> {
        let Some(format) = self.format else {
            return Vec::new();
        };
        let samples = extract_channel(pcm, &format, self.mic_channel);
        let mut events = Vec::new();

        let rms = calculate_rms(&samples);
        if self.vad.is_active() || rms > self.config.vad.speech_threshold {
            self.peak_rms = self.peak_rms.max(rms);
        }

        match self.vad.process(&samples) {
            VadTransition::SpeechStart => {
                if let Some(threshold) = self.config.wake_threshold
                    && self.peak_rms >= threshold
                {
                    events.push(EventKind::WakeStart {
                        word_index: 1,
                        model_index: 0,
                    });
                }
                events.push(EventKind::VadStart);
            }
            VadTransition::SpeechEnd => {
                self.peak_rms = 0.0;
                events.push(EventKind::VadEnd);
            }
            VadTransition::None => {
                if !self.vad.is_active() && rms <= self.config.vad.speech_threshold {
                    self.peak_rms = 0.0;
                }
            }
        }

        if let Some(deadline) = self.command_deadline
            && self.clock.now() >= deadline
        {
            self.command_deadline = None;
            events.push(EventKind::CommandTimeout);
        }

        events
    }

    fn begin_command_detection(&mut self) {
        self.command_deadline = Some(self.clock.now() + self.config.command_timeout);
    }

    fn cancel_command_detection(&mut self) {
        self.command_deadline = None;
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Counters shared with a [`MockDetector`] after it moves into the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MockDetectorCounters {
    frames: Arc<AtomicU32>,
    begins: Arc<AtomicU32>,
    cancels: Arc<AtomicU32>,
}

impl MockDetectorCounters {
    pub fn frames(&self) -> u32 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

/// Detector that replays scripted events, for tests.
#[derive(Debug, Default)]
pub struct MockDetector {
    script: VecDeque<(u32, EventKind)>,
    should_fail_init: bool,
    counters: MockDetectorCounters,
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `kind` while processing the frame with zero-based index `frame`.
    pub fn with_event_at(mut self, frame: u32, kind: EventKind) -> Self {
        self.script.push_back((frame, kind));
        self
    }

    /// Configure the mock to fail initialization.
    pub fn with_init_failure(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    pub fn counters(&self) -> MockDetectorCounters {
        self.counters.clone()
    }
}

impl FrontEndDetector for MockDetector {
    fn init(&mut self, format: &AudioFormat, roles: &ChannelRoles) -> Result<()> {
        if self.should_fail_init {
            return Err(VoxlinkError::FrontEndInit {
                message: "mock detector init failure".to_string(),
            });
        }
        roles.check_against(format)
    }

    fn feed(&mut self, _pcm: &[u8]) -> Vec<EventKind> {
        let index = self.counters.frames.fetch_add(1, Ordering::SeqCst);
        let mut events = Vec::new();
        while self.script.front().is_some_and(|(at, _)| *at <= index) {
            if let Some((_, kind)) = self.script.pop_front() {
                events.push(kind);
            }
        }
        events
    }

    fn begin_command_detection(&mut self) {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_command_detection(&mut self) {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
