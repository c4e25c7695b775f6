//! Playback path: software volume, prompt muting and the drain watchdog.
//!
//! Decoded PCM enters through [`PlaybackFeed::feed`], crosses the playback
//! handoff queue, and is written to the speaker by [`PlaybackStation`]. The
//! station doubles as the watchdog: when no real frame has arrived for longer
//! than the timeout, it writes one short zero buffer to flush the output path.

use crate::audio::device::Speaker;
use crate::clock::Clock;
use crate::error::{Result, VoxlinkError};
use crate::pipeline::error::StationError;
use crate::pipeline::queue::{FrameQueue, QueueError};
use crate::pipeline::station::Station;
use crate::pipeline::types::PipelineStats;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Speaker shared between the playback station and the prompt player.
pub type SharedSpeaker = Arc<Mutex<Box<dyn Speaker>>>;

pub fn shared_speaker(speaker: Box<dyn Speaker>) -> SharedSpeaker {
    Arc::new(Mutex::new(speaker))
}

/// Watchdog phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Playing,
    Drained,
}

/// Detects prolonged silence on the playback path.
#[derive(Debug, Clone)]
pub struct Watchdog {
    state: WatchdogState,
    last_audio: Option<Instant>,
    timeout: Duration,
}

impl Watchdog {
    /// Starts drained: nothing has played yet, so there is nothing to flush.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: WatchdogState::Drained,
            last_audio: None,
            timeout,
        }
    }

    /// Records a real frame.
    pub fn on_frame(&mut self, now: Instant) {
        self.state = WatchdogState::Playing;
        self.last_audio = Some(now);
    }

    /// Returns true exactly once per transition into `Drained`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.state != WatchdogState::Playing {
            return false;
        }
        let Some(last) = self.last_audio else {
            return false;
        };
        if now.saturating_duration_since(last) > self.timeout {
            self.state = WatchdogState::Drained;
            return true;
        }
        false
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }
}

/// Runtime controls shared by the playback station, its feed and prompts.
#[derive(Debug, Clone)]
pub struct PlaybackControl {
    volume: Arc<AtomicU8>,
    prompt_active: Arc<AtomicBool>,
}

impl PlaybackControl {
    /// `volume` is clamped to 100.
    pub fn new(volume: u8) -> Self {
        Self {
            volume: Arc::new(AtomicU8::new(volume.min(100))),
            prompt_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Sets the software volume (0-100).
    pub fn set_volume(&self, volume: u8) -> Result<()> {
        if volume > 100 {
            return Err(VoxlinkError::ConfigInvalidValue {
                key: "playback.volume".to_string(),
                message: format!("{} is above 100", volume),
            });
        }
        self.volume.store(volume, Ordering::Relaxed);
        debug!(volume, "playback volume set");
        Ok(())
    }

    /// Whether a prompt currently owns the speaker.
    pub fn prompt_active(&self) -> bool {
        self.prompt_active.load(Ordering::SeqCst)
    }

    /// Claims the speaker for a prompt. Returns false if one already has it.
    pub(crate) fn begin_prompt(&self) -> bool {
        !self.prompt_active.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn end_prompt(&self) {
        self.prompt_active.store(false, Ordering::SeqCst);
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new(crate::defaults::PLAYBACK_VOLUME)
    }
}

/// Scales little-endian PCM in place by `volume` percent.
pub fn apply_volume(pcm: &mut [u8], volume: u8, bits_per_sample: u16) {
    if volume >= 100 {
        return;
    }
    let volume = i64::from(volume);
    match bits_per_sample {
        32 => {
            for chunk in pcm.chunks_exact_mut(4) {
                let sample = i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                let scaled = (sample * volume / 100) as i32;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        _ => {
            for chunk in pcm.chunks_exact_mut(2) {
                let sample = i64::from(i16::from_le_bytes([chunk[0], chunk[1]]));
                let scaled = (sample * volume / 100) as i16;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
        }
    }
}

/// Producer side of the playback path.
#[derive(Clone)]
pub struct PlaybackFeed {
    queue: Arc<FrameQueue>,
    control: PlaybackControl,
    stats: Arc<PipelineStats>,
    timeout: Duration,
}

impl PlaybackFeed {
    pub fn new(
        queue: Arc<FrameQueue>,
        control: PlaybackControl,
        stats: Arc<PipelineStats>,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            control,
            stats,
            timeout,
        }
    }

    /// Queues PCM for the speaker, split into slot-sized pieces.
    ///
    /// While a prompt is playing the PCM is accepted and discarded.
    pub fn feed(&self, pcm: &[u8]) -> std::result::Result<(), QueueError> {
        if self.control.prompt_active() {
            PipelineStats::bump(&self.stats.frames_muted);
            return Ok(());
        }
        for piece in pcm.chunks(self.queue.slot_size()) {
            let mut slot = self.queue.acquire_write(piece.len(), Some(self.timeout))?;
            slot.buffer_mut()[..piece.len()].copy_from_slice(piece);
            self.queue.release_write(slot, piece.len())?;
        }
        Ok(())
    }
}

/// Playback station settings.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    pub bits_per_sample: u16,
    pub timeout: Duration,
    pub flush_bytes: usize,
}

/// Consumer side of the playback path; owns the watchdog.
pub struct PlaybackStation {
    speaker: SharedSpeaker,
    control: PlaybackControl,
    watchdog: Watchdog,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
    bits_per_sample: u16,
    flush: Vec<u8>,
    scratch: Vec<u8>,
}

impl PlaybackStation {
    pub fn new(
        speaker: SharedSpeaker,
        control: PlaybackControl,
        settings: PlaybackSettings,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            speaker,
            control,
            watchdog: Watchdog::new(settings.timeout),
            clock,
            stats,
            bits_per_sample: settings.bits_per_sample,
            flush: vec![0; settings.flush_bytes],
            scratch: Vec::new(),
        }
    }

    pub fn watchdog_state(&self) -> WatchdogState {
        self.watchdog.state()
    }

    fn write(&self, pcm: &[u8]) -> std::result::Result<(), StationError> {
        let mut speaker = self
            .speaker
            .lock()
            .map_err(|_| StationError::Fatal("speaker lock poisoned".to_string()))?;
        speaker
            .write(pcm)
            .map(|_| ())
            .map_err(|e| StationError::Recoverable(format!("speaker write failed: {}", e)))
    }
}

impl Station for PlaybackStation {
    fn process(&mut self, frame: &[u8]) -> std::result::Result<(), StationError> {
        if self.control.prompt_active() {
            PipelineStats::bump(&self.stats.frames_muted);
            return Ok(());
        }

        self.watchdog.on_frame(self.clock.now());

        self.scratch.clear();
        self.scratch.extend_from_slice(frame);
        apply_volume(&mut self.scratch, self.control.volume(), self.bits_per_sample);
        self.write(&self.scratch)?;
        PipelineStats::bump(&self.stats.frames_played);
        Ok(())
    }

    fn idle(&mut self) -> std::result::Result<(), StationError> {
        if !self.watchdog.poll(self.clock.now()) {
            return Ok(());
        }
        if self.control.prompt_active() {
            debug!("prompt owns the speaker, skipping drain flush");
            return Ok(());
        }

        info!(bytes = self.flush.len(), "playback drained, flushing output");
        PipelineStats::bump(&self.stats.watchdog_flushes);
        self.write(&self.flush)?;
        let mut speaker = self
            .speaker
            .lock()
            .map_err(|_| StationError::Fatal("speaker lock poisoned".to_string()))?;
        speaker
            .flush()
            .map_err(|e| StationError::Recoverable(format!("speaker flush failed: {}", e)))
    }

    fn name(&self) -> &'static str {
        "playback"
    }

    fn shutdown(&mut self) {
        match self.speaker.lock() {
            Ok(mut speaker) => {
                if let Err(e) = speaker.flush() {
                    warn!(error = %e, "speaker flush on shutdown failed");
                }
            }
            Err(_) => warn!("speaker lock poisoned on shutdown"),
        }
    }
}
