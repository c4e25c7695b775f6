//! Gate strategies selected once at startup.

use crate::gate::event::{EventKind, FrontEndEvent};
use crate::gate::state::{GateState, GateTracker};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Dialog mode deciding which activity opens the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum GateMode {
    /// A push-to-talk key opens the gate; no detector runs.
    KeyPress,
    /// Wake word opens the gate until the wake session ends.
    WakeWord,
    /// Voice activity alone opens the gate.
    VoiceActivity,
}

impl GateMode {
    /// Whether this mode runs the front-end detector.
    pub fn uses_detector(self) -> bool {
        self != GateMode::KeyPress
    }

    /// What an event does to the command-detection window in this mode.
    pub fn command_window(self, kind: &EventKind) -> Option<CommandWindow> {
        match (self, kind) {
            (GateMode::WakeWord, EventKind::WakeStart { .. }) => Some(CommandWindow::Restart),
            (GateMode::WakeWord, EventKind::WakeEnd) => Some(CommandWindow::Cancel),
            (GateMode::WakeWord, _) => None,
            (_, EventKind::VadStart) => Some(CommandWindow::Restart),
            (_, EventKind::VadEnd) => Some(CommandWindow::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateMode::KeyPress => "key-press",
            GateMode::WakeWord => "wake-word",
            GateMode::VoiceActivity => "voice-activity",
        })
    }
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "key-press" | "keypress" => Ok(GateMode::KeyPress),
            "wake-word" | "wakeword" => Ok(GateMode::WakeWord),
            "voice-activity" | "vad" => Ok(GateMode::VoiceActivity),
            other => Err(format!(
                "unknown gate mode '{}' (expected key-press, wake-word or voice-activity)",
                other
            )),
        }
    }
}

/// Effect of an event on the detector's command window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandWindow {
    Restart,
    Cancel,
}

/// Decides whether captured frames are forwarded to the uplink.
pub trait AudioGate: Send {
    fn mode(&self) -> GateMode;

    /// Feeds one front-end event; returns the new gate state.
    fn observe(&mut self, event: &FrontEndEvent) -> GateState;

    /// Returns an event the gate synthesizes because a hold expired.
    fn expire(&mut self, _now: Instant) -> Option<EventKind> {
        None
    }

    /// Whether the current frame should be streamed.
    fn should_stream(&self) -> bool;

    fn state(&self) -> GateState;
}

/// Shared push-to-talk switch.
#[derive(Debug, Clone, Default)]
pub struct PushToTalk {
    pressed: Arc<AtomicBool>,
}

impl PushToTalk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

/// Streams while the push-to-talk key is held.
///
/// Key edges are reported as VAD_START / VAD_END so listeners see the same
/// event stream as in the detector modes.
pub struct KeyPressGate {
    key: PushToTalk,
    was_pressed: bool,
}

impl KeyPressGate {
    pub fn new(key: PushToTalk) -> Self {
        Self {
            key,
            was_pressed: false,
        }
    }
}

impl AudioGate for KeyPressGate {
    fn mode(&self) -> GateMode {
        GateMode::KeyPress
    }

    fn observe(&mut self, _event: &FrontEndEvent) -> GateState {
        self.state()
    }

    fn expire(&mut self, _now: Instant) -> Option<EventKind> {
        let pressed = self.key.is_pressed();
        if pressed == self.was_pressed {
            return None;
        }
        self.was_pressed = pressed;
        Some(if pressed {
            EventKind::VadStart
        } else {
            EventKind::VadEnd
        })
    }

    fn should_stream(&self) -> bool {
        self.key.is_pressed()
    }

    fn state(&self) -> GateState {
        if self.key.is_pressed() {
            GateState::VoiceActive
        } else {
            GateState::Closed
        }
    }
}

/// Streams while a wake session is active.
///
/// A session ends on WAKE_END, or once `hold` passes with no wake or voice
/// activity, in which case the gate synthesizes the WAKE_END itself.
pub struct WakeWordGate {
    tracker: GateTracker,
    hold: Duration,
    last_activity: Option<Instant>,
}

impl WakeWordGate {
    pub fn new(hold: Duration) -> Self {
        Self {
            tracker: GateTracker::new(),
            hold,
            last_activity: None,
        }
    }
}

impl AudioGate for WakeWordGate {
    fn mode(&self) -> GateMode {
        GateMode::WakeWord
    }

    fn observe(&mut self, event: &FrontEndEvent) -> GateState {
        match event.kind {
            EventKind::WakeStart { .. } | EventKind::VadStart | EventKind::VadEnd => {
                self.last_activity = Some(event.timestamp);
            }
            EventKind::WakeEnd => self.last_activity = None,
            _ => {}
        }
        self.tracker.apply(&event.kind)
    }

    fn expire(&mut self, now: Instant) -> Option<EventKind> {
        if self.tracker.voice_active() {
            self.last_activity = Some(now);
        }
        let last = self.last_activity?;
        if self.tracker.wake_active() && now.saturating_duration_since(last) >= self.hold {
            return Some(EventKind::WakeEnd);
        }
        None
    }

    fn should_stream(&self) -> bool {
        self.tracker.wake_active()
    }

    fn state(&self) -> GateState {
        self.tracker.state()
    }
}

/// Streams while voice activity is detected.
#[derive(Default)]
pub struct VoiceActivityGate {
    tracker: GateTracker,
}

impl VoiceActivityGate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioGate for VoiceActivityGate {
    fn mode(&self) -> GateMode {
        GateMode::VoiceActivity
    }

    fn observe(&mut self, event: &FrontEndEvent) -> GateState {
        self.tracker.apply(&event.kind)
    }

    fn should_stream(&self) -> bool {
        self.tracker.voice_active()
    }

    fn state(&self) -> GateState {
        self.tracker.state()
    }
}

/// Builds the gate strategy for `mode`.
pub fn build_gate(mode: GateMode, wake_hold: Duration, key: PushToTalk) -> Box<dyn AudioGate> {
    match mode {
        GateMode::KeyPress => Box::new(KeyPressGate::new(key)),
        GateMode::WakeWord => Box::new(WakeWordGate::new(wake_hold)),
        GateMode::VoiceActivity => Box::new(VoiceActivityGate::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64, kind: EventKind) -> FrontEndEvent {
        FrontEndEvent::new(kind, base + Duration::from_millis(ms))
    }

    fn wake_start() -> EventKind {
        EventKind::WakeStart {
            word_index: 1,
            model_index: 0,
        }
    }

    #[test]
    fn test_gate_mode_parse_and_display() {
        assert_eq!("wake-word".parse::<GateMode>().unwrap(), GateMode::WakeWord);
        assert_eq!("VOICE_ACTIVITY".parse::<GateMode>().unwrap(), GateMode::VoiceActivity);
        assert_eq!("key-press".parse::<GateMode>().unwrap(), GateMode::KeyPress);
        assert!("always".parse::<GateMode>().is_err());
        assert_eq!(GateMode::WakeWord.to_string(), "wake-word");
    }

    #[test]
    fn test_command_window_policy() {
        assert_eq!(
            GateMode::WakeWord.command_window(&wake_start()),
            Some(CommandWindow::Restart)
        );
        assert_eq!(GateMode::WakeWord.command_window(&EventKind::VadStart), None);
        assert_eq!(
            GateMode::WakeWord.command_window(&EventKind::WakeEnd),
            Some(CommandWindow::Cancel)
        );
        assert_eq!(
            GateMode::VoiceActivity.command_window(&EventKind::VadStart),
            Some(CommandWindow::Restart)
        );
        assert_eq!(
            GateMode::VoiceActivity.command_window(&EventKind::VadEnd),
            Some(CommandWindow::Cancel)
        );
        assert_eq!(GateMode::VoiceActivity.command_window(&wake_start()), None);
    }

    #[test]
    fn test_key_press_gate_follows_key() {
        let key = PushToTalk::new();
        let gate = KeyPressGate::new(key.clone());
        assert!(!gate.should_stream());

        key.press();
        assert!(gate.should_stream());
        assert_eq!(gate.state(), GateState::VoiceActive);

        key.release();
        assert!(!gate.should_stream());
        assert!(!GateMode::KeyPress.uses_detector());
    }

    #[test]
    fn test_key_press_gate_reports_edges_once() {
        let key = PushToTalk::new();
        let mut gate = KeyPressGate::new(key.clone());
        let now = Instant::now();
        assert_eq!(gate.expire(now), None);

        key.press();
        assert_eq!(gate.expire(now), Some(EventKind::VadStart));
        assert_eq!(gate.expire(now), None);

        key.release();
        assert_eq!(gate.expire(now), Some(EventKind::VadEnd));
        assert_eq!(gate.expire(now), None);
    }

    #[test]
    fn test_wake_gate_ignores_voice_alone() {
        let base = Instant::now();
        let mut gate = WakeWordGate::new(Duration::from_secs(60));
        gate.observe(&at(base, 0, EventKind::VadStart));
        assert!(!gate.should_stream());
        assert_eq!(gate.state(), GateState::VoiceActive);

        gate.observe(&at(base, 10, wake_start()));
        assert!(gate.should_stream());
        gate.observe(&at(base, 20, EventKind::WakeEnd));
        assert!(!gate.should_stream());
    }

    #[test]
    fn test_wake_gate_synthesizes_end_after_hold() {
        let base = Instant::now();
        let mut gate = WakeWordGate::new(Duration::from_millis(500));
        gate.observe(&at(base, 0, wake_start()));

        assert_eq!(gate.expire(base + Duration::from_millis(499)), None);
        assert_eq!(
            gate.expire(base + Duration::from_millis(500)),
            Some(EventKind::WakeEnd)
        );
    }

    #[test]
    fn test_wake_gate_hold_extended_by_voice() {
        let base = Instant::now();
        let mut gate = WakeWordGate::new(Duration::from_millis(500));
        gate.observe(&at(base, 0, wake_start()));
        gate.observe(&at(base, 100, EventKind::VadStart));

        // Voice still active: activity refreshes on every check
        assert_eq!(gate.expire(base + Duration::from_millis(900)), None);
        gate.observe(&at(base, 1000, EventKind::VadEnd));
        assert_eq!(gate.expire(base + Duration::from_millis(1400)), None);
        assert_eq!(
            gate.expire(base + Duration::from_millis(1500)),
            Some(EventKind::WakeEnd)
        );
    }

    #[test]
    fn test_wake_gate_no_expiry_when_closed() {
        let base = Instant::now();
        let mut gate = WakeWordGate::new(Duration::from_millis(10));
        assert_eq!(gate.expire(base + Duration::from_secs(5)), None);
        gate.observe(&at(base, 0, wake_start()));
        gate.observe(&at(base, 1, EventKind::WakeEnd));
        assert_eq!(gate.expire(base + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_voice_gate_streams_only_on_voice() {
        let base = Instant::now();
        let mut gate = VoiceActivityGate::new();
        gate.observe(&at(base, 0, wake_start()));
        assert!(!gate.should_stream());
        gate.observe(&at(base, 1, EventKind::VadStart));
        assert!(gate.should_stream());
        gate.observe(&at(base, 2, EventKind::VadEnd));
        assert!(!gate.should_stream());
    }

    #[test]
    fn test_build_gate_selects_strategy() {
        let hold = Duration::from_secs(60);
        for mode in [GateMode::KeyPress, GateMode::WakeWord, GateMode::VoiceActivity] {
            assert_eq!(build_gate(mode, hold, PushToTalk::new()).mode(), mode);
        }
    }

    #[test]
    fn test_gate_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: GateMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"voice-activity\"").unwrap();
        assert_eq!(parsed.mode, GateMode::VoiceActivity);
    }
}
