//! Tri-state gate derived from front-end events.

use crate::gate::event::EventKind;
use std::fmt;

/// Whether captured audio is eligible for transmission, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    WakeActive,
    VoiceActive,
}

impl GateState {
    pub fn is_open(self) -> bool {
        self != GateState::Closed
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateState::Closed => "CLOSED",
            GateState::WakeActive => "WAKE_ACTIVE",
            GateState::VoiceActive => "VOICE_ACTIVE",
        })
    }
}

/// Tracks wake and voice activity independently.
///
/// The gate reports the most recently started activity and closes only
/// once both are inactive.
#[derive(Debug, Clone, Copy)]
pub struct GateTracker {
    wake: bool,
    voice: bool,
    state: GateState,
}

impl Default for GateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GateTracker {
    pub fn new() -> Self {
        Self {
            wake: false,
            voice: false,
            state: GateState::Closed,
        }
    }

    /// Applies one event and returns the resulting state.
    pub fn apply(&mut self, kind: &EventKind) -> GateState {
        match kind {
            EventKind::WakeStart { .. } => {
                self.wake = true;
                self.state = GateState::WakeActive;
            }
            EventKind::VadStart => {
                self.voice = true;
                self.state = GateState::VoiceActive;
            }
            EventKind::WakeEnd => {
                self.wake = false;
                if self.voice {
                    self.state = GateState::VoiceActive;
                } else {
                    self.state = GateState::Closed;
                }
            }
            EventKind::VadEnd => {
                self.voice = false;
                if self.wake {
                    self.state = GateState::WakeActive;
                } else {
                    self.state = GateState::Closed;
                }
            }
            EventKind::CommandTimeout | EventKind::CommandResult { .. } => {}
        }
        self.state
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn wake_active(&self) -> bool {
        self.wake
    }

    pub fn voice_active(&self) -> bool {
        self.voice
    }
}
