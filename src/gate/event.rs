//! Events emitted by the audio front-end.

use std::fmt;
use std::time::Instant;

/// What the front-end observed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Wake word spotted.
    WakeStart { word_index: u32, model_index: u32 },
    /// Wake session ended.
    WakeEnd,
    /// Voice activity began.
    VadStart,
    /// Voice activity ended.
    VadEnd,
    /// Command window elapsed without a result.
    CommandTimeout,
    /// Command phrase recognized.
    CommandResult {
        phrase_id: i32,
        probability: f32,
        text: String,
    },
}

impl EventKind {
    /// Upper-case wire name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::WakeStart { .. } => "WAKE_START",
            EventKind::WakeEnd => "WAKE_END",
            EventKind::VadStart => "VAD_START",
            EventKind::VadEnd => "VAD_END",
            EventKind::CommandTimeout => "COMMAND_TIMEOUT",
            EventKind::CommandResult { .. } => "COMMAND_RESULT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::WakeStart {
                word_index,
                model_index,
            } => write!(f, "WAKE_START(word={}, model={})", word_index, model_index),
            EventKind::CommandResult {
                phrase_id,
                probability,
                text,
            } => write!(
                f,
                "COMMAND_RESULT(id={}, p={:.2}, \"{}\")",
                phrase_id, probability, text
            ),
            other => f.write_str(other.name()),
        }
    }
}

/// A front-end event stamped with the monotonic time it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontEndEvent {
    pub timestamp: Instant,
    pub kind: EventKind,
}

impl FrontEndEvent {
    pub fn new(kind: EventKind, timestamp: Instant) -> Self {
        Self { timestamp, kind }
    }
}
