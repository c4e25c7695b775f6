//! voxlink - Audio streaming core for voice-assistant devices
//!
//! Captures microphone audio, gates it on wake-word and voice activity,
//! streams it to a conversational service and plays the replies back, with
//! a conversation state machine tracking the dialog.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod chat;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod gate;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod supervisor;

// Device and service contracts
pub use audio::device::{Microphone, Speaker};
pub use chat::{ChatChannel, ChatEvent};
pub use codec::{CodecKind, FrameDecoder, FrameEncoder};
pub use gate::detector::FrontEndDetector;

// Pipeline
pub use pipeline::orchestrator::{Pipeline, PipelineConfig, PipelineHandle, PipelineParts};

// Conversation
pub use conversation::{ConversationEvent, ConversationMachine, ConversationState};
pub use supervisor::Supervisor;

// Error handling
pub use error::{Result, VoxlinkError};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
