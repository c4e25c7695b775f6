//! Audio pipeline: capture → front-end → uplink, and downlink → decode → playback.
//!
//! Each task runs in its own thread. Tasks communicate only through bounded
//! [`FrameQueue`]s, so a frame has exactly one owner at a time.

pub mod capture;
pub mod downlink;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod prompt;
pub mod queue;
pub mod station;
pub mod types;
pub mod uplink;

pub use capture::{CaptureSettings, CaptureTask};
pub use downlink::{DecodeStation, DownlinkHandle};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle, PipelineParts};
pub use playback::{PlaybackControl, PlaybackFeed, PlaybackStation, Watchdog, WatchdogState};
pub use prompt::PromptPlayer;
pub use queue::{FrameQueue, QueueError, QueueMode, ReadableSlot, WritableSlot};
pub use station::{Station, StationRunner};
pub use types::{Frame, PipelineStats, StatsSnapshot};
pub use uplink::{UplinkHealth, UplinkSender};
