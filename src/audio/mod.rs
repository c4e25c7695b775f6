//! Audio formats, device contracts and signal helpers.

pub mod device;
pub mod format;
pub mod vad;
pub mod wav;

pub use device::{Microphone, MockMicrophone, MockSpeaker, NullSpeaker, Speaker};
pub use format::{AudioFormat, ChannelRole, ChannelRoles};
pub use vad::{Vad, VadConfig, VadState, VadTransition};
pub use wav::{WavMicrophone, WavSpeaker};
