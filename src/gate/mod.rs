//! Audio front-end gate: events, gate state, strategies and the station
//! that decides which capture frames reach the network.

pub mod detector;
pub mod event;
pub mod frontend;
pub mod state;
pub mod strategy;

pub use detector::{EnergyDetector, EnergyDetectorConfig, FrontEndDetector, MockDetector};
pub use event::{EventKind, FrontEndEvent};
pub use frontend::FrontEndStation;
pub use state::{GateState, GateTracker};
pub use strategy::{AudioGate, GateMode, PushToTalk, build_gate};
