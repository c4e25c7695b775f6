//! Conversation state machine and the task that serializes its events.

pub mod machine;
pub mod state;

pub use machine::{ConversationHandle, ConversationMachine, ConversationTask, PostError, StateChange};
pub use state::{ConversationEvent, ConversationState, transition};
