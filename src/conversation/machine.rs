//! Conversation task: owns the state and applies queued events in order.

use crate::conversation::state::{ConversationEvent, ConversationState, transition};
use crate::error::{Result, VoxlinkError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const RECV_POLL: Duration = Duration::from_millis(100);

/// A state transition that actually changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: ConversationEvent,
}

/// Why an event could not be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    #[error("conversation queue is full")]
    Full,

    #[error("conversation task has stopped")]
    Stopped,
}

/// Cloneable sender side of the conversation queue.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    tx: Sender<ConversationEvent>,
    state: Arc<Mutex<ConversationState>>,
}

impl ConversationHandle {
    /// Queues an event without blocking.
    pub fn post(&self, event: ConversationEvent) -> std::result::Result<(), PostError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PostError::Full,
            TrySendError::Disconnected(_) => PostError::Stopped,
        })
    }

    /// Latest state applied by the task.
    pub fn state(&self) -> ConversationState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Builder for the conversation task.
pub struct ConversationMachine {
    capacity: usize,
    initial: ConversationState,
    listener: Option<Sender<StateChange>>,
}

impl ConversationMachine {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            initial: ConversationState::Init,
            listener: None,
        }
    }

    pub fn with_initial_state(mut self, state: ConversationState) -> Self {
        self.initial = state;
        self
    }

    /// Receives every state change. Delivery never blocks the task.
    pub fn with_listener(mut self, tx: Sender<StateChange>) -> Self {
        self.listener = Some(tx);
        self
    }

    pub fn start(self) -> Result<ConversationTask> {
        if self.capacity == 0 {
            return Err(VoxlinkError::ResourceExhausted {
                what: "conversation queue".to_string(),
                message: "capacity must be non-zero".to_string(),
            });
        }

        let (tx, rx) = bounded(self.capacity);
        let state = Arc::new(Mutex::new(self.initial));
        let running = Arc::new(AtomicBool::new(true));

        let task_state = state.clone();
        let task_running = running.clone();
        let listener = self.listener;
        let thread = thread::Builder::new()
            .name("voxlink-conversation".to_string())
            .spawn(move || run(&rx, &task_state, &task_running, listener.as_ref()))
            .map_err(|e| VoxlinkError::Other(format!("failed to spawn conversation task: {}", e)))?;

        info!(state = %self.initial, capacity = self.capacity, "conversation task started");
        Ok(ConversationTask {
            handle: ConversationHandle { tx, state },
            running,
            thread: Some(thread),
        })
    }
}

/// Running conversation task.
pub struct ConversationTask {
    handle: ConversationHandle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ConversationTask {
    pub fn handle(&self) -> ConversationHandle {
        self.handle.clone()
    }

    pub fn post(&self, event: ConversationEvent) -> std::result::Result<(), PostError> {
        self.handle.post(event)
    }

    pub fn state(&self) -> ConversationState {
        self.handle.state()
    }

    /// Stops the task after its current event and waits for it.
    pub fn stop(mut self) -> std::result::Result<(), String> {
        self.running.store(false, Ordering::SeqCst);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| "conversation thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

fn run(
    rx: &Receiver<ConversationEvent>,
    state: &Mutex<ConversationState>,
    running: &AtomicBool,
    listener: Option<&Sender<StateChange>>,
) {
    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(RECV_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut current = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let from = *current;
        let to = transition(from, event);
        if to == from {
            debug!(state = %from, %event, "event ignored");
            continue;
        }
        *current = to;
        drop(current);

        info!(%from, %to, %event, "conversation state changed");
        if let Some(tx) = listener
            && tx.try_send(StateChange { from, to, event }).is_err()
        {
            warn!(%to, "state listener not keeping up, dropping notification");
        }
    }
    debug!("conversation task exited");
}
