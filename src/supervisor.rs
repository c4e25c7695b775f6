//! Supervisor: turns pipeline and chat notifications into conversation events.

use crate::chat::ChatEvent;
use crate::conversation::machine::{ConversationHandle, PostError};
use crate::conversation::state::ConversationEvent;
use crate::error::{Result, VoxlinkError};
use crate::gate::event::{EventKind, FrontEndEvent};
use crate::gate::strategy::GateMode;
use crate::pipeline::uplink::UplinkHealth;
use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Conversation events implied by a front-end event.
///
/// Outside wake-word mode nothing emits WAKE_START, so speech onset both
/// wakes the device and starts recording.
pub fn front_end_to_conversation(mode: GateMode, kind: &EventKind) -> &'static [ConversationEvent] {
    match kind {
        EventKind::WakeStart { .. } => &[ConversationEvent::WakeUp],
        EventKind::VadStart if mode == GateMode::WakeWord => &[ConversationEvent::StartRecord],
        EventKind::VadStart => &[ConversationEvent::WakeUp, ConversationEvent::StartRecord],
        EventKind::VadEnd => &[ConversationEvent::StopRecord],
        _ => &[],
    }
}

/// Conversation event implied by a chat session event.
pub fn chat_to_conversation(event: &ChatEvent) -> Option<ConversationEvent> {
    match event {
        ChatEvent::SpeechStarted => Some(ConversationEvent::ProcessDone),
        ChatEvent::SpeechStopped => Some(ConversationEvent::SpeakDone),
        ChatEvent::Subtitle(_) | ChatEvent::CustomerData(_) => None,
    }
}

/// Receivers the supervisor drains.
pub struct SupervisorInputs {
    pub events: Receiver<FrontEndEvent>,
    pub chat: Receiver<ChatEvent>,
    pub health: Receiver<UplinkHealth>,
}

pub struct Supervisor {
    conversation: ConversationHandle,
    mode: GateMode,
    error_threshold: u32,
    /// Failure run that already raised ERROR_OCCURRED.
    raised_run: Option<u64>,
    chat_forward: Option<Sender<ChatEvent>>,
}

impl Supervisor {
    pub fn new(conversation: ConversationHandle, mode: GateMode) -> Self {
        Self {
            conversation,
            mode,
            error_threshold: crate::defaults::CHANNEL_ERROR_THRESHOLD,
            raised_run: None,
            chat_forward: None,
        }
    }

    /// Consecutive uplink failures that raise ERROR_OCCURRED; zero disables it.
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    /// Passes every chat event on after handling it.
    pub fn with_chat_forward(mut self, tx: Sender<ChatEvent>) -> Self {
        self.chat_forward = Some(tx);
        self
    }

    pub fn handle_front_end(&mut self, event: &FrontEndEvent) {
        for &mapped in front_end_to_conversation(self.mode, &event.kind) {
            self.post(mapped);
        }
    }

    pub fn handle_chat(&mut self, event: ChatEvent) {
        if let Some(mapped) = chat_to_conversation(&event) {
            self.post(mapped);
        }
        if let Some(tx) = &self.chat_forward
            && tx.try_send(event).is_err()
        {
            debug!("chat forward listener not keeping up");
        }
    }

    /// Raises ERROR_OCCURRED once per failure run that reaches the threshold.
    ///
    /// The run length comes from the sender, so lost notices neither merge
    /// separate runs nor hide a threshold crossing.
    pub fn handle_health(&mut self, health: UplinkHealth) {
        match health {
            UplinkHealth::Failed {
                consecutive, run, ..
            } => {
                if self.error_threshold > 0
                    && consecutive >= self.error_threshold
                    && self.raised_run != Some(run)
                {
                    self.raised_run = Some(run);
                    error!(
                        failures = consecutive,
                        "uplink keeps failing, raising conversation error"
                    );
                    self.post(ConversationEvent::ErrorOccurred);
                }
            }
            UplinkHealth::Recovered => debug!("uplink recovered"),
        }
    }

    fn post(&self, event: ConversationEvent) {
        match self.conversation.post(event) {
            Ok(()) => debug!(%event, "posted conversation event"),
            Err(PostError::Full) => warn!(%event, "conversation queue full, dropping event"),
            Err(PostError::Stopped) => debug!(%event, "conversation task stopped"),
        }
    }

    /// Runs the supervisor on its own thread until stopped.
    pub fn spawn(mut self, inputs: SupervisorInputs) -> Result<SupervisorTask> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("voxlink-supervisor".to_string())
            .spawn(move || {
                let SupervisorInputs {
                    mut events,
                    mut chat,
                    mut health,
                } = inputs;
                loop {
                    select! {
                        recv(events) -> msg => match msg {
                            Ok(event) => self.handle_front_end(&event),
                            Err(_) => events = never(),
                        },
                        recv(chat) -> msg => match msg {
                            Ok(event) => self.handle_chat(event),
                            Err(_) => chat = never(),
                        },
                        recv(health) -> msg => match msg {
                            Ok(report) => self.handle_health(report),
                            Err(_) => health = never(),
                        },
                        recv(stop_rx) -> _ => break,
                        default(IDLE_POLL) => {}
                    }
                }
                debug!("supervisor exited");
            })
            .map_err(|e| VoxlinkError::Other(format!("failed to spawn supervisor: {}", e)))?;

        Ok(SupervisorTask {
            stop_tx,
            thread: Some(thread),
        })
    }
}

pub struct SupervisorTask {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SupervisorTask {
    pub fn stop(mut self) -> std::result::Result<(), String> {
        if self.stop_tx.try_send(()).is_err() {
            debug!("supervisor already stopping");
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| "supervisor thread panicked".to_string()),
            None => Ok(()),
        }
    }
}
