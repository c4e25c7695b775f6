//! Conversation states, events and the transition table.

use serde::Serialize;
use std::fmt;

/// Device-level conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Init,
    WifiConfig,
    Connecting,
    Idle,
    Listening,
    Recording,
    Processing,
    Speaking,
    Error,
}

impl ConversationState {
    pub fn name(self) -> &'static str {
        match self {
            ConversationState::Init => "INIT",
            ConversationState::WifiConfig => "WIFI_CONFIG",
            ConversationState::Connecting => "CONNECTING",
            ConversationState::Idle => "IDLE",
            ConversationState::Listening => "LISTENING",
            ConversationState::Recording => "RECORDING",
            ConversationState::Processing => "PROCESSING",
            ConversationState::Speaking => "SPEAKING",
            ConversationState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input to the conversation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationEvent {
    InitDone,
    ConfigDone,
    WifiConnected,
    WifiDisconnected,
    WakeUp,
    StartRecord,
    StopRecord,
    ProcessDone,
    SpeakDone,
    ErrorOccurred,
    Reset,
}

impl ConversationEvent {
    pub fn name(self) -> &'static str {
        match self {
            ConversationEvent::InitDone => "INIT_DONE",
            ConversationEvent::ConfigDone => "CONFIG_DONE",
            ConversationEvent::WifiConnected => "WIFI_CONNECTED",
            ConversationEvent::WifiDisconnected => "WIFI_DISCONNECTED",
            ConversationEvent::WakeUp => "WAKE_UP",
            ConversationEvent::StartRecord => "START_RECORD",
            ConversationEvent::StopRecord => "STOP_RECORD",
            ConversationEvent::ProcessDone => "PROCESS_DONE",
            ConversationEvent::SpeakDone => "SPEAK_DONE",
            ConversationEvent::ErrorOccurred => "ERROR_OCCURRED",
            ConversationEvent::Reset => "RESET",
        }
    }
}

impl fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Applies one event to `state`.
///
/// Pairs missing from the table leave the state unchanged. ERROR_OCCURRED
/// is checked after the state-specific table and wins from every state.
pub fn transition(state: ConversationState, event: ConversationEvent) -> ConversationState {
    use ConversationEvent as E;
    use ConversationState as S;

    let next = match (state, event) {
        (S::Init, E::InitDone) => S::WifiConfig,
        (S::WifiConfig, E::ConfigDone) => S::Connecting,
        (S::Connecting, E::WifiConnected) => S::Idle,
        (S::Connecting, E::WifiDisconnected) => S::WifiConfig,
        (S::Idle, E::WakeUp) => S::Listening,
        (S::Idle, E::WifiDisconnected) => S::Connecting,
        (S::Listening, E::StartRecord) => S::Recording,
        (S::Recording, E::StopRecord) => S::Processing,
        (S::Processing, E::ProcessDone) => S::Speaking,
        (S::Speaking, E::SpeakDone) => S::Idle,
        (S::Error, E::Reset) => S::Init,
        (current, _) => current,
    };

    if event == E::ErrorOccurred {
        return S::Error;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationEvent as E;
    use ConversationState as S;

    const ALL_STATES: [ConversationState; 9] = [
        S::Init,
        S::WifiConfig,
        S::Connecting,
        S::Idle,
        S::Listening,
        S::Recording,
        S::Processing,
        S::Speaking,
        S::Error,
    ];

    const ALL_EVENTS: [ConversationEvent; 11] = [
        E::InitDone,
        E::ConfigDone,
        E::WifiConnected,
        E::WifiDisconnected,
        E::WakeUp,
        E::StartRecord,
        E::StopRecord,
        E::ProcessDone,
        E::SpeakDone,
        E::ErrorOccurred,
        E::Reset,
    ];

    fn run(start: ConversationState, events: &[ConversationEvent]) -> ConversationState {
        events.iter().fold(start, |state, &event| transition(state, event))
    }

    #[test]
    fn test_boot_sequence() {
        assert_eq!(
            run(S::Init, &[E::InitDone, E::ConfigDone, E::WifiConnected]),
            S::Idle
        );
    }

    #[test]
    fn test_dialog_round_trip() {
        let dialog = [
            E::WakeUp,
            E::StartRecord,
            E::StopRecord,
            E::ProcessDone,
            E::SpeakDone,
        ];
        assert_eq!(run(S::Idle, &dialog), S::Idle);
    }

    #[test]
    fn test_error_injected_anywhere_in_dialog() {
        let dialog = [
            E::WakeUp,
            E::StartRecord,
            E::StopRecord,
            E::ProcessDone,
            E::SpeakDone,
        ];
        for split in 0..=dialog.len() {
            let state = run(S::Idle, &dialog[..split]);
            assert_eq!(transition(state, E::ErrorOccurred), S::Error);
            // Nothing but RESET leaves ERROR
            assert_eq!(run(S::Error, &dialog[split..]), S::Error);
        }
    }

    #[test]
    fn test_error_from_every_state() {
        for state in ALL_STATES {
            assert_eq!(transition(state, E::ErrorOccurred), S::Error);
        }
    }

    #[test]
    fn test_reset_only_leaves_error() {
        assert_eq!(transition(S::Error, E::Reset), S::Init);
        for state in ALL_STATES.into_iter().filter(|s| *s != S::Error) {
            assert_eq!(transition(state, E::Reset), state);
        }
    }

    #[test]
    fn test_wifi_loss() {
        assert_eq!(transition(S::Idle, E::WifiDisconnected), S::Connecting);
        assert_eq!(transition(S::Connecting, E::WifiDisconnected), S::WifiConfig);
        // Not in the table for an active dialog
        assert_eq!(transition(S::Recording, E::WifiDisconnected), S::Recording);
    }

    #[test]
    fn test_unhandled_pairs_are_no_ops() {
        let table_size = ALL_STATES
            .iter()
            .flat_map(|&s| ALL_EVENTS.iter().map(move |&e| (s, e)))
            .filter(|&(s, e)| e != E::ErrorOccurred && transition(s, e) != s)
            .count();
        assert_eq!(table_size, 11);
    }

    #[test]
    fn test_names() {
        assert_eq!(S::WifiConfig.to_string(), "WIFI_CONFIG");
        assert_eq!(E::ErrorOccurred.to_string(), "ERROR_OCCURRED");
    }
}
