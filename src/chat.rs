//! Remote chat channel contract and a loopback implementation.

use crate::codec::FrameEncoder;
use crate::pipeline::downlink::DownlinkHandle;
use serde::Deserialize;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a frame could not be sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("chat session is not connected")]
    NotConnected,

    #[error("chat channel rejected frame: {0}")]
    Rejected(String),
}

/// Bidirectional session with the conversational service.
pub trait ChatChannel: Send + Sync {
    /// Sends one uplink frame.
    fn send_audio(&self, frame: &[u8]) -> Result<(), ChannelError>;

    /// Registers the receive side. Audio and session events are delivered
    /// through `downlink` from whatever thread the transport runs on.
    fn attach(&self, _downlink: DownlinkHandle) {}

    fn name(&self) -> &'static str;
}

/// Session lifecycle notifications pushed by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SpeechStarted,
    SpeechStopped,
    Subtitle(String),
    CustomerData(serde_json::Value),
}

#[derive(Deserialize)]
struct SubtitlePayload {
    #[serde(alias = "content")]
    text: String,
}

impl ChatEvent {
    /// Parses an `(kind, payload)` pair from the transport.
    ///
    /// Unknown kinds yield `Ok(None)`. A `customer_data` payload must be JSON;
    /// a `subtitle` payload may be JSON (`text`/`content`) or plain text.
    pub fn parse(kind: &str, payload: &str) -> Result<Option<Self>, serde_json::Error> {
        let event = match kind.to_ascii_lowercase().as_str() {
            "speech_started" => ChatEvent::SpeechStarted,
            "speech_stopped" | "speech_stoped" => ChatEvent::SpeechStopped,
            "subtitle" => {
                let text = serde_json::from_str::<SubtitlePayload>(payload)
                    .map(|p| p.text)
                    .unwrap_or_else(|_| payload.to_string());
                ChatEvent::Subtitle(text)
            }
            "customer_data" => ChatEvent::CustomerData(serde_json::from_str(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Default)]
struct EchoState {
    downlink: Option<DownlinkHandle>,
    connected: bool,
    pending: Vec<u8>,
}

/// Loopback channel: records one utterance and plays it back on `reply`.
pub struct EchoChannel {
    state: Mutex<EchoState>,
    packet_bytes: usize,
    packet_interval: Duration,
    max_pending: usize,
    encoder: Option<Mutex<Box<dyn FrameEncoder>>>,
}

impl EchoChannel {
    /// `packet_bytes` per downlink packet, delivered every `packet_interval`.
    pub fn new(packet_bytes: usize, packet_interval: Duration) -> Self {
        Self {
            state: Mutex::new(EchoState {
                connected: true,
                ..Default::default()
            }),
            packet_bytes: packet_bytes.max(1),
            packet_interval,
            max_pending: usize::MAX,
            encoder: None,
        }
    }

    /// Encodes replies instead of sending raw PCM. Packets then cover one
    /// encoder frame each; the last one is padded with silence.
    pub fn with_encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        self.packet_bytes = encoder.frame_bytes().max(1);
        self.encoder = Some(Mutex::new(encoder));
        self
    }

    /// Caps the recorded utterance; further frames are rejected.
    pub fn with_max_pending(mut self, bytes: usize) -> Self {
        self.max_pending = bytes;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.connected = connected;
        }
    }

    /// Bytes recorded since the last reply.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Plays the recorded utterance back through the downlink, paced per packet.
    ///
    /// Returns the number of bytes echoed.
    pub fn reply(&self) -> usize {
        let (downlink, audio) = match self.state.lock() {
            Ok(mut state) => (state.downlink.clone(), std::mem::take(&mut state.pending)),
            Err(_) => return 0,
        };
        let Some(downlink) = downlink else {
            return 0;
        };

        debug!(bytes = audio.len(), "echo reply");
        downlink.on_event(
            "subtitle",
            &serde_json::json!({ "text": format!("echoing {} bytes", audio.len()) }).to_string(),
        );
        downlink.on_event("speech_started", "");
        for chunk in audio.chunks(self.packet_bytes) {
            self.send_packet(&downlink, chunk);
            if !self.packet_interval.is_zero() {
                thread::sleep(self.packet_interval);
            }
        }
        downlink.on_event("speech_stopped", "");
        audio.len()
    }

    fn send_packet(&self, downlink: &DownlinkHandle, chunk: &[u8]) {
        let Some(encoder) = &self.encoder else {
            // Drops are the downlink's policy; keep pacing regardless
            downlink.on_audio(chunk).ok();
            return;
        };
        let Ok(mut encoder) = encoder.lock() else {
            return;
        };
        let mut frame = chunk.to_vec();
        frame.resize(encoder.frame_bytes(), 0);
        match encoder.encode(&frame) {
            Ok(packet) => {
                downlink.on_audio(&packet).ok();
            }
            Err(e) => warn!(encoder = encoder.name(), error = %e, "dropping echo packet"),
        }
    }
}

impl ChatChannel for EchoChannel {
    fn send_audio(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChannelError::Rejected("echo state poisoned".to_string()))?;
        if !state.connected || state.downlink.is_none() {
            return Err(ChannelError::NotConnected);
        }
        if state.pending.len() + frame.len() > self.max_pending {
            return Err(ChannelError::Rejected("utterance buffer full".to_string()));
        }
        state.pending.extend_from_slice(frame);
        Ok(())
    }

    fn attach(&self, downlink: DownlinkHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.downlink = Some(downlink);
        }
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
