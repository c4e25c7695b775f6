//! Front-end gate station: classify, gate and forward capture frames.

use crate::clock::Clock;
use crate::gate::detector::FrontEndDetector;
use crate::gate::event::{EventKind, FrontEndEvent};
use crate::gate::strategy::{AudioGate, CommandWindow};
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::PipelineStats;
use crate::pipeline::uplink::UplinkSender;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Consumes the capture queue.
///
/// Each frame goes through the detector (when the mode uses one), the
/// resulting events update the gate and are published to listeners, and
/// the frame is forwarded to the uplink only while the gate streams.
pub struct FrontEndStation {
    detector: Option<Box<dyn FrontEndDetector>>,
    gate: Box<dyn AudioGate>,
    uplink: UplinkSender,
    listeners: Vec<Sender<FrontEndEvent>>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

impl FrontEndStation {
    pub fn new(
        gate: Box<dyn AudioGate>,
        detector: Option<Box<dyn FrontEndDetector>>,
        uplink: UplinkSender,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            detector,
            gate,
            uplink,
            listeners: Vec::new(),
            clock,
            stats,
        }
    }

    /// Adds an event listener. Delivery never blocks the station.
    pub fn with_listener(mut self, tx: Sender<FrontEndEvent>) -> Self {
        self.listeners.push(tx);
        self
    }

    fn handle(&mut self, kind: EventKind, now: Instant) {
        let event = FrontEndEvent::new(kind, now);
        let state = self.gate.observe(&event);

        if let Some(detector) = self.detector.as_mut() {
            match self.gate.mode().command_window(&event.kind) {
                Some(CommandWindow::Restart) => {
                    detector.cancel_command_detection();
                    detector.begin_command_detection();
                }
                Some(CommandWindow::Cancel) => detector.cancel_command_detection(),
                None => {}
            }
        }

        debug!(event = %event.kind, gate = %state, "front-end event");
        self.publish(&event);
    }

    fn publish(&self, event: &FrontEndEvent) {
        for tx in &self.listeners {
            if tx.try_send(event.clone()).is_err() {
                warn!(event = event.kind.name(), "event listener not keeping up, dropping event");
            }
        }
    }

    fn check_holds(&mut self, now: Instant) {
        if let Some(kind) = self.gate.expire(now) {
            self.handle(kind, now);
        }
    }
}

impl Station for FrontEndStation {
    fn process(&mut self, frame: &[u8]) -> Result<(), StationError> {
        let now = self.clock.now();
        let events = match self.detector.as_mut() {
            Some(detector) => detector.feed(frame),
            None => Vec::new(),
        };
        for kind in events {
            self.handle(kind, now);
        }
        self.check_holds(now);

        if self.gate.should_stream() {
            self.uplink.send(frame);
        } else {
            PipelineStats::bump(&self.stats.frames_gated);
        }
        Ok(())
    }

    fn idle(&mut self) -> Result<(), StationError> {
        let now = self.clock.now();
        self.check_holds(now);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "frontend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChannelError, ChatChannel};
    use crate::clock::MockClock;
    use crate::gate::detector::MockDetector;
    use crate::gate::state::GateState;
    use crate::gate::strategy::{GateMode, PushToTalk, build_gate};
    use crossbeam_channel::unbounded;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingChannel {
        frames: Mutex<Vec<usize>>,
    }

    impl ChatChannel for RecordingChannel {
        fn send_audio(&self, frame: &[u8]) -> Result<(), ChannelError> {
            self.frames.lock().unwrap().push(frame.len());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn wake_start() -> EventKind {
        EventKind::WakeStart {
            word_index: 0,
            model_index: 0,
        }
    }

    struct Fixture {
        station: FrontEndStation,
        channel: Arc<RecordingChannel>,
        stats: Arc<PipelineStats>,
        clock: MockClock,
    }

    fn fixture(mode: GateMode, detector: Option<MockDetector>, key: PushToTalk) -> Fixture {
        let channel = Arc::new(RecordingChannel::default());
        let stats = Arc::new(PipelineStats::new());
        let clock = MockClock::new();
        let detector = detector.map(|d| Box::new(d) as Box<dyn FrontEndDetector>);
        let station = FrontEndStation::new(
            build_gate(mode, Duration::from_millis(500), key),
            detector,
            UplinkSender::new(channel.clone(), stats.clone()),
            Arc::new(clock.clone()),
            stats.clone(),
        );
        Fixture {
            station,
            channel,
            stats,
            clock,
        }
    }

    #[test]
    fn test_closed_gate_sends_nothing() {
        let mut f = fixture(GateMode::WakeWord, Some(MockDetector::new()), PushToTalk::new());
        let frame = vec![0u8; 4096 * 3];
        for _ in 0..3 {
            f.station.process(&frame).unwrap();
        }
        assert!(f.channel.frames.lock().unwrap().is_empty());
        assert_eq!(f.stats.snapshot().frames_gated, 3);
    }

    #[test]
    fn test_wake_start_opens_gate_for_same_frame() {
        let detector = MockDetector::new().with_event_at(1, wake_start());
        let counters = detector.counters();
        let (tx, rx) = unbounded();
        let mut f = fixture(GateMode::WakeWord, Some(detector), PushToTalk::new());
        f.station = f.station.with_listener(tx);

        let frame = vec![0u8; 4096 * 3];
        f.station.process(&frame).unwrap();
        f.station.process(&frame).unwrap();

        assert_eq!(*f.channel.frames.lock().unwrap(), vec![4096 * 3]);
        assert_eq!(counters.begins(), 1);
        assert_eq!(counters.cancels(), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, wake_start());
    }

    #[test]
    fn test_idle_synthesizes_wake_end_after_hold() {
        let detector = MockDetector::new().with_event_at(0, wake_start());
        let (tx, rx) = unbounded();
        let mut f = fixture(GateMode::WakeWord, Some(detector), PushToTalk::new());
        f.station = f.station.with_listener(tx);

        f.station.process(&[0; 4]).unwrap();
        f.clock.advance(Duration::from_millis(499));
        f.station.idle().unwrap();
        f.clock.advance(Duration::from_millis(1));
        f.station.idle().unwrap();

        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![wake_start(), EventKind::WakeEnd]);
        assert_eq!(f.station.gate.state(), GateState::Closed);

        f.station.process(&[0; 4]).unwrap();
        assert_eq!(f.channel.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_voice_mode_streams_between_vad_events() {
        let detector = MockDetector::new()
            .with_event_at(1, EventKind::VadStart)
            .with_event_at(3, EventKind::VadEnd);
        let counters = detector.counters();
        let mut f = fixture(GateMode::VoiceActivity, Some(detector), PushToTalk::new());

        for _ in 0..5 {
            f.station.process(&[1; 8]).unwrap();
        }
        assert_eq!(f.channel.frames.lock().unwrap().len(), 2);
        // VAD_START restarts (cancel + begin); VAD_END cancels
        assert_eq!(counters.begins(), 1);
        assert_eq!(counters.cancels(), 2);
    }

    #[test]
    fn test_key_press_needs_no_detector() {
        let key = PushToTalk::new();
        let (tx, rx) = unbounded();
        let mut f = fixture(GateMode::KeyPress, None, key.clone());
        f.station = f.station.with_listener(tx);

        f.station.process(&[1; 8]).unwrap();
        key.press();
        f.station.process(&[1; 8]).unwrap();
        key.release();
        f.station.idle().unwrap();

        assert_eq!(f.channel.frames.lock().unwrap().len(), 1);
        let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::VadStart, EventKind::VadEnd]);
    }
}
