//! Downlink: the chat channel's receive callbacks and the decode task.

use crate::chat::ChatEvent;
use crate::codec::FrameDecoder;
use crate::pipeline::error::StationError;
use crate::pipeline::playback::PlaybackFeed;
use crate::pipeline::queue::{FrameQueue, QueueError};
use crate::pipeline::station::Station;
use crate::pipeline::types::PipelineStats;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Receive-side entry points handed to the chat channel.
///
/// Both callbacks return without blocking: audio goes through the
/// drop-newest decode queue and events through `try_send`.
#[derive(Clone)]
pub struct DownlinkHandle {
    queue: Arc<FrameQueue>,
    max_packet: usize,
    stats: Arc<PipelineStats>,
    chat_tx: Option<Sender<ChatEvent>>,
}

impl DownlinkHandle {
    pub fn new(queue: Arc<FrameQueue>, max_packet: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            queue,
            max_packet,
            stats,
            chat_tx: None,
        }
    }

    pub fn with_chat_events(mut self, tx: Sender<ChatEvent>) -> Self {
        self.chat_tx = Some(tx);
        self
    }

    /// Accepts one compressed packet from the network.
    pub fn on_audio(&self, packet: &[u8]) -> Result<(), QueueError> {
        if packet.len() > self.max_packet {
            PipelineStats::bump(&self.stats.downlink_oversized);
            error!(
                len = packet.len(),
                max = self.max_packet,
                "rejecting oversized downlink packet"
            );
            return Err(QueueError::Oversized {
                wanted: packet.len(),
                slot_size: self.max_packet,
            });
        }

        match self.queue.try_send(packet) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.downlink_accepted);
                Ok(())
            }
            Err(e) => {
                // Full is already logged by the queue
                PipelineStats::bump(&self.stats.downlink_dropped);
                if e != QueueError::Full {
                    debug!(error = %e, "downlink packet not queued");
                }
                Err(e)
            }
        }
    }

    /// Accepts one session event from the network.
    pub fn on_event(&self, kind: &str, payload: &str) {
        let event = match ChatEvent::parse(kind, payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(kind, "ignoring unknown chat event");
                return;
            }
            Err(e) => {
                warn!(kind, error = %e, "malformed chat event payload");
                return;
            }
        };
        if let Some(tx) = &self.chat_tx
            && tx.try_send(event).is_err()
        {
            warn!(kind, "chat event listener not keeping up, dropping event");
        }
    }
}

/// Decodes one compressed frame per iteration and feeds the playback path.
pub struct DecodeStation {
    decoder: Box<dyn FrameDecoder>,
    pcm: Vec<u8>,
    playback: PlaybackFeed,
    stats: Arc<PipelineStats>,
}

impl DecodeStation {
    /// The PCM buffer holds `max_frame` of decoder output and is reused.
    pub fn new(
        decoder: Box<dyn FrameDecoder>,
        max_frame: Duration,
        playback: PlaybackFeed,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let pcm = vec![0; decoder.output_format().bytes_for(max_frame)];
        Self {
            decoder,
            pcm,
            playback,
            stats,
        }
    }
}

impl Station for DecodeStation {
    fn process(&mut self, frame: &[u8]) -> Result<(), StationError> {
        let len = match self.decoder.decode(frame, &mut self.pcm) {
            Ok(len) => len,
            Err(e) => {
                PipelineStats::bump(&self.stats.decode_errors);
                return Err(StationError::Recoverable(format!(
                    "{} decode of {} bytes failed: {}",
                    self.decoder.name(),
                    frame.len(),
                    e
                )));
            }
        };
        PipelineStats::bump(&self.stats.frames_decoded);
        if len == 0 {
            return Ok(());
        }

        self.playback
            .feed(&self.pcm[..len])
            .map_err(|e| StationError::Recoverable(format!("playback feed failed: {}", e)))
    }

    fn name(&self) -> &'static str {
        "decode"
    }

    fn shutdown(&mut self) {
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::AudioFormat;
    use crate::codec::PcmDecoder;
    use crate::pipeline::playback::PlaybackControl;
    use crate::pipeline::queue::QueueMode;
    use crossbeam_channel::unbounded;

    const WAIT: Option<Duration> = Some(Duration::from_millis(50));

    fn handle(capacity: usize) -> (DownlinkHandle, Arc<FrameQueue>, Arc<PipelineStats>) {
        let queue = Arc::new(FrameQueue::create("decode", QueueMode::DropNewest, capacity, 1500).unwrap());
        let stats = Arc::new(PipelineStats::new());
        (DownlinkHandle::new(queue.clone(), 1500, stats.clone()), queue, stats)
    }

    #[test]
    fn test_on_audio_rejects_oversized_packet() {
        let (downlink, queue, stats) = handle(4);
        assert!(matches!(
            downlink.on_audio(&[0; 1501]),
            Err(QueueError::Oversized { wanted: 1501, .. })
        ));
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().downlink_oversized, 1);
    }

    #[test]
    fn test_on_audio_drops_when_full() {
        let (downlink, queue, stats) = handle(2);
        downlink.on_audio(&[1; 10]).unwrap();
        downlink.on_audio(&[2; 10]).unwrap();
        assert_eq!(downlink.on_audio(&[3; 10]), Err(QueueError::Full));

        assert_eq!(queue.len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.downlink_accepted, 2);
        assert_eq!(snapshot.downlink_dropped, 1);
        assert_eq!(queue.acquire_read(WAIT).unwrap().as_bytes(), &[1; 10]);
    }

    #[test]
    fn test_on_event_forwards_known_kinds() {
        let (downlink, _queue, _stats) = handle(1);
        let (tx, rx) = unbounded();
        let downlink = downlink.with_chat_events(tx);

        downlink.on_event("speech_started", "");
        downlink.on_event("bot.join", "");
        downlink.on_event("customer_data", "not json");

        let events: Vec<ChatEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![ChatEvent::SpeechStarted]);
    }

    fn decode_station() -> (DecodeStation, Arc<FrameQueue>, Arc<PipelineStats>) {
        let format = AudioFormat::default();
        let playback_queue =
            Arc::new(FrameQueue::create("playback", QueueMode::BlockingHandoff, 4, 1920).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let feed = PlaybackFeed::new(
            playback_queue.clone(),
            PlaybackControl::new(100),
            stats.clone(),
            Duration::from_millis(50),
        );
        let station = DecodeStation::new(
            Box::new(PcmDecoder::new(format).unwrap()),
            Duration::from_millis(60),
            feed,
            stats.clone(),
        );
        (station, playback_queue, stats)
    }

    #[test]
    fn test_decode_error_is_recoverable_and_next_frame_plays() {
        let (mut station, playback_queue, stats) = decode_station();

        let corrupt = station.process(&[1, 2, 3]);
        assert!(matches!(corrupt, Err(StationError::Recoverable(_))));
        station.process(&[4, 5, 6, 7]).unwrap();

        assert_eq!(playback_queue.len(), 1);
        assert_eq!(playback_queue.acquire_read(WAIT).unwrap().as_bytes(), &[4, 5, 6, 7]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.frames_decoded, 1);
    }

    #[test]
    fn test_decode_buffer_sized_for_max_frame() {
        let (mut station, _playback_queue, _stats) = decode_station();
        // 60ms at 16kHz mono 16-bit
        assert_eq!(station.pcm.len(), 1920);
        assert!(matches!(
            station.process(&[0; 1922]),
            Err(StationError::Recoverable(_))
        ));
    }
}
