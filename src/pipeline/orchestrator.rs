//! Wires capture, front-end, uplink, decode and playback into one pipeline.
//!
//! ```text
//! Microphone → [capture queue] → FrontEndStation → UplinkSender → ChatChannel
//! ChatChannel → DownlinkHandle → [decode queue] → DecodeStation
//!             → PlaybackFeed → [playback queue] → PlaybackStation → Speaker
//! ```

use crate::audio::device::{Microphone, Speaker};
use crate::audio::format::{AudioFormat, ChannelRoles};
use crate::chat::{ChatChannel, ChatEvent};
use crate::clock::{Clock, SystemClock};
use crate::codec::FrameDecoder;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::gate::detector::FrontEndDetector;
use crate::gate::event::FrontEndEvent;
use crate::gate::frontend::FrontEndStation;
use crate::gate::strategy::{GateMode, PushToTalk, build_gate};
use crate::pipeline::capture::{CaptureSettings, CaptureTask};
use crate::pipeline::downlink::{DecodeStation, DownlinkHandle};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::playback::{
    PlaybackControl, PlaybackFeed, PlaybackSettings, PlaybackStation, shared_speaker,
};
use crate::pipeline::prompt::PromptPlayer;
use crate::pipeline::queue::{FrameQueue, QueueError, QueueMode};
use crate::pipeline::station::StationRunner;
use crate::pipeline::types::{PipelineStats, StatsSnapshot};
use crate::pipeline::uplink::{UplinkHealth, UplinkSender};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long `close` waits for tasks before detaching them.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(2);

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Negotiated session format
    pub format: AudioFormat,
    /// Input channel roles, one letter per channel
    pub channel_roles: String,
    pub mode: GateMode,
    /// End-of-utterance hold in wake-word mode
    pub wake_hold: Duration,
    pub capture: CaptureSettings,
    pub capture_slots: usize,
    pub frontend_poll: Duration,
    pub max_packet_size: usize,
    pub decode_slots: usize,
    /// Longest decoded frame; sizes the decode and playback buffers
    pub max_frame: Duration,
    pub playback_slots: usize,
    pub feed_timeout: Duration,
    pub playback_timeout: Duration,
    pub watchdog_poll: Duration,
    pub flush_bytes: usize,
    pub volume: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            channel_roles: defaults::CHANNEL_ROLES.to_string(),
            mode: GateMode::WakeWord,
            wake_hold: Duration::from_millis(defaults::WAKE_HOLD_MS),
            capture: CaptureSettings {
                frame_bytes: defaults::CAPTURE_FRAME_BYTES,
                write_timeout: Duration::from_millis(defaults::CAPTURE_WRITE_TIMEOUT_MS),
                yield_interval: Duration::from_millis(defaults::CAPTURE_YIELD_MS),
                read_timeout: Duration::from_millis(defaults::MIC_READ_TIMEOUT_MS),
            },
            capture_slots: defaults::CAPTURE_QUEUE_SLOTS,
            frontend_poll: Duration::from_millis(defaults::FRONTEND_POLL_MS),
            max_packet_size: defaults::MAX_PACKET_SIZE,
            decode_slots: defaults::DECODE_QUEUE_SLOTS,
            max_frame: Duration::from_millis(u64::from(defaults::MAX_FRAME_MS)),
            playback_slots: defaults::PLAYBACK_QUEUE_SLOTS,
            feed_timeout: Duration::from_millis(defaults::PLAYBACK_FEED_TIMEOUT_MS),
            playback_timeout: Duration::from_millis(defaults::PLAYBACK_TIMEOUT_MS),
            watchdog_poll: Duration::from_millis(defaults::WATCHDOG_POLL_MS),
            flush_bytes: defaults::FLUSH_BYTES,
            volume: defaults::PLAYBACK_VOLUME,
        }
    }
}

/// Devices and collaborators the pipeline takes ownership of.
pub struct PipelineParts {
    pub microphone: Box<dyn Microphone>,
    pub speaker: Box<dyn Speaker>,
    /// Required unless the gate mode is key-press
    pub detector: Option<Box<dyn FrontEndDetector>>,
    pub decoder: Box<dyn FrameDecoder>,
    pub channel: Arc<dyn ChatChannel>,
}

enum Task {
    Station(StationRunner),
    Capture(CaptureTask),
}

impl Task {
    fn is_finished(&self) -> bool {
        match self {
            Task::Station(runner) => runner.is_finished(),
            Task::Capture(capture) => capture.is_finished(),
        }
    }

    fn join(self) -> std::result::Result<(), String> {
        match self {
            Task::Station(runner) => runner.join(),
            Task::Capture(capture) => capture.join(),
        }
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    queues: Vec<Arc<FrameQueue>>,
    tasks: Vec<Task>,
    capture_done: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    feed: PlaybackFeed,
    downlink: DownlinkHandle,
    control: PlaybackControl,
    prompt: PromptPlayer,
    push_to_talk: PushToTalk,
}

impl PipelineHandle {
    /// Stops every task and waits for them to exit.
    ///
    /// Queues are closed only to wake blocked tasks; they are freed once the
    /// last task holding them has exited. Tasks still running after the
    /// deadline are detached and reported in the error.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }
        info!("closing pipeline");
        self.running.store(false, Ordering::SeqCst);
        self.prompt.stop();
        for queue in &self.queues {
            queue.close();
        }

        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        let poll_interval = Duration::from_millis(50);
        let mut problems = Vec::new();

        loop {
            let mut remaining = Vec::new();
            for task in self.tasks.drain(..) {
                if task.is_finished() {
                    if let Err(msg) = task.join() {
                        error!("{}", msg);
                        problems.push(msg);
                    }
                } else {
                    remaining.push(task);
                }
            }
            self.tasks = remaining;

            if self.tasks.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    remaining = self.tasks.len(),
                    "shutdown deadline passed, detaching tasks"
                );
                problems.push(format!("{} task(s) did not stop in time", self.tasks.len()));
                // Dropping the handles detaches the threads
                self.tasks.clear();
                break;
            }
            thread::sleep(poll_interval);
        }

        debug!(stats = ?self.stats.snapshot(), "pipeline closed");
        if problems.is_empty() {
            Ok(())
        } else {
            Err(VoxlinkError::Other(problems.join("; ")))
        }
    }

    /// Queues PCM for playback, as the decode task does.
    pub fn feed_playback(&self, pcm: &[u8]) -> std::result::Result<(), QueueError> {
        self.feed.feed(pcm)
    }

    /// Receive callbacks for the chat channel.
    pub fn downlink(&self) -> DownlinkHandle {
        self.downlink.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn push_to_talk(&self) -> &PushToTalk {
        &self.push_to_talk
    }

    pub fn prompt(&self) -> &PromptPlayer {
        &self.prompt
    }

    pub fn playback_control(&self) -> &PlaybackControl {
        &self.control
    }

    /// True once the capture loop has exited (e.g. a file source ran out).
    pub fn capture_finished(&self) -> bool {
        self.capture_done.load(Ordering::SeqCst)
    }

    /// True when no frame is waiting in any queue.
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "pipeline shutdown on drop was not clean");
        }
    }
}

/// Pipeline builder.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    event_txs: Vec<Sender<FrontEndEvent>>,
    chat_tx: Option<Sender<ChatEvent>>,
    health_tx: Option<Sender<UplinkHealth>>,
    push_to_talk: PushToTalk,
}

impl Pipeline {
    /// Creates a new pipeline with default error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            clock: Arc::new(SystemClock),
            event_txs: Vec::new(),
            chat_tx: None,
            health_tx: None,
            push_to_talk: PushToTalk::new(),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribes to front-end events.
    pub fn with_event_sender(mut self, tx: Sender<FrontEndEvent>) -> Self {
        self.event_txs.push(tx);
        self
    }

    /// Subscribes to chat session events.
    pub fn with_chat_event_sender(mut self, tx: Sender<ChatEvent>) -> Self {
        self.chat_tx = Some(tx);
        self
    }

    /// Subscribes to uplink failures and recoveries.
    pub fn with_uplink_health_sender(mut self, tx: Sender<UplinkHealth>) -> Self {
        self.health_tx = Some(tx);
        self
    }

    /// Uses an existing push-to-talk switch.
    pub fn with_push_to_talk(mut self, key: PushToTalk) -> Self {
        self.push_to_talk = key;
        self
    }

    /// Validates the session, initializes the front-end and starts every task.
    ///
    /// Initialization failures (format, channel roles, detector, decoder,
    /// queue allocation, microphone start) are returned and nothing is left
    /// running.
    pub fn open(self, parts: PipelineParts) -> Result<PipelineHandle> {
        let config = &self.config;
        let format = config.format;
        format.validate()?;
        let roles = ChannelRoles::parse(&config.channel_roles)?;
        roles.check_against(&format)?;

        let detector = if config.mode.uses_detector() {
            let Some(mut detector) = parts.detector else {
                return Err(VoxlinkError::FrontEndInit {
                    message: format!("{} mode requires a front-end detector", config.mode),
                });
            };
            detector.init(&format, &roles)?;
            info!(detector = detector.name(), %format, roles = %config.channel_roles, "front-end ready");
            Some(detector)
        } else {
            if parts.detector.is_some() {
                debug!("key-press mode, front-end detector unused");
            }
            None
        };

        let decoded = parts.decoder.output_format();
        if decoded != format {
            return Err(VoxlinkError::AudioFormatMismatch {
                expected: format.to_string(),
                actual: decoded.to_string(),
            });
        }

        let capture_queue = Arc::new(FrameQueue::create(
            "capture",
            QueueMode::BlockingHandoff,
            config.capture_slots,
            config.capture.frame_bytes,
        )?);
        let decode_queue = Arc::new(FrameQueue::create(
            "decode",
            QueueMode::DropNewest,
            config.decode_slots,
            config.max_packet_size,
        )?);
        let playback_queue = Arc::new(FrameQueue::create(
            "playback",
            QueueMode::BlockingHandoff,
            config.playback_slots,
            format.bytes_for(config.max_frame),
        )?);

        let mut microphone = parts.microphone;
        microphone.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::new());
        let control = PlaybackControl::new(config.volume);
        let speaker = shared_speaker(parts.speaker);
        let feed = PlaybackFeed::new(
            playback_queue.clone(),
            control.clone(),
            stats.clone(),
            config.feed_timeout,
        );
        let mut downlink =
            DownlinkHandle::new(decode_queue.clone(), config.max_packet_size, stats.clone());
        if let Some(tx) = &self.chat_tx {
            downlink = downlink.with_chat_events(tx.clone());
        }

        let mut handle = PipelineHandle {
            running: running.clone(),
            queues: vec![capture_queue.clone(), decode_queue.clone(), playback_queue.clone()],
            tasks: Vec::new(),
            capture_done: Arc::new(AtomicBool::new(false)),
            stats: stats.clone(),
            feed: feed.clone(),
            downlink: downlink.clone(),
            control: control.clone(),
            prompt: PromptPlayer::new(speaker.clone(), control.clone(), format),
            push_to_talk: self.push_to_talk.clone(),
        };

        let playback = PlaybackStation::new(
            speaker,
            control,
            PlaybackSettings {
                bits_per_sample: format.bits_per_sample,
                timeout: config.playback_timeout,
                flush_bytes: config.flush_bytes,
            },
            self.clock.clone(),
            stats.clone(),
        );
        handle.tasks.push(Task::Station(StationRunner::spawn(
            playback,
            playback_queue,
            Some(config.watchdog_poll),
            running.clone(),
            self.error_reporter.clone(),
        )?));

        let decode = DecodeStation::new(parts.decoder, config.max_frame, feed, stats.clone());
        handle.tasks.push(Task::Station(StationRunner::spawn(
            decode,
            decode_queue,
            None,
            running.clone(),
            self.error_reporter.clone(),
        )?));

        let mut uplink = UplinkSender::new(parts.channel.clone(), stats.clone());
        if let Some(tx) = &self.health_tx {
            uplink = uplink.with_health_sender(tx.clone());
        }
        let gate = build_gate(config.mode, config.wake_hold, self.push_to_talk.clone());
        let mut frontend =
            FrontEndStation::new(gate, detector, uplink, self.clock.clone(), stats.clone());
        for tx in &self.event_txs {
            frontend = frontend.with_listener(tx.clone());
        }
        handle.tasks.push(Task::Station(StationRunner::spawn(
            frontend,
            capture_queue.clone(),
            Some(config.frontend_poll),
            running.clone(),
            self.error_reporter.clone(),
        )?));

        parts.channel.attach(downlink);

        let capture = CaptureTask::spawn(
            microphone,
            capture_queue,
            config.capture,
            running,
            stats,
        )?;
        handle.capture_done = capture.finished_flag();
        handle.tasks.push(Task::Capture(capture));

        info!(
            mode = %config.mode,
            %format,
            channel = parts.channel.name(),
            "pipeline open"
        );
        Ok(handle)
    }
}
