//! Uplink sender: forwards gated frames to the chat channel.

use crate::chat::{ChannelError, ChatChannel};
use crate::pipeline::types::PipelineStats;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{debug, warn};

/// Health transitions of the uplink, observed by the supervisor.
///
/// Notices may be dropped when the listener lags, so every failure carries
/// the sender's own run length instead of relying on the listener to count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkHealth {
    /// A send failed; the frame was dropped.
    Failed {
        error: ChannelError,
        /// Failures in a row, this one included.
        consecutive: u32,
        /// Identifies the failure run; a new run starts after any success.
        run: u64,
    },
    /// The first send succeeded after one or more failures.
    Recovered,
}

/// Sends frames to the chat channel, logging and dropping on failure.
pub struct UplinkSender {
    channel: Arc<dyn ChatChannel>,
    stats: Arc<PipelineStats>,
    health_tx: Option<Sender<UplinkHealth>>,
    consecutive: u32,
    run: u64,
}

impl UplinkSender {
    pub fn new(channel: Arc<dyn ChatChannel>, stats: Arc<PipelineStats>) -> Self {
        Self {
            channel,
            stats,
            health_tx: None,
            consecutive: 0,
            run: 0,
        }
    }

    pub fn with_health_sender(mut self, tx: Sender<UplinkHealth>) -> Self {
        self.health_tx = Some(tx);
        self
    }

    /// Sends one frame. Returns whether the channel accepted it.
    ///
    /// A `ChannelError` never propagates: the frame is dropped.
    pub fn send(&mut self, frame: &[u8]) -> bool {
        match self.channel.send_audio(frame) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.frames_sent);
                if self.consecutive > 0 {
                    debug!(
                        channel = self.channel.name(),
                        failures = self.consecutive,
                        "uplink recovered"
                    );
                    self.consecutive = 0;
                    self.notify(UplinkHealth::Recovered);
                }
                true
            }
            Err(e) => {
                PipelineStats::bump(&self.stats.send_errors);
                warn!(channel = self.channel.name(), len = frame.len(), error = %e, "dropping uplink frame");
                if self.consecutive == 0 {
                    self.run += 1;
                }
                self.consecutive = self.consecutive.saturating_add(1);
                self.notify(UplinkHealth::Failed {
                    error: e,
                    consecutive: self.consecutive,
                    run: self.run,
                });
                false
            }
        }
    }

    /// Failures in a row since the last successful send.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    fn notify(&self, health: UplinkHealth) {
        if let Some(tx) = &self.health_tx
            && tx.try_send(health).is_err()
        {
            debug!("uplink health listener not keeping up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct ToggleChannel {
        down: AtomicBool,
        sent: Mutex<Vec<usize>>,
    }

    impl ChatChannel for ToggleChannel {
        fn send_audio(&self, frame: &[u8]) -> Result<(), ChannelError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ChannelError::NotConnected);
            }
            self.sent.lock().unwrap().push(frame.len());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "toggle"
        }
    }

    #[test]
    fn test_send_counts_frames() {
        let channel = Arc::new(ToggleChannel::default());
        let stats = Arc::new(PipelineStats::new());
        let mut sender = UplinkSender::new(channel.clone(), stats.clone());

        assert!(sender.send(&[0; 12]));
        assert_eq!(*channel.sent.lock().unwrap(), vec![12]);
        assert_eq!(stats.snapshot().frames_sent, 1);
    }

    #[test]
    fn test_channel_error_drops_frame() {
        let channel = Arc::new(ToggleChannel::default());
        channel.down.store(true, Ordering::SeqCst);
        let stats = Arc::new(PipelineStats::new());
        let mut sender = UplinkSender::new(channel.clone(), stats.clone());

        assert!(!sender.send(&[0; 12]));
        assert!(channel.sent.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().send_errors, 1);
    }

    #[test]
    fn test_health_reports_failure_then_single_recovery() {
        let channel = Arc::new(ToggleChannel::default());
        let (tx, rx) = unbounded();
        let mut sender =
            UplinkSender::new(channel.clone(), Arc::new(PipelineStats::new())).with_health_sender(tx);

        sender.send(&[1]);
        channel.down.store(true, Ordering::SeqCst);
        sender.send(&[1]);
        sender.send(&[1]);
        channel.down.store(false, Ordering::SeqCst);
        sender.send(&[1]);
        sender.send(&[1]);

        let health: Vec<UplinkHealth> = rx.try_iter().collect();
        assert_eq!(
            health,
            vec![
                UplinkHealth::Failed {
                    error: ChannelError::NotConnected,
                    consecutive: 1,
                    run: 1,
                },
                UplinkHealth::Failed {
                    error: ChannelError::NotConnected,
                    consecutive: 2,
                    run: 1,
                },
                UplinkHealth::Recovered,
            ]
        );
    }

    #[test]
    fn test_failure_count_survives_full_listener() {
        let channel = Arc::new(ToggleChannel::default());
        let (tx, rx) = bounded(1);
        let mut sender =
            UplinkSender::new(channel.clone(), Arc::new(PipelineStats::new())).with_health_sender(tx);

        channel.down.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            sender.send(&[1]);
        }
        assert_eq!(sender.consecutive_failures(), 3);

        // Recovery notice and the first failure of the next run are lost
        channel.down.store(false, Ordering::SeqCst);
        sender.send(&[1]);
        assert_eq!(sender.consecutive_failures(), 0);
        channel.down.store(true, Ordering::SeqCst);
        sender.send(&[1]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            UplinkHealth::Failed { consecutive: 1, run: 1, .. }
        ));
        sender.send(&[1]);

        match rx.try_recv().unwrap() {
            UplinkHealth::Failed {
                consecutive, run, ..
            } => {
                assert_eq!(consecutive, 2);
                assert_eq!(run, 2);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }
}
