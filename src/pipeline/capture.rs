//! Capture task: microphone to front-end handoff queue.

use crate::audio::device::Microphone;
use crate::error::{Result, VoxlinkError};
use crate::pipeline::queue::{FrameQueue, QueueError};
use crate::pipeline::types::PipelineStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Consecutive read failures after which capture gives up.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub frame_bytes: usize,
    pub write_timeout: Duration,
    pub yield_interval: Duration,
    pub read_timeout: Duration,
}

/// Reads one fixed-size frame per iteration into the handoff queue.
pub struct CaptureTask {
    handle: Option<JoinHandle<()>>,
    finished: Arc<AtomicBool>,
}

impl CaptureTask {
    pub fn spawn(
        microphone: Box<dyn Microphone>,
        queue: Arc<FrameQueue>,
        settings: CaptureSettings,
        running: Arc<AtomicBool>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();

        let handle = thread::Builder::new()
            .name("voxlink-capture".to_string())
            .spawn(move || {
                run_capture(microphone, &queue, settings, &running, &stats);
                done.store(true, Ordering::SeqCst);
            })
            .map_err(|e| VoxlinkError::Other(format!("failed to spawn capture: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            finished,
        })
    }

    /// True once the loop has exited (source exhausted, device failure or stop).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    pub fn join(mut self) -> std::result::Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "capture thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

fn run_capture(
    mut microphone: Box<dyn Microphone>,
    queue: &FrameQueue,
    settings: CaptureSettings,
    running: &AtomicBool,
    stats: &PipelineStats,
) {
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::SeqCst) {
        let mut slot = match queue.acquire_write(settings.frame_bytes, Some(settings.write_timeout)) {
            Ok(slot) => slot,
            Err(QueueError::Timeout) => {
                debug!("capture queue full, retrying");
                continue;
            }
            Err(QueueError::Closed) => break,
            Err(e) => {
                error!(error = %e, "capture queue unusable");
                break;
            }
        };

        let read = microphone.read(
            &mut slot.buffer_mut()[..settings.frame_bytes],
            settings.read_timeout,
        );
        match read {
            Ok(0) if microphone.is_finite() => {
                info!("microphone source exhausted");
                break;
            }
            Ok(0) => drop(slot),
            Ok(n) => {
                consecutive_errors = 0;
                match queue.release_write(slot, n) {
                    Ok(()) => PipelineStats::bump(&stats.frames_captured),
                    Err(e) => warn!(error = %e, "failed to publish capture frame"),
                }
            }
            Err(e) => {
                drop(slot);
                PipelineStats::bump(&stats.capture_errors);
                consecutive_errors += 1;
                warn!(error = %e, consecutive_errors, "microphone read failed");
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    error!("microphone keeps failing, stopping capture");
                    break;
                }
            }
        }

        thread::sleep(settings.yield_interval);
    }

    if let Err(e) = microphone.stop() {
        warn!(error = %e, "failed to stop microphone");
    }
    debug!("capture loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::MockMicrophone;
    use crate::pipeline::queue::QueueMode;
    use std::time::Instant;

    const WAIT: Option<Duration> = Some(Duration::from_millis(500));

    fn settings(frame_bytes: usize) -> CaptureSettings {
        CaptureSettings {
            frame_bytes,
            write_timeout: Duration::from_millis(20),
            yield_interval: Duration::from_millis(1),
            read_timeout: Duration::from_millis(20),
        }
    }

    fn wait_finished(task: &CaptureTask) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !task.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_capture_publishes_fixed_size_frames() {
        let queue = Arc::new(FrameQueue::create("capture", QueueMode::BlockingHandoff, 4, 8).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let mic = MockMicrophone::new(vec![5; 8]).with_max_reads(3);

        let task = CaptureTask::spawn(
            Box::new(mic),
            queue.clone(),
            settings(8),
            Arc::new(AtomicBool::new(true)),
            stats.clone(),
        )
        .unwrap();

        for _ in 0..3 {
            let frame = queue.acquire_read(WAIT).unwrap();
            assert_eq!(frame.as_bytes(), &[5; 8]);
        }
        wait_finished(&task);
        assert!(task.is_finished());
        assert_eq!(stats.snapshot().frames_captured, 3);
        task.join().unwrap();
    }

    #[test]
    fn test_capture_stops_after_repeated_read_errors() {
        let queue = Arc::new(FrameQueue::create("capture", QueueMode::BlockingHandoff, 2, 8).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let mic = MockMicrophone::new(vec![0; 8]).with_read_failure();

        let task = CaptureTask::spawn(
            Box::new(mic),
            queue.clone(),
            settings(8),
            Arc::new(AtomicBool::new(true)),
            stats.clone(),
        )
        .unwrap();

        wait_finished(&task);
        assert!(task.is_finished());
        assert_eq!(
            stats.snapshot().capture_errors,
            u64::from(MAX_CONSECUTIVE_READ_ERRORS)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capture_waits_on_full_queue_until_stopped() {
        let queue = Arc::new(FrameQueue::create("capture", QueueMode::BlockingHandoff, 1, 8).unwrap());
        let running = Arc::new(AtomicBool::new(true));
        let task = CaptureTask::spawn(
            Box::new(MockMicrophone::new(vec![1; 8])),
            queue.clone(),
            settings(8),
            running.clone(),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(queue.len(), 1);
        assert!(!task.is_finished());

        running.store(false, Ordering::SeqCst);
        wait_finished(&task);
        assert!(task.is_finished());
    }
}
