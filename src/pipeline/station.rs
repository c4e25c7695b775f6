//! Station abstraction and runner for queue-fed pipeline tasks.

use crate::error::{Result, VoxlinkError};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::queue::{FrameQueue, QueueError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A processing station fed from a [`FrameQueue`].
///
/// Each station runs in its own thread. The runner hands it one published
/// frame at a time and returns the slot to the pool after `process` returns.
pub trait Station: Send + 'static {
    /// Processes the valid bytes of one frame.
    fn process(&mut self, frame: &[u8]) -> std::result::Result<(), StationError>;

    /// Called when a poll interval passes without a frame.
    fn idle(&mut self) -> std::result::Result<(), StationError> {
        Ok(())
    }

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once when the station is shutting down.
    fn shutdown(&mut self) {}
}

/// Runs a station in a dedicated thread.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns `station` reading from `queue`.
    ///
    /// With `poll = Some(d)`, `idle()` runs whenever `d` passes without data;
    /// with `None` the station waits indefinitely. The loop exits when
    /// `running` is cleared (checked every iteration), the queue closes, or
    /// the station reports a fatal error.
    pub fn spawn<S: Station>(
        mut station: S,
        queue: Arc<FrameQueue>,
        poll: Option<Duration>,
        running: Arc<AtomicBool>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("voxlink-{}", station_name))
            .spawn(move || {
                Self::run_station(&mut station, &queue, poll, &running, error_reporter.as_ref());
            })
            .map_err(|e| VoxlinkError::Other(format!("failed to spawn {}: {}", station_name, e)))?;

        Ok(Self {
            handle: Some(handle),
            station_name,
        })
    }

    fn run_station<S: Station>(
        station: &mut S,
        queue: &FrameQueue,
        poll: Option<Duration>,
        running: &AtomicBool,
        error_reporter: &dyn ErrorReporter,
    ) {
        let station_name = station.name();

        while running.load(Ordering::SeqCst) {
            let outcome = match queue.acquire_read(poll) {
                Ok(slot) => station.process(slot.as_bytes()),
                Err(QueueError::Timeout) => station.idle(),
                Err(QueueError::Closed) => break,
                Err(e) => Err(StationError::Fatal(e.to_string())),
            };

            match outcome {
                Ok(()) => {}
                Err(err @ StationError::Recoverable(_)) => {
                    error_reporter.report(station_name, &err);
                }
                Err(err @ StationError::Fatal(_)) => {
                    error_reporter.report(station_name, &err);
                    break;
                }
            }
        }

        station.shutdown();
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> std::result::Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    /// True once the station thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }
}
