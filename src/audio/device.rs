//! Microphone and speaker contracts consumed by the pipeline.
//!
//! The real drivers (I2S, codec chips) live outside this crate; these traits
//! let tests and the host simulation swap in mock or file-backed devices.

use crate::error::{Result, VoxlinkError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Audio input device.
pub trait Microphone: Send {
    /// Start capturing.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop capturing.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes of interleaved PCM.
    ///
    /// May block on hardware, but never longer than `timeout`.
    /// Returns the number of bytes written into `buf`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Whether a zero-length read means the source is exhausted (files, pipes).
    fn is_finite(&self) -> bool {
        false
    }
}

/// Audio output device.
pub trait Speaker: Send {
    /// Write PCM bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mock microphone for testing.
#[derive(Debug, Clone)]
pub struct MockMicrophone {
    frame: Vec<u8>,
    max_reads: Option<u32>,
    reads: u32,
    is_started: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockMicrophone {
    /// Create a mock that returns `frame` on every read.
    pub fn new(frame: Vec<u8>) -> Self {
        Self {
            frame,
            max_reads: None,
            reads: 0,
            is_started: false,
            should_fail_read: false,
            error_message: "mock microphone error".to_string(),
        }
    }

    /// Stop producing data (and become finite) after `reads` reads.
    pub fn with_max_reads(mut self, reads: u32) -> Self {
        self.max_reads = Some(reads);
        self
    }

    /// Configure the mock to fail on read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }
}

impl Microphone for MockMicrophone {
    fn start(&mut self) -> Result<()> {
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if self.should_fail_read {
            return Err(VoxlinkError::AudioDevice {
                message: self.error_message.clone(),
            });
        }
        if let Some(max) = self.max_reads
            && self.reads >= max
        {
            return Ok(0);
        }
        self.reads += 1;
        let n = buf.len().min(self.frame.len());
        buf[..n].copy_from_slice(&self.frame[..n]);
        Ok(n)
    }

    fn is_finite(&self) -> bool {
        self.max_reads.is_some()
    }
}

/// Speaker that records every write, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MockSpeaker {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    should_fail_write: bool,
}

impl MockSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on write.
    pub fn with_write_failure(mut self) -> Self {
        self.should_fail_write = true;
        self
    }

    /// Snapshot of all writes so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of writes consisting only of zero bytes.
    pub fn zero_writes(&self) -> usize {
        self.writes()
            .iter()
            .filter(|w| !w.is_empty() && w.iter().all(|&b| b == 0))
            .count()
    }

    /// Concatenation of all non-silent writes.
    pub fn audible_bytes(&self) -> Vec<u8> {
        self.writes()
            .into_iter()
            .filter(|w| w.iter().any(|&b| b != 0))
            .flatten()
            .collect()
    }
}

impl Speaker for MockSpeaker {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.should_fail_write {
            return Err(VoxlinkError::AudioDevice {
                message: "mock speaker error".to_string(),
            });
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(buf.to_vec());
        }
        Ok(buf.len())
    }
}

/// Speaker that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSpeaker;

impl Speaker for NullSpeaker {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}
