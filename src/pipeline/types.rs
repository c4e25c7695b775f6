//! Data types shared by the pipeline tasks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A published audio buffer with an explicit valid length.
///
/// The backing buffer is a pooled slot; only `data[..len]` is meaningful.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    len: usize,
}

impl Frame {
    /// Wraps a slot buffer; `len` is clamped to the buffer size.
    pub fn new(data: Vec<u8>, len: usize) -> Self {
        let len = len.min(data.len());
        Self { data, len }
    }

    /// The valid bytes of this frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the backing buffer for reuse.
    pub fn into_buffer(self) -> Vec<u8> {
        self.data
    }
}

/// Live counters updated by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub capture_errors: AtomicU64,
    pub frames_gated: AtomicU64,
    pub frames_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub downlink_accepted: AtomicU64,
    pub downlink_dropped: AtomicU64,
    pub downlink_oversized: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub frames_played: AtomicU64,
    pub frames_muted: AtomicU64,
    pub watchdog_flushes: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub frames_gated: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub downlink_accepted: u64,
    pub downlink_dropped: u64,
    pub downlink_oversized: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub frames_played: u64,
    pub frames_muted: u64,
    pub watchdog_flushes: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_captured: get(&self.frames_captured),
            capture_errors: get(&self.capture_errors),
            frames_gated: get(&self.frames_gated),
            frames_sent: get(&self.frames_sent),
            send_errors: get(&self.send_errors),
            downlink_accepted: get(&self.downlink_accepted),
            downlink_dropped: get(&self.downlink_dropped),
            downlink_oversized: get(&self.downlink_oversized),
            frames_decoded: get(&self.frames_decoded),
            decode_errors: get(&self.decode_errors),
            frames_played: get(&self.frames_played),
            frames_muted: get(&self.frames_muted),
            watchdog_flushes: get(&self.watchdog_flushes),
        }
    }
}
