//! Bounded frame queue with pre-allocated slots.
//!
//! The queue owns a fixed pool of `capacity` buffers of `slot_size` bytes.
//! Producers borrow a free buffer, fill it and publish it; consumers take
//! published buffers in FIFO order and hand them back to the pool when done.
//! Because every published frame occupies one pooled buffer, occupancy can
//! never exceed `capacity`.
//!
//! Two access modes exist:
//! - [`QueueMode::BlockingHandoff`]: `acquire_write` waits for a free slot.
//! - [`QueueMode::DropNewest`]: `try_send` never blocks and rejects the
//!   incoming frame when no slot is free.
//!
//! Timeouts are reported to the caller and never retried here.

use crate::error::{Result, VoxlinkError};
use crate::pipeline::types::Frame;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Access policy of a queue, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Producer and consumer both wait (bounded by timeouts).
    BlockingHandoff,
    /// Producer never waits; a full queue drops the incoming frame.
    DropNewest,
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMode::BlockingHandoff => write!(f, "blocking-handoff"),
            QueueMode::DropNewest => write!(f, "drop-newest"),
        }
    }
}

/// Outcomes of queue operations other than success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("timed out waiting on queue")]
    Timeout,

    #[error("queue is full")]
    Full,

    #[error("queue is closed")]
    Closed,

    #[error("{operation} is not available on a {mode} queue")]
    ModeMismatch {
        operation: &'static str,
        mode: QueueMode,
    },

    #[error("{wanted} bytes exceeds slot size of {slot_size}")]
    Oversized { wanted: usize, slot_size: usize },
}

/// Fixed-capacity queue of pooled frame slots.
pub struct FrameQueue {
    name: &'static str,
    mode: QueueMode,
    capacity: usize,
    slot_size: usize,
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    filled_tx: Sender<Frame>,
    filled_rx: Receiver<Frame>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Pre-allocates `capacity` slots of `slot_size` bytes.
    ///
    /// Fails with `ResourceExhausted` when either dimension is zero or the
    /// memory cannot be reserved.
    pub fn create(
        name: &'static str,
        mode: QueueMode,
        capacity: usize,
        slot_size: usize,
    ) -> Result<Self> {
        if capacity == 0 || slot_size == 0 {
            return Err(VoxlinkError::ResourceExhausted {
                what: name.to_string(),
                message: format!(
                    "capacity ({}) and slot size ({}) must be non-zero",
                    capacity, slot_size
                ),
            });
        }

        let (free_tx, free_rx) = bounded(capacity);
        let (filled_tx, filled_rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(0);

        for _ in 0..capacity {
            let mut slot = Vec::new();
            slot.try_reserve_exact(slot_size)
                .map_err(|e| VoxlinkError::ResourceExhausted {
                    what: name.to_string(),
                    message: e.to_string(),
                })?;
            slot.resize(slot_size, 0);
            free_tx
                .try_send(slot)
                .map_err(|_| VoxlinkError::ResourceExhausted {
                    what: name.to_string(),
                    message: "slot pool overflow".to_string(),
                })?;
        }

        debug!(queue = name, %mode, capacity, slot_size, "queue created");

        Ok(Self {
            name,
            mode,
            capacity,
            slot_size,
            free_tx,
            free_rx,
            filled_tx,
            filled_rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            dropped: AtomicU64::new(0),
        })
    }

    /// Reserves a free slot of at least `wanted` bytes.
    ///
    /// `None` waits until a slot frees up or the queue is closed.
    pub fn acquire_write(
        &self,
        wanted: usize,
        timeout: Option<Duration>,
    ) -> std::result::Result<WritableSlot<'_>, QueueError> {
        if self.mode != QueueMode::BlockingHandoff {
            return Err(QueueError::ModeMismatch {
                operation: "acquire_write",
                mode: self.mode,
            });
        }
        self.check_size(wanted)?;
        let buf = self.wait_on(&self.free_rx, timeout)?;
        Ok(WritableSlot {
            queue: self,
            buf: Some(buf),
        })
    }

    /// Publishes `valid_size` bytes of `slot` to readers.
    pub fn release_write(
        &self,
        mut slot: WritableSlot<'_>,
        valid_size: usize,
    ) -> std::result::Result<(), QueueError> {
        self.check_size(valid_size)?;
        let Some(buf) = slot.buf.take() else {
            return Ok(());
        };
        self.publish(Frame::new(buf, valid_size))
    }

    /// Copies `frame` into a free slot without blocking.
    ///
    /// Returns `Full` (and stores nothing) when every slot is in use.
    pub fn try_send(&self, frame: &[u8]) -> std::result::Result<(), QueueError> {
        if self.mode != QueueMode::DropNewest {
            return Err(QueueError::ModeMismatch {
                operation: "try_send",
                mode: self.mode,
            });
        }
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.check_size(frame.len())?;

        let Ok(mut buf) = self.free_rx.try_recv() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                queue = self.name,
                len = frame.len(),
                dropped,
                "queue full, dropping newest frame"
            );
            return Err(QueueError::Full);
        };

        buf[..frame.len()].copy_from_slice(frame);
        self.publish(Frame::new(buf, frame.len()))
    }

    /// Takes the oldest published frame.
    ///
    /// `None` waits indefinitely (until data arrives or the queue closes).
    pub fn acquire_read(
        &self,
        timeout: Option<Duration>,
    ) -> std::result::Result<ReadableSlot<'_>, QueueError> {
        let frame = self.wait_on(&self.filled_rx, timeout)?;
        Ok(ReadableSlot {
            queue: self,
            frame: Some(frame),
        })
    }

    /// Returns a consumed slot to the free pool.
    pub fn release_read(&self, slot: ReadableSlot<'_>) {
        drop(slot);
    }

    /// Wakes every blocked caller with `Closed`; later calls fail the same way.
    pub fn close(&self) {
        let sender = match self.close_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if sender.is_some() {
            debug!(queue = self.name, "queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.close_tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Number of published frames waiting to be read.
    pub fn len(&self) -> usize {
        self.filled_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled_rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Frames rejected by `try_send` so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn check_size(&self, wanted: usize) -> std::result::Result<(), QueueError> {
        if wanted > self.slot_size {
            return Err(QueueError::Oversized {
                wanted,
                slot_size: self.slot_size,
            });
        }
        Ok(())
    }

    fn publish(&self, frame: Frame) -> std::result::Result<(), QueueError> {
        // Every frame holds a pooled buffer, so the filled channel cannot be full.
        self.filled_tx.try_send(frame).map_err(|e| {
            self.recycle(e.into_inner().into_buffer());
            QueueError::Full
        })
    }

    fn recycle(&self, buf: Vec<u8>) {
        // The pool has room for every buffer it ever handed out.
        if self.free_tx.try_send(buf).is_err() {
            warn!(queue = self.name, "slot pool rejected a returned buffer");
        }
    }

    fn wait_on<T>(
        &self,
        rx: &Receiver<T>,
        timeout: Option<Duration>,
    ) -> std::result::Result<T, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        match timeout {
            Some(timeout) => select! {
                recv(rx) -> msg => msg.map_err(|_| QueueError::Closed),
                recv(self.close_rx) -> _ => Err(QueueError::Closed),
                default(timeout) => Err(QueueError::Timeout),
            },
            None => select! {
                recv(rx) -> msg => msg.map_err(|_| QueueError::Closed),
                recv(self.close_rx) -> _ => Err(QueueError::Closed),
            },
        }
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("len", &self.len())
            .finish()
    }
}

/// Exclusive write access to one free slot.
///
/// Dropping without `release_write` returns the slot unpublished.
pub struct WritableSlot<'q> {
    queue: &'q FrameQueue,
    buf: Option<Vec<u8>>,
}

impl WritableSlot<'_> {
    /// The full slot buffer; write into the front of it.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, Vec::len)
    }
}

impl Drop for WritableSlot<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.queue.recycle(buf);
        }
    }
}

/// Exclusive read access to one published frame.
///
/// Dropping returns the slot to the free pool.
pub struct ReadableSlot<'q> {
    queue: &'q FrameQueue,
    frame: Option<Frame>,
}

impl ReadableSlot<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        self.frame.as_ref().map(Frame::as_bytes).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frame.as_ref().map_or(0, Frame::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ReadableSlot<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.queue.recycle(frame.into_buffer());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Option<Duration> = Some(Duration::from_millis(20));

    fn blocking(capacity: usize) -> FrameQueue {
        FrameQueue::create("test", QueueMode::BlockingHandoff, capacity, 8).unwrap()
    }

    fn lossy(capacity: usize) -> FrameQueue {
        FrameQueue::create("test", QueueMode::DropNewest, capacity, 8).unwrap()
    }

    fn push(queue: &FrameQueue, bytes: &[u8]) {
        let mut slot = queue.acquire_write(bytes.len(), SHORT).unwrap();
        slot.buffer_mut()[..bytes.len()].copy_from_slice(bytes);
        queue.release_write(slot, bytes.len()).unwrap();
    }

    #[test]
    fn test_create_rejects_zero_dimensions() {
        for (capacity, slot) in [(0, 8), (4, 0)] {
            match FrameQueue::create("q", QueueMode::DropNewest, capacity, slot) {
                Err(VoxlinkError::ResourceExhausted { what, .. }) => assert_eq!(what, "q"),
                other => panic!("Expected ResourceExhausted, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_release_write_makes_frame_readable() {
        let queue = blocking(2);
        push(&queue, &[1, 2, 3]);

        assert_eq!(queue.len(), 1);
        let slot = queue.acquire_read(SHORT).unwrap();
        assert_eq!(slot.as_bytes(), &[1, 2, 3]);
        queue.release_read(slot);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unreleased_write_is_not_visible() {
        let queue = blocking(2);
        let slot = queue.acquire_write(4, SHORT).unwrap();
        assert_eq!(queue.acquire_read(SHORT).err(), Some(QueueError::Timeout));
        drop(slot);
        assert_eq!(queue.acquire_read(SHORT).err(), Some(QueueError::Timeout));
        // Abandoned slot went back to the pool
        for _ in 0..2 {
            push(&queue, &[9]);
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order_and_occupancy_bound() {
        let queue = blocking(3);
        for i in 0..3u8 {
            push(&queue, &[i]);
            assert!(queue.len() <= queue.capacity());
        }
        // Every slot is published; a fourth write must wait
        assert_eq!(
            queue.acquire_write(1, SHORT).err(),
            Some(QueueError::Timeout)
        );

        for i in 0..3u8 {
            let slot = queue.acquire_read(SHORT).unwrap();
            assert_eq!(slot.as_bytes(), &[i]);
        }
    }

    #[test]
    fn test_fifo_across_threads_with_blocking_producer() {
        let queue = Arc::new(blocking(2));
        let producer_queue = queue.clone();
        let producer = thread::spawn(move || {
            for i in 0..50u8 {
                let mut slot = producer_queue
                    .acquire_write(1, Some(Duration::from_secs(5)))
                    .unwrap();
                slot.buffer_mut()[0] = i;
                producer_queue.release_write(slot, 1).unwrap();
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 50 {
            assert!(queue.len() <= queue.capacity());
            let slot = queue.acquire_read(Some(Duration::from_secs(5))).unwrap();
            seen.push(slot.as_bytes()[0]);
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..50u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_send_full_leaves_contents_unchanged() {
        let queue = lossy(2);
        queue.try_send(&[1]).unwrap();
        queue.try_send(&[2]).unwrap();

        assert_eq!(queue.try_send(&[3]), Err(QueueError::Full));
        assert_eq!(queue.try_send(&[4]), Err(QueueError::Full));
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.acquire_read(SHORT).unwrap().as_bytes(), &[1]);
        assert_eq!(queue.acquire_read(SHORT).unwrap().as_bytes(), &[2]);
        assert_eq!(queue.acquire_read(SHORT).err(), Some(QueueError::Timeout));
    }

    #[test]
    fn test_try_send_succeeds_after_read_frees_slot() {
        let queue = lossy(1);
        queue.try_send(&[1]).unwrap();
        assert_eq!(queue.try_send(&[2]), Err(QueueError::Full));

        let slot = queue.acquire_read(SHORT).unwrap();
        // Slot is still held by the reader
        assert_eq!(queue.try_send(&[3]), Err(QueueError::Full));
        drop(slot);
        queue.try_send(&[3]).unwrap();
    }

    #[test]
    fn test_mode_mismatch() {
        let lossy = lossy(1);
        assert!(matches!(
            lossy.acquire_write(1, SHORT).err(),
            Some(QueueError::ModeMismatch {
                operation: "acquire_write",
                ..
            })
        ));

        let blocking = blocking(1);
        assert!(matches!(
            blocking.try_send(&[1]),
            Err(QueueError::ModeMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_requests_rejected() {
        let queue = lossy(1);
        assert_eq!(
            queue.try_send(&[0; 9]),
            Err(QueueError::Oversized {
                wanted: 9,
                slot_size: 8
            })
        );
        assert_eq!(queue.dropped(), 0);

        let queue = blocking(1);
        assert!(matches!(
            queue.acquire_write(9, SHORT).err(),
            Some(QueueError::Oversized { .. })
        ));
        let slot = queue.acquire_write(8, SHORT).unwrap();
        assert!(matches!(
            queue.release_write(slot, 9),
            Err(QueueError::Oversized { .. })
        ));
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let queue = Arc::new(blocking(1));
        let reader_queue = queue.clone();
        let reader = thread::spawn(move || reader_queue.acquire_read(None).err());

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(reader.join().unwrap(), Some(QueueError::Closed));
        assert!(queue.is_closed());
        assert_eq!(queue.acquire_write(1, SHORT).err(), Some(QueueError::Closed));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let queue = lossy(2);
        queue.close();
        assert_eq!(queue.try_send(&[1]), Err(QueueError::Closed));
        assert_eq!(queue.acquire_read(SHORT).err(), Some(QueueError::Closed));
    }

    #[test]
    fn test_error_display() {
        let err = QueueError::ModeMismatch {
            operation: "try_send",
            mode: QueueMode::BlockingHandoff,
        };
        assert_eq!(
            err.to_string(),
            "try_send is not available on a blocking-handoff queue"
        );
    }
}
