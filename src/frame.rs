//! Frame containers shared between the acquisition and inference threads.
//!
//! - `Frame`: RGB24 pixel buffer with its capture time. Cloning shares pixels.
//! - `LatestFrame`: single-slot cell holding the most recent frame for capture.
//! - `FrameQueue`: bounded hand-off that drops new frames when full.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default frame queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default consumer wait before re-checking the running flag.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured RGB24 image.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-source sequence number.
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap a packed RGB24 buffer. The length must be `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: Arc::new(pixels),
            width,
            height,
            sequence,
            captured_at: Local::now(),
        })
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: Arc::new(image.into_raw()),
            width,
            height,
            sequence,
            captured_at: Local::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy the pixels into an owned image buffer.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.as_ref().clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: most recent frame, read by capture
// ----------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(frame);
    }

    /// Clone of the most recent frame, if any has been published.
    pub fn latest(&self) -> Option<Frame> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// FrameQueue: bounded, drop-when-full
// ----------------------------------------------------------------------------

/// Bounded FIFO between acquisition and inference.
///
/// `offer` never blocks: when the queue is full the new frame is dropped and
/// counted. `pop_timeout` blocks up to the given duration.
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    counters: Arc<QueueCounters>,
}

#[derive(Default)]
struct QueueCounters {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame queue capacity must be at least 1"));
        }
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            counters: Arc::new(QueueCounters::default()),
        })
    }

    /// Offer a frame without blocking. Returns false when the frame was dropped.
    pub fn offer(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for the next frame. `None` on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn accepted(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn make_test_frame(sequence: u64) -> Frame {
        Frame::from_rgb(vec![sequence as u8; 4 * 2 * 3], 4, 2, sequence).unwrap()
    }

    #[test]
    fn frame_rejects_length_mismatch() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 2, 0).is_err());
    }

    #[test]
    fn frame_round_trips_through_image() -> Result<()> {
        let frame = make_test_frame(7);
        let image = frame.to_image()?;
        assert_eq!(image.dimensions(), (4, 2));
        let back = Frame::from_image(image, 8);
        assert_eq!(back.pixels(), frame.pixels());
        Ok(())
    }

    #[test]
    fn queue_never_exceeds_capacity() -> Result<()> {
        let queue = FrameQueue::new(3)?;
        for i in 0..3 {
            assert!(queue.offer(make_test_frame(i)));
        }
        assert!(!queue.offer(make_test_frame(3)));
        assert!(!queue.offer(make_test_frame(4)));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.accepted(), 3);
        assert_eq!(queue.dropped(), 2);

        // Oldest frames survive; the dropped ones never entered.
        let first = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.sequence, 0);
        Ok(())
    }

    #[test]
    fn pop_times_out_on_empty_queue() -> Result<()> {
        let queue = FrameQueue::new(1)?;
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(FrameQueue::new(0).is_err());
    }

    #[test]
    fn latest_frame_keeps_most_recent() {
        let latest = LatestFrame::new();
        assert!(latest.latest().is_none());
        latest.publish(make_test_frame(1));
        latest.publish(make_test_frame(2));
        assert_eq!(latest.latest().unwrap().sequence, 2);
    }
}
