//! Per-session frame buffer: accumulates ~20 ms telephony chunks into
//! ~100 ms blocks for the AI peer, amortising per-message overhead while
//! bounding added latency.

use std::time::{Duration, Instant};

use crate::protocol_constants::{FRAME_BUFFER_FLUSH_INTERVAL_MS, FRAME_BUFFER_TARGET_SAMPLES};

/// Stateful per-session sample accumulator.
///
/// `append` returns a flushed block as soon as the target size is reached.
/// [`FrameBuffer::tick`] additionally forces a flush of whatever is held
/// once `flush_interval` has elapsed since the last flush, even if the
/// target size was never reached — the resulting partial block carries no
/// minimum size (see SPEC_FULL.md §4.2, open question 1).
pub struct FrameBuffer {
    target_samples: usize,
    flush_interval: Duration,
    held: Vec<i16>,
    last_flush: Instant,
}

impl FrameBuffer {
    /// Creates a frame buffer with the default target size and flush
    /// interval (2400 samples / 100 ms at 24 kHz).
    pub fn new() -> Self {
        Self::with_target(FRAME_BUFFER_TARGET_SAMPLES, FRAME_BUFFER_FLUSH_INTERVAL_MS)
    }

    /// Creates a frame buffer with an explicit target size and flush
    /// interval, for configurations that override the defaults.
    pub fn with_target(target_samples: usize, flush_interval_ms: u64) -> Self {
        Self {
            target_samples,
            flush_interval: Duration::from_millis(flush_interval_ms),
            held: Vec::with_capacity(target_samples),
            last_flush: Instant::now(),
        }
    }

    /// Accumulates samples, returning a flushed block once the
    /// accumulated length reaches the target.
    pub fn append(&mut self, pcm24k_samples: &[i16]) -> Option<Vec<i16>> {
        self.held.extend_from_slice(pcm24k_samples);
        if self.held.len() >= self.target_samples {
            Some(self.take())
        } else {
            None
        }
    }

    /// Called on a periodic tick (every ~50 ms). Forces a flush of
    /// whatever is held if the flush interval has elapsed and at least
    /// one sample is held.
    pub fn tick(&mut self) -> Option<Vec<i16>> {
        if !self.held.is_empty() && self.last_flush.elapsed() >= self.flush_interval {
            Some(self.take())
        } else {
            None
        }
    }

    /// Returns whatever is held at shutdown, possibly empty.
    pub fn drain(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.held)
    }

    fn take(&mut self) -> Vec<i16> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.held, Vec::with_capacity(self.target_samples))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_flushes_once_target_reached() {
        let mut buf = FrameBuffer::with_target(10, 100_000);
        assert!(buf.append(&[1; 5]).is_none());
        let flushed = buf.append(&[2; 5]).expect("should flush at target");
        assert_eq!(flushed.len(), 10);
    }

    #[test]
    fn append_carries_overflow_into_next_block() {
        let mut buf = FrameBuffer::with_target(10, 100_000);
        let flushed = buf.append(&[1; 14]).expect("should flush at target");
        assert_eq!(flushed.len(), 14, "a single over-target append flushes everything held");
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn tick_does_nothing_when_empty() {
        let mut buf = FrameBuffer::with_target(10, 0);
        assert!(buf.tick().is_none());
    }

    #[test]
    fn tick_flushes_partial_block_after_interval_elapses() {
        let mut buf = FrameBuffer::with_target(1_000_000, 0);
        buf.append(&[1, 2, 3]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let flushed = buf.tick().expect("partial flush after interval");
        assert_eq!(flushed, vec![1, 2, 3]);
    }

    #[test]
    fn drain_returns_whatever_is_held() {
        let mut buf = FrameBuffer::with_target(100, 100_000);
        buf.append(&[7, 8, 9]);
        assert_eq!(buf.drain(), vec![7, 8, 9]);
        assert_eq!(buf.drain(), Vec::<i16>::new());
    }
}
