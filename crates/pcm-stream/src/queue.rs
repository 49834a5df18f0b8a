//! Bounded sample queue between the blocking playback writer and the device
//! callback.
//!
//! The writer side blocks when the queue is full, which is what gives
//! [`crate::playback::PlaybackSink`] its "write blocks like a line" behavior.
//! The callback side never blocks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Thread-safe bounded queue for interleaved `f32` samples.
///
/// A `closed` flag lives under the same mutex as the samples so that closing
/// and draining cannot race.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    capacity_samples: usize,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Queue capacity in samples for `seconds` of audio at `(rate_hz, channels)`.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels.max(1))
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity_samples: capacity_samples.max(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames (snapshot).
    #[cfg(test)]
    fn len_frames(&self) -> usize {
        self.inner.lock().unwrap().samples.len() / self.channels
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Mark the queue finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns the number of samples accepted; fewer than `samples.len()` means
    /// the queue was closed while waiting.
    pub fn push_blocking(&self, samples: &[f32]) -> usize {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();
            while g.samples.len() >= self.capacity_samples && !g.closed {
                g = self.cv.wait(g).unwrap();
            }
            if g.closed {
                return offset;
            }

            let room = self.capacity_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Take up to `max_frames` whole frames without blocking.
    pub fn pop_frames(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();
        let take_frames = (g.samples.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take_frames * self.channels).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and every whole frame has been taken.
    ///
    /// A trailing partial frame can never be popped, so it is discarded here.
    pub fn wait_drained(&self) {
        let mut g = self.inner.lock().unwrap();
        while !(g.closed && g.samples.len() < self.channels) {
            g = self.cv.wait(g).unwrap();
        }
        g.samples.clear();
    }
}
