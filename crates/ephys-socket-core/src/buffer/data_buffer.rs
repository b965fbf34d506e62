//! Destination ring buffer
//!
//! Fixed-capacity, timestamp-aware frame buffer shared between the
//! acquisition worker (producer) and the downstream pipeline (consumer).
//! A frame is one sample across all channels plus its timestamp and
//! event-marker word. Frames are only ever written whole.

use crate::acquisition::convert::transpose_into;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Ring storage for one buffer geometry
struct Rings {
    samples: HeapRb<f32>,
    timestamps: HeapRb<f64>,
    event_words: HeapRb<u64>,
    channel_count: usize,
    capacity: usize,
}

impl Rings {
    fn new(channel_count: usize, capacity: usize) -> Self {
        let channel_count = channel_count.max(1);
        let capacity = capacity.max(1);
        Self {
            samples: HeapRb::new(channel_count * capacity),
            timestamps: HeapRb::new(capacity),
            event_words: HeapRb::new(capacity),
            channel_count,
            capacity,
        }
    }
}

/// Frames drained from a [`DataBuffer`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frames {
    /// Sample-major values, `frame_count * channel_count` long
    pub samples: Vec<f32>,
    /// One timestamp per frame
    pub timestamps: Vec<f64>,
    /// One event-marker word per frame
    pub event_words: Vec<u64>,
    /// Channels per frame
    pub channel_count: usize,
}

impl Frames {
    pub fn frame_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// All values of one channel, in time order
    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channel_count.max(1))
            .copied()
            .collect()
    }

    /// Samples rearranged channel-major (`[channel][frame]` flattened)
    pub fn to_channel_major(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.samples.len()];
        transpose_into(
            &self.samples,
            &mut out,
            self.frame_count(),
            self.channel_count,
        );
        out
    }
}

/// Thread-safe destination buffer for converted chunks
pub struct DataBuffer {
    rings: Mutex<Rings>,
    /// Frames dropped because the consumer fell behind
    overflowed: AtomicU64,
}

impl DataBuffer {
    /// Create a buffer for `channel_count` channels holding `capacity` frames
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            rings: Mutex::new(Rings::new(channel_count, capacity)),
            overflowed: AtomicU64::new(0),
        }
    }

    fn rings(&self) -> MutexGuard<'_, Rings> {
        // A panic while holding the lock cannot leave a partial frame
        // behind, so the rings stay usable.
        self.rings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append up to `frame_count` frames
    ///
    /// `samples` is sample-major (`frame * channels + channel`). Frames that
    /// do not fit are dropped and counted. Returns the frames written.
    pub fn append(
        &self,
        samples: &[f32],
        timestamps: &[f64],
        event_words: &[u64],
        frame_count: usize,
    ) -> usize {
        let mut rings = self.rings();
        let channels = rings.channel_count;

        let supplied = frame_count
            .min(samples.len() / channels)
            .min(timestamps.len())
            .min(event_words.len());
        let frames = supplied.min(rings.timestamps.vacant_len());

        rings.samples.push_slice(&samples[..frames * channels]);
        rings.timestamps.push_slice(&timestamps[..frames]);
        rings.event_words.push_slice(&event_words[..frames]);

        if frames < frame_count {
            let dropped = (frame_count - frames) as u64;
            self.overflowed.fetch_add(dropped, Ordering::Relaxed);
            tracing::warn!(
                requested = frame_count,
                written = frames,
                capacity = rings.capacity,
                "Destination buffer overflow, dropping frames"
            );
        }

        frames
    }

    /// Drain up to `max_frames` of the oldest frames
    pub fn read(&self, max_frames: usize) -> Frames {
        let mut rings = self.rings();
        let channels = rings.channel_count;
        let frames = max_frames.min(rings.timestamps.occupied_len());

        let mut out = Frames {
            samples: vec![0.0; frames * channels],
            timestamps: vec![0.0; frames],
            event_words: vec![0; frames],
            channel_count: channels,
        };
        rings.samples.pop_slice(&mut out.samples);
        rings.timestamps.pop_slice(&mut out.timestamps);
        rings.event_words.pop_slice(&mut out.event_words);
        out
    }

    /// Reshape the buffer, discarding anything it holds
    pub fn resize(&self, channel_count: usize, capacity: usize) {
        let mut rings = self.rings();
        if rings.channel_count == channel_count.max(1) && rings.capacity == capacity.max(1) {
            rings.samples.clear();
            rings.timestamps.clear();
            rings.event_words.clear();
        } else {
            *rings = Rings::new(channel_count, capacity);
        }
    }

    /// Discard all buffered frames
    pub fn clear(&self) {
        let mut rings = self.rings();
        rings.samples.clear();
        rings.timestamps.clear();
        rings.event_words.clear();
    }

    /// Frames waiting to be read
    pub fn frames_available(&self) -> usize {
        self.rings().timestamps.occupied_len()
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.rings().capacity
    }

    /// Channels per frame
    pub fn channel_count(&self) -> usize {
        self.rings().channel_count
    }

    /// Total frames dropped on overflow since creation
    pub fn overflowed_frames(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rings = self.rings();
        f.debug_struct("DataBuffer")
            .field("channel_count", &rings.channel_count)
            .field("capacity", &rings.capacity)
            .field("frames_available", &rings.timestamps.occupied_len())
            .finish()
    }
}
