use std::sync::{Mutex, MutexGuard, PoisonError};

/// Worst-case interleaved sample count of one MPEG audio frame (1152 x 2).
pub const MAX_SAMPLES_PER_FRAME: usize = 1152 * 2;

/// Submissions shorter than this are reported with this duration instead.
pub const MIN_CHUNK_DURATION_MS: u32 = 10;

/// One pool slot: a fixed-capacity interleaved S16 buffer plus playback metadata.
#[derive(Debug)]
pub struct PcmChunk {
    samples: Box<[i16]>,
    sample_count: usize,
    sample_rate_hz: u32,
    channel_count: u16,
    duration_ms: u32,
}

impl PcmChunk {
    /// Allocates a zeroed chunk able to hold `capacity` interleaved samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0i16; capacity].into_boxed_slice(),
            sample_count: 0,
            sample_rate_hz: 0,
            channel_count: 0,
            duration_ms: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Whole backing buffer, for the producer to write into.
    pub fn buffer_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Valid interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.sample_count]
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn is_stereo(&self) -> bool {
        self.channel_count == 2
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Records metadata after `frames` per-channel samples were written.
    ///
    /// The interleaved count is clamped to the slot capacity.
    pub fn set_filled(&mut self, frames: usize, sample_rate_hz: u32, channel_count: u16) {
        let channels = usize::from(channel_count.max(1));
        self.sample_count = (frames * channels).min(self.samples.len());
        self.sample_rate_hz = sample_rate_hz;
        self.channel_count = channel_count;
        self.duration_ms = if sample_rate_hz == 0 {
            0
        } else {
            let ms = (frames as u64 * 1000) / u64::from(sample_rate_hz);
            (ms.min(u64::from(u32::MAX)) as u32).max(MIN_CHUNK_DURATION_MS)
        };
    }

    /// Forgets the previous contents' metadata. Samples are left in place.
    pub fn clear(&mut self) {
        self.sample_count = 0;
        self.sample_rate_hz = 0;
        self.channel_count = 0;
        self.duration_ms = 0;
    }

    /// False for chunks that must never reach the sink.
    pub fn is_playable(&self) -> bool {
        self.sample_count > 0 && self.sample_rate_hz > 0 && matches!(self.channel_count, 1 | 2)
    }
}

/// N pre-allocated chunks addressed by index.
///
/// Each slot sits behind its own mutex only so that ownership can move between
/// threads in safe Rust. The index handoff through the free/ready channels
/// guarantees a slot has exactly one owner, so the locks are never contended.
#[derive(Debug)]
pub struct BufferPool {
    slots: Box<[Mutex<PcmChunk>]>,
}

impl BufferPool {
    pub fn new(slot_count: usize, chunk_capacity: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| Mutex::new(PcmChunk::with_capacity(chunk_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Locks slot `index`. Panics if the index is out of range.
    pub fn slot(&self, index: usize) -> MutexGuard<'_, PcmChunk> {
        // A poisoned slot only means a panicking owner; the samples are still plain data.
        self.slots[index].lock().unwrap_or_else(PoisonError::into_inner)
    }
}
