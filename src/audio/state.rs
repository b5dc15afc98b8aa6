use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cross-thread flags shared by the decode task and the playback loop.
///
/// Every flag has exactly one writer:
/// - `eof`, `done`, `task_done`, `holding_slot`: decode task
/// - `stop`: the owner of the pipeline (playback loop or its caller)
#[derive(Debug, Default)]
pub struct PipelineState {
    eof: AtomicBool,
    done: AtomicBool,
    stop: AtomicBool,
    task_done: AtomicBool,
    holding_slot: AtomicBool,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub(crate) fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    /// No further chunk will ever be published.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Cooperative cancellation. Idempotent.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// The decode task has exited and returned any slot it held.
    pub fn is_task_done(&self) -> bool {
        self.task_done.load(Ordering::Acquire)
    }

    pub(crate) fn mark_task_done(&self) {
        self.task_done.store(true, Ordering::Release);
    }

    /// True while the decode task owns a slot it has not yet published.
    pub fn decoder_holds_slot(&self) -> bool {
        self.holding_slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_holding_slot(&self, holding: bool) {
        self.holding_slot.store(holding, Ordering::Release);
    }
}

/// Counters written by the decode task, read by anyone.
#[derive(Debug, Default)]
pub struct PipelineStats {
    chunks_published: AtomicU64,
    samples_published: AtomicU64,
    desync_recoveries: AtomicU64,
    skipped_frames: AtomicU64,
}

impl PipelineStats {
    pub fn chunks_published(&self) -> u64 {
        self.chunks_published.load(Ordering::Relaxed)
    }

    /// Interleaved samples across all published chunks.
    pub fn samples_published(&self) -> u64 {
        self.samples_published.load(Ordering::Relaxed)
    }

    /// Times a leading byte was discarded because no frame decoded.
    pub fn desync_recoveries(&self) -> u64 {
        self.desync_recoveries.load(Ordering::Relaxed)
    }

    /// Frames consumed without producing samples (tags, metadata, bit-reservoir warmup).
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn record_publish(&self, interleaved_samples: usize) {
        self.chunks_published.fetch_add(1, Ordering::Relaxed);
        self.samples_published
            .fetch_add(interleaved_samples as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_desync(&self) {
        self.desync_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_frame(&self) {
        self.skipped_frames.fetch_add(1, Ordering::Relaxed);
    }
}
