use crate::audio::decode_task::{ChunkFiller, DecodeTask};
use crate::audio::error::AudioError;
use crate::audio::handoff::{slot_queues, PlaybackEnd};
use crate::audio::pool::{BufferPool, PcmChunk, MAX_SAMPLES_PER_FRAME};
use crate::audio::state::{PipelineState, PipelineStats};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const LOG_TARGET: &str = "pocket_player::audio::pipeline";

/// Smallest accepted input ring; must hold the largest MPEG frame with room to spare.
pub const MIN_INPUT_RING_BYTES: usize = 4096;

/// Sizing and timing of one playback pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of PCM chunk slots (N).
    pub pool_size: usize,
    /// Ready chunks required before steady-state playback starts.
    pub prefill_chunks: usize,
    /// Sink submissions allowed in flight at once.
    pub max_in_flight: usize,
    pub input_ring_bytes: usize,
    /// Interleaved samples per slot.
    pub chunk_capacity_samples: usize,
    /// Decode task wait granularity; bounds how long it takes to notice stop.
    pub free_poll_ms: u64,
    pub loop_sleep_ms: u64,
    pub prefill_sleep_ms: u64,
    /// Upper bound on waiting for the decode task to acknowledge stop.
    pub teardown_wait_ms: u64,
    pub sink_channel: u8,
    pub decode_stack_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: 24,
            prefill_chunks: 8,
            max_in_flight: 2,
            input_ring_bytes: 48 * 1024,
            chunk_capacity_samples: MAX_SAMPLES_PER_FRAME,
            free_poll_ms: 20,
            loop_sleep_ms: 1,
            prefill_sleep_ms: 5,
            teardown_wait_ms: 500,
            sink_channel: 0,
            decode_stack_bytes: 256 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.pool_size == 0 {
            return Err(AudioError::InvalidConfig("pool_size must be at least 1".to_string()));
        }
        if self.prefill_chunks > self.pool_size {
            return Err(AudioError::InvalidConfig(format!(
                "prefill_chunks ({}) exceeds pool_size ({})",
                self.prefill_chunks, self.pool_size
            )));
        }
        if self.max_in_flight == 0 {
            return Err(AudioError::InvalidConfig("max_in_flight must be at least 1".to_string()));
        }
        if self.input_ring_bytes < MIN_INPUT_RING_BYTES {
            return Err(AudioError::InvalidConfig(format!(
                "input_ring_bytes must be at least {}",
                MIN_INPUT_RING_BYTES
            )));
        }
        if self.chunk_capacity_samples < MAX_SAMPLES_PER_FRAME {
            return Err(AudioError::InvalidConfig(format!(
                "chunk_capacity_samples must be at least {}",
                MAX_SAMPLES_PER_FRAME
            )));
        }
        if self.free_poll_ms == 0 {
            return Err(AudioError::InvalidConfig("free_poll_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn free_poll(&self) -> Duration {
        Duration::from_millis(self.free_poll_ms)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    pub fn prefill_sleep(&self) -> Duration {
        Duration::from_millis(self.prefill_sleep_ms)
    }

    pub fn teardown_wait(&self) -> Duration {
        Duration::from_millis(self.teardown_wait_ms)
    }
}

/// What teardown found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// The decode task set `task_done` within the wait bound.
    pub acknowledged: bool,
    /// Slots sitting in the free queue after everything was handed back.
    pub reclaimed_slots: usize,
    pub waited: Duration,
}

/// A running decode task plus the playback-side handles to its pool.
///
/// Dropping a pipeline without calling [`Pipeline::teardown`] still raises stop.
pub struct Pipeline {
    pool: Arc<BufferPool>,
    state: Arc<PipelineState>,
    stats: Arc<PipelineStats>,
    queues: PlaybackEnd,
    task: Option<JoinHandle<()>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Allocates the pool, seeds the free queue and spawns the decode thread.
    ///
    /// Nothing is left behind on error: the pool and queues are dropped and the
    /// filler (with its byte source) goes with the unspawned closure.
    #[instrument(skip(filler, config), fields(pool_size = config.pool_size))]
    pub fn start<F: ChunkFiller + 'static>(
        filler: F,
        config: &PipelineConfig,
    ) -> Result<Self, AudioError> {
        config.validate()?;

        let pool = Arc::new(BufferPool::new(config.pool_size, config.chunk_capacity_samples));
        let (decoder_end, playback_end) = slot_queues(config.pool_size);
        let state = Arc::new(PipelineState::new());
        let stats = Arc::new(PipelineStats::default());

        let task = DecodeTask {
            filler,
            queues: decoder_end,
            pool: Arc::clone(&pool),
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            free_poll: config.free_poll(),
        };

        let handle = thread::Builder::new()
            .name("pcm-decode".to_string())
            .stack_size(config.decode_stack_bytes)
            .spawn(move || task.run())
            .map_err(|e| AudioError::ResourceCreation(format!("decode thread: {}", e)))?;

        info!(target: LOG_TARGET, "Pipeline started: {} slots of {} samples, prefill {}",
            config.pool_size, config.chunk_capacity_samples, config.prefill_chunks);

        Ok(Self {
            pool,
            state,
            stats,
            queues: playback_end,
            task: Some(handle),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Next published slot, if any. Never blocks.
    pub fn take_ready(&self) -> Option<usize> {
        self.queues.take_ready()
    }

    /// Returns a finished slot to the decode task. Never blocks.
    pub fn release_free(&self, index: usize) {
        self.queues.release_free(index);
    }

    pub fn ready_len(&self) -> usize {
        self.queues.ready_len()
    }

    pub fn free_len(&self) -> usize {
        self.queues.free_len()
    }

    /// Access to a slot the caller owns (taken from the ready queue).
    pub fn chunk(&self, index: usize) -> MutexGuard<'_, PcmChunk> {
        self.pool.slot(index)
    }

    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    /// Stops the decode task, waits up to the configured bound for it to
    /// acknowledge, then hands back `held` plus anything still ready.
    ///
    /// Resources are reclaimed whether or not the task acknowledged.
    pub fn teardown(mut self, held: impl IntoIterator<Item = usize>) -> TeardownReport {
        self.state.request_stop();
        let started = Instant::now();
        let deadline = started + self.config.teardown_wait();
        while !self.state.is_task_done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let acknowledged = self.state.is_task_done();
        let waited = started.elapsed();

        if let Some(handle) = self.task.take() {
            if acknowledged || handle.is_finished() {
                if handle.join().is_err() {
                    error!(target: LOG_TARGET, "Decode task panicked.");
                }
            } else {
                warn!(target: LOG_TARGET, "Decode task did not acknowledge stop within {:?}; detaching it.",
                    self.config.teardown_wait());
            }
        }

        for index in held {
            self.queues.release_free(index);
        }
        while let Some(index) = self.queues.take_ready() {
            self.queues.release_free(index);
        }

        let reclaimed_slots = self.queues.free_len();
        if acknowledged && reclaimed_slots != self.pool.len() {
            error!(target: LOG_TARGET, "Slot accounting mismatch: {} of {} slots reclaimed.",
                reclaimed_slots, self.pool.len());
        }
        debug!(target: LOG_TARGET, "Teardown finished in {:?}, {} slots reclaimed.", waited, reclaimed_slots);

        TeardownReport {
            acknowledged,
            reclaimed_slots,
            waited,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.state.request_stop();
    }
}
