//! Background producer: fills free pool slots and publishes them as ready.
//!
//! One loop drives every input format. A format only supplies a
//! [`ChunkFiller`], which advances by one step per call:
//!
//! ```text
//! WAIT_FREE -> FILL_INPUT -> DECODE_FRAME -> { PUBLISH | SKIP_BYTE | MARK_DONE }
//! ```

use crate::audio::frame_decoder::FrameDecoder;
use crate::audio::handoff::DecoderEnd;
use crate::audio::pool::{BufferPool, PcmChunk};
use crate::audio::ring::RawByteRing;
use crate::audio::sample_converter;
use crate::audio::source::{read_full, ByteSource};
use crate::audio::state::{PipelineState, PipelineStats};
use crate::audio::wav::WavHeader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace};

const LOG_TARGET: &str = "pocket_player::audio::decode_task";

/// Outcome of a single filler step on the held slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStep {
    /// The slot holds playable audio; publish it.
    Filled,
    /// Nothing publishable yet; step again into the same slot.
    Retry,
    /// The input is exhausted; no further chunk will be produced.
    Exhausted,
}

/// Per-format producer plugged into the decode task.
pub trait ChunkFiller: Send {
    /// Advances by one step, writing into `chunk` when audio is produced.
    fn step(
        &mut self,
        chunk: &mut PcmChunk,
        state: &PipelineState,
        stats: &PipelineStats,
    ) -> FillStep;

    /// Releases the input. Called once when the task exits.
    fn close(&mut self);
}

/// Compressed input: byte source -> ring -> frame decoder.
pub struct CompressedFiller<S: ByteSource, D: FrameDecoder> {
    source: S,
    decoder: D,
    ring: RawByteRing,
}

impl<S: ByteSource, D: FrameDecoder> CompressedFiller<S, D> {
    pub fn new(source: S, decoder: D, ring_capacity: usize) -> Self {
        Self {
            source,
            decoder,
            ring: RawByteRing::with_capacity(ring_capacity),
        }
    }
}

impl<S: ByteSource, D: FrameDecoder> ChunkFiller for CompressedFiller<S, D> {
    fn step(
        &mut self,
        chunk: &mut PcmChunk,
        state: &PipelineState,
        stats: &PipelineStats,
    ) -> FillStep {
        // FILL_INPUT
        if !state.is_eof() && self.ring.below_half() {
            match self.ring.fill_from(&mut self.source) {
                Ok(0) => {
                    debug!(target: LOG_TARGET, "Byte source exhausted.");
                    state.mark_eof();
                }
                Ok(n) => trace!(target: LOG_TARGET, "Read {} bytes, ring holds {}", n, self.ring.len()),
                Err(e) => {
                    error!(target: LOG_TARGET, "Read failed, treating as end of stream: {}", e);
                    state.mark_eof();
                }
            }
        }

        if self.ring.is_empty() {
            return if state.is_eof() { FillStep::Exhausted } else { FillStep::Retry };
        }

        // DECODE_FRAME
        let frame = self.decoder.decode(self.ring.as_slice(), chunk.buffer_mut());
        if frame.consumed_bytes == 0 {
            if state.is_eof() {
                debug!(target: LOG_TARGET, "{} trailing bytes do not form a frame.", self.ring.len());
                return FillStep::Exhausted;
            }
            // SKIP_BYTE
            trace!(target: LOG_TARGET, "Decoder desync, discarding one byte.");
            self.ring.consume(1);
            stats.record_desync();
            return FillStep::Retry;
        }

        self.ring.consume(frame.consumed_bytes);
        if !frame.has_audio() {
            debug!(target: LOG_TARGET, "Consumed {} bytes without audio.", frame.consumed_bytes);
            stats.record_skipped_frame();
            return FillStep::Retry;
        }

        chunk.set_filled(frame.produced_samples, frame.sample_rate_hz, frame.channel_count);
        FillStep::Filled
    }

    fn close(&mut self) {
        self.source.close();
    }
}

/// Already-decoded PCM: each step reads one chunk's worth of sample bytes.
pub struct RawPcmFiller<S: ByteSource> {
    source: S,
    header: WavHeader,
    remaining: u64,
    staging: Box<[u8]>,
}

impl<S: ByteSource> RawPcmFiller<S> {
    /// `source` must be positioned on the first data byte.
    pub fn new(source: S, header: WavHeader, chunk_capacity_samples: usize) -> Self {
        let channels = usize::from(header.format.channel_count.max(1));
        let frames_per_chunk = (chunk_capacity_samples / channels).max(1);
        let staging_len = frames_per_chunk * header.format.block_align().max(1);
        Self {
            source,
            header,
            remaining: header.data_len,
            staging: vec![0u8; staging_len].into_boxed_slice(),
        }
    }
}

impl<S: ByteSource> ChunkFiller for RawPcmFiller<S> {
    fn step(
        &mut self,
        chunk: &mut PcmChunk,
        state: &PipelineState,
        _stats: &PipelineStats,
    ) -> FillStep {
        if self.remaining == 0 {
            state.mark_eof();
            return FillStep::Exhausted;
        }

        let want = (self.staging.len() as u64).min(self.remaining) as usize;
        let got = match read_full(&mut self.source, &mut self.staging[..want]) {
            Ok(n) => n,
            Err(e) => {
                error!(target: LOG_TARGET, "Read failed, treating as end of data: {}", e);
                0
            }
        };
        self.remaining -= got as u64;
        if got < want {
            debug!(target: LOG_TARGET, "Data chunk shorter than declared, {} bytes missing.", self.remaining);
            self.remaining = 0;
        }
        if self.remaining == 0 {
            state.mark_eof();
        }

        let format = self.header.format;
        let block = format.block_align();
        let frames = got / block;
        if frames == 0 {
            return FillStep::Exhausted;
        }
        let written = sample_converter::convert_pcm_to_s16(
            &self.staging[..frames * block],
            format.bits_per_sample,
            chunk.buffer_mut(),
        );
        chunk.set_filled(
            written / usize::from(format.channel_count),
            format.sample_rate_hz,
            format.channel_count,
        );
        FillStep::Filled
    }

    fn close(&mut self) {
        self.source.close();
    }
}

/// Everything the decode thread owns or shares.
pub(crate) struct DecodeTask<F: ChunkFiller> {
    pub filler: F,
    pub queues: DecoderEnd,
    pub pool: Arc<BufferPool>,
    pub state: Arc<PipelineState>,
    pub stats: Arc<PipelineStats>,
    pub free_poll: Duration,
}

impl<F: ChunkFiller> DecodeTask<F> {
    /// Runs until the input is exhausted or stop is requested, then sets `task_done`.
    ///
    /// A slot held at exit goes back to the free queue, so every index stays accounted for.
    #[instrument(skip(self), name = "decode_task")]
    pub fn run(mut self) {
        info!(target: LOG_TARGET, "Decode task started.");
        'outer: loop {
            // WAIT_FREE
            let Some(index) = self.queues.acquire_free(&self.state, self.free_poll) else {
                debug!(target: LOG_TARGET, "Stop observed while waiting for a free slot.");
                break;
            };
            self.state.set_holding_slot(true);

            loop {
                if self.state.stop_requested() {
                    self.give_back(index);
                    break 'outer;
                }
                let mut chunk = self.pool.slot(index);
                match self.filler.step(&mut chunk, &self.state, &self.stats) {
                    FillStep::Filled => {
                        let samples = chunk.sample_count();
                        drop(chunk);
                        self.stats.record_publish(samples);
                        self.state.set_holding_slot(false);
                        if !self.queues.publish_ready(index) {
                            self.give_back(index);
                            break 'outer;
                        }
                        trace!(target: LOG_TARGET, "Published slot {} ({} samples)", index, samples);
                        break;
                    }
                    FillStep::Retry => {}
                    FillStep::Exhausted => {
                        drop(chunk);
                        self.state.mark_done();
                        self.give_back(index);
                        info!(target: LOG_TARGET, "Input exhausted after {} chunks.", self.stats.chunks_published());
                        break 'outer;
                    }
                }
            }
        }

        self.filler.close();
        self.state.mark_task_done();
        debug!(target: LOG_TARGET, "Decode task exited.");
    }

    fn give_back(&self, index: usize) {
        self.pool.slot(index).clear();
        self.queues.return_free(index);
        self.state.set_holding_slot(false);
    }
}
