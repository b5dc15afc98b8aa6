// src/audio/playback.rs
use crate::audio::{
    cancel::CancellationSource,
    decode_task::{CompressedFiller, RawPcmFiller},
    error::AudioError,
    frame_decoder::FrameDecoder,
    mpeg::{FrameHeader, MpegFrameDecoder},
    pipeline::{Pipeline, PipelineConfig, TeardownReport},
    sink::AudioSink,
    source::{ByteSource, FileSource},
    wav,
};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

const LOG_TARGET: &str = "pocket_player::audio::playback";

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every published chunk was handed to the sink and drained.
    Completed,
    /// The cancellation source fired first.
    Cancelled,
}

/// Summary of one playback session, returned after teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    pub chunks_submitted: u64,
    pub samples_submitted: u64,
    pub chunks_published: u64,
    pub desync_recoveries: u64,
    pub skipped_frames: u64,
    /// Submissions the sink refused and that were retried later.
    pub rejected_submissions: u64,
    /// Highest number of submissions in flight at once.
    pub max_in_flight: usize,
    pub pool_size: usize,
    pub reclaimed_slots: usize,
    pub decode_task_acknowledged: bool,
}

impl PlaybackReport {
    /// All slots made it back to the free queue.
    pub fn pool_conserved(&self) -> bool {
        self.reclaimed_slots == self.pool_size
    }
}

/// Result of one steady-state iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    Continue,
    Finished,
    Cancelled,
}

/// Foreground consumer: moves ready chunks into the sink under a bounded
/// in-flight window, then tears the pipeline down.
pub struct PlaybackLoop<'a, K: AudioSink + ?Sized, C: CancellationSource + ?Sized> {
    pipeline: Pipeline,
    sink: &'a mut K,
    cancel: &'a mut C,
    /// Slot indices submitted to the sink, oldest first.
    in_flight: VecDeque<usize>,
    /// A ready slot the sink refused; submitted before anything newer.
    pending: Option<usize>,
    cancelled: bool,
    chunks_submitted: u64,
    samples_submitted: u64,
    rejected_submissions: u64,
    max_in_flight_seen: usize,
}

impl<'a, K: AudioSink + ?Sized, C: CancellationSource + ?Sized> PlaybackLoop<'a, K, C> {
    pub fn new(pipeline: Pipeline, sink: &'a mut K, cancel: &'a mut C) -> Self {
        let window = pipeline.config().max_in_flight;
        Self {
            pipeline,
            sink,
            cancel,
            in_flight: VecDeque::with_capacity(window + 1),
            pending: None,
            cancelled: false,
            chunks_submitted: 0,
            samples_submitted: 0,
            rejected_submissions: 0,
            max_in_flight_seen: 0,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn cancel_requested(&mut self) -> bool {
        if self.cancelled || self.cancel.poll_cancel_requested() {
            if !self.cancelled {
                info!(target: LOG_TARGET, "Cancellation requested, stopping playback.");
            }
            self.cancelled = true;
            self.pipeline.request_stop();
            return true;
        }
        false
    }

    /// Waits until enough chunks are ready to start, or the input ran out.
    ///
    /// Returns false if cancelled while waiting.
    pub fn prefill(&mut self) -> bool {
        let target = self.pipeline.config().prefill_chunks.min(self.pipeline.pool_size());
        let started = Instant::now();
        loop {
            if self.pipeline.ready_len() >= target || self.pipeline.state().is_done() {
                debug!(target: LOG_TARGET, "Prefill reached {} ready chunks in {:?}.",
                    self.pipeline.ready_len(), started.elapsed());
                return true;
            }
            if self.cancel_requested() {
                return false;
            }
            thread::sleep(self.pipeline.config().prefill_sleep());
        }
    }

    /// One pass: poll cancel, reclaim finished slots, top up the sink.
    pub fn step(&mut self) -> LoopStep {
        if self.cancel_requested() {
            return LoopStep::Cancelled;
        }

        let channel = self.pipeline.config().sink_channel;
        let window = self.pipeline.config().max_in_flight;

        // Slots the sink no longer reports as active have finished playing,
        // oldest first because submissions play in order.
        let mut playing = self.sink.active_count(channel);
        while self.in_flight.len() > playing {
            if let Some(index) = self.in_flight.pop_front() {
                self.pipeline.release_free(index);
            }
        }

        while playing < window {
            let Some(index) = self.pending.take().or_else(|| self.pipeline.take_ready()) else {
                break;
            };

            let chunk = self.pipeline.chunk(index);
            if !chunk.is_playable() {
                warn!(target: LOG_TARGET, "Slot {} is not playable ({} samples, {} Hz, {} ch), dropping it.",
                    index, chunk.sample_count(), chunk.sample_rate_hz(), chunk.channel_count());
                drop(chunk);
                self.pipeline.release_free(index);
                continue;
            }
            let sample_count = chunk.sample_count();
            let accepted = self
                .sink
                .submit(chunk.samples(), chunk.sample_rate_hz(), chunk.is_stereo(), channel);
            drop(chunk);

            if !accepted {
                trace!(target: LOG_TARGET, "Sink refused slot {}, retrying next pass.", index);
                self.pending = Some(index);
                self.rejected_submissions += 1;
                break;
            }

            self.in_flight.push_back(index);
            self.chunks_submitted += 1;
            self.samples_submitted += sample_count as u64;
            self.max_in_flight_seen = self.max_in_flight_seen.max(self.in_flight.len());
            playing = self.sink.active_count(channel).max(self.in_flight.len());
        }

        if self.pipeline.state().is_done()
            && self.pipeline.ready_len() == 0
            && self.in_flight.is_empty()
            && self.pending.is_none()
        {
            return LoopStep::Finished;
        }
        LoopStep::Continue
    }

    /// Prefill, steady state until finished or cancelled, then teardown.
    #[instrument(skip(self), name = "playback_loop")]
    pub fn run(mut self) -> PlaybackReport {
        info!(target: LOG_TARGET, "Starting playback loop.");
        if self.prefill() {
            let sleep = self.pipeline.config().loop_sleep();
            loop {
                match self.step() {
                    LoopStep::Continue => thread::sleep(sleep),
                    LoopStep::Finished => {
                        info!(target: LOG_TARGET, "All chunks played.");
                        break;
                    }
                    LoopStep::Cancelled => break,
                }
            }
        }
        self.finish()
    }

    /// Tears the pipeline down and stops the sink if playback was cancelled.
    pub fn finish(self) -> PlaybackReport {
        let PlaybackLoop {
            pipeline,
            sink,
            mut in_flight,
            pending,
            cancelled,
            chunks_submitted,
            samples_submitted,
            rejected_submissions,
            max_in_flight_seen,
            ..
        } = self;

        let channel = pipeline.config().sink_channel;
        let pool_size = pipeline.pool_size();
        let chunks_published = pipeline.stats().chunks_published();
        let desync_recoveries = pipeline.stats().desync_recoveries();
        let skipped_frames = pipeline.stats().skipped_frames();

        let TeardownReport {
            acknowledged,
            reclaimed_slots,
            ..
        } = pipeline.teardown(in_flight.drain(..).chain(pending));

        if cancelled {
            sink.stop(channel);
        }

        let report = PlaybackReport {
            outcome: if cancelled {
                PlaybackOutcome::Cancelled
            } else {
                PlaybackOutcome::Completed
            },
            chunks_submitted,
            samples_submitted,
            chunks_published,
            desync_recoveries,
            skipped_frames,
            rejected_submissions,
            max_in_flight: max_in_flight_seen,
            pool_size,
            reclaimed_slots,
            decode_task_acknowledged: acknowledged,
        };
        info!(target: LOG_TARGET, "Playback finished: {:?}, {} chunks submitted, {}/{} slots reclaimed.",
            report.outcome, report.chunks_submitted, report.reclaimed_slots, report.pool_size);
        report
    }
}

/// Input families the player knows how to feed into a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// MPEG audio frames, decoded in the background task.
    Compressed,
    /// RIFF/WAVE linear PCM.
    RawPcm,
}

/// Picks the stream kind from the file extension, falling back to the first bytes.
pub fn detect_kind(path: &Path) -> Result<StreamKind, AudioError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") | Some("mp2") | Some("mp1") => return Ok(StreamKind::Compressed),
        Some("wav") | Some("wave") => return Ok(StreamKind::RawPcm),
        _ => {}
    }

    let mut file = File::open(path).map_err(|source| AudioError::OpenFailure {
        path: path.to_path_buf(),
        source,
    })?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    sniff_kind(&magic[..filled]).ok_or_else(|| {
        AudioError::FormatFailure(format!("cannot tell the audio format of {}", path.display()))
    })
}

/// Recognises a stream by its leading bytes.
pub fn sniff_kind(head: &[u8]) -> Option<StreamKind> {
    if head.starts_with(b"RIFF") {
        Some(StreamKind::RawPcm)
    } else if head.starts_with(b"ID3") || FrameHeader::parse(head).is_some() {
        Some(StreamKind::Compressed)
    } else {
        None
    }
}

/// Starts a compressed-stream pipeline over any byte source and frame decoder.
pub fn start_compressed<S, D>(
    source: S,
    decoder: D,
    config: &PipelineConfig,
) -> Result<Pipeline, AudioError>
where
    S: ByteSource + 'static,
    D: FrameDecoder + 'static,
{
    config.validate()?;
    Pipeline::start(CompressedFiller::new(source, decoder, config.input_ring_bytes), config)
}

/// Parses the WAV header from `source`, then starts a raw PCM pipeline over its data.
///
/// The source is closed if the header is rejected.
pub fn start_raw_pcm<S>(mut source: S, config: &PipelineConfig) -> Result<Pipeline, AudioError>
where
    S: ByteSource + 'static,
{
    if let Err(e) = config.validate() {
        source.close();
        return Err(e);
    }
    let header = match wav::read_header(&mut source) {
        Ok(header) => header,
        Err(e) => {
            source.close();
            return Err(e);
        }
    };
    info!(target: LOG_TARGET, "PCM stream: {} Hz, {} ch, {} bit, {} ms",
        header.format.sample_rate_hz, header.format.channel_count, header.format.bits_per_sample,
        header.duration_ms());
    Pipeline::start(RawPcmFiller::new(source, header, config.chunk_capacity_samples), config)
}

/// Opens `path` and starts the matching pipeline. Fails before any thread
/// is spawned if the file cannot be opened or its format is unusable.
pub fn open_pipeline(path: &Path, config: &PipelineConfig) -> Result<Pipeline, AudioError> {
    config.validate()?;
    let kind = detect_kind(path)?;
    let mut source = FileSource::open(path)?;
    if source.is_empty() {
        source.close();
        return Err(AudioError::FormatFailure(format!("{} is empty", path.display())));
    }
    debug!(target: LOG_TARGET, "Opened {} ({} bytes) as {:?}", path.display(), source.len(), kind);
    match kind {
        StreamKind::Compressed => start_compressed(source, MpegFrameDecoder::new(), config),
        StreamKind::RawPcm => start_raw_pcm(source, config),
    }
}

/// Runs a started pipeline to completion or cancellation.
pub fn play_pipeline<K, C>(pipeline: Pipeline, sink: &mut K, cancel: &mut C) -> PlaybackReport
where
    K: AudioSink + ?Sized,
    C: CancellationSource + ?Sized,
{
    PlaybackLoop::new(pipeline, sink, cancel).run()
}

/// Plays an MPEG audio file. Blocks until done or cancelled.
#[instrument(skip(config, sink, cancel))]
pub fn play_mp3<K, C>(
    path: &Path,
    config: &PipelineConfig,
    sink: &mut K,
    cancel: &mut C,
) -> Result<PlaybackReport, AudioError>
where
    K: AudioSink + ?Sized,
    C: CancellationSource + ?Sized,
{
    config.validate()?;
    let mut source = FileSource::open(path)?;
    if source.is_empty() {
        source.close();
        return Err(AudioError::FormatFailure(format!("{} is empty", path.display())));
    }
    let pipeline = start_compressed(source, MpegFrameDecoder::new(), config)?;
    Ok(play_pipeline(pipeline, sink, cancel))
}

/// Plays a RIFF/WAVE PCM file. Blocks until done or cancelled.
#[instrument(skip(config, sink, cancel))]
pub fn play_wav<K, C>(
    path: &Path,
    config: &PipelineConfig,
    sink: &mut K,
    cancel: &mut C,
) -> Result<PlaybackReport, AudioError>
where
    K: AudioSink + ?Sized,
    C: CancellationSource + ?Sized,
{
    let source = FileSource::open(path)?;
    let pipeline = start_raw_pcm(source, config)?;
    Ok(play_pipeline(pipeline, sink, cancel))
}

/// Plays `path`, choosing the decoder by extension or content.
#[instrument(skip(config, sink, cancel))]
pub fn play_file<K, C>(
    path: &Path,
    config: &PipelineConfig,
    sink: &mut K,
    cancel: &mut C,
) -> Result<PlaybackReport, AudioError>
where
    K: AudioSink + ?Sized,
    C: CancellationSource + ?Sized,
{
    let pipeline = open_pipeline(path, config)?;
    Ok(play_pipeline(pipeline, sink, cancel))
}
