//! ALSA-backed [`AudioSink`]. Each sink channel gets a writer thread that owns
//! its own PCM handle on the configured device.

use crate::audio::error::AudioError;
use crate::audio::sink::{AudioSink, SINK_CHANNELS};
use alsa::nix::errno::Errno;
use alsa::pcm::{Access, Format, HwParams, State as PcmState, PCM};
use alsa::{Direction, ValueOr};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, instrument, trace, warn};

const LOG_TARGET: &str = "pocket_player::audio::alsa_sink";

struct Job {
    samples: Vec<i16>,
    sample_rate_hz: u32,
    channel_count: u32,
    epoch: u64,
}

/// Shared between a channel handle and its writer thread.
#[derive(Default)]
struct ChannelShared {
    /// Jobs queued or being written.
    active: AtomicUsize,
    /// Bumped by `stop`; jobs from an older epoch are discarded.
    epoch: AtomicU64,
}

struct ChannelWorker {
    jobs: Option<Sender<Job>>,
    recycled: Receiver<Vec<i16>>,
    shared: Arc<ChannelShared>,
    handle: Option<JoinHandle<()>>,
}

/// Sink that renders every channel on the same ALSA device.
pub struct AlsaSink {
    device: String,
    queue_depth: usize,
    workers: Vec<Option<ChannelWorker>>,
}

impl AlsaSink {
    /// Checks that `device` can be opened for playback. Writer threads start lazily.
    #[instrument]
    pub fn new(device: &str, queue_depth: usize) -> Result<Self, AudioError> {
        let probe = open_pcm(device)?;
        drop(probe);
        info!(target: LOG_TARGET, "ALSA device '{}' available.", device);
        Ok(Self {
            device: device.to_string(),
            queue_depth: queue_depth.max(1),
            workers: (0..SINK_CHANNELS).map(|_| None).collect(),
        })
    }

    fn worker(&mut self, channel: u8) -> Option<&mut ChannelWorker> {
        let slot = self.workers.get_mut(usize::from(channel))?;
        if slot.is_none() {
            match spawn_worker(&self.device, channel, self.queue_depth) {
                Ok(worker) => *slot = Some(worker),
                Err(e) => {
                    error!(target: LOG_TARGET, "Cannot start writer for channel {}: {}", channel, e);
                    return None;
                }
            }
        }
        slot.as_mut()
    }
}

impl AudioSink for AlsaSink {
    fn submit(&mut self, samples: &[i16], sample_rate_hz: u32, stereo: bool, channel: u8) -> bool {
        if samples.is_empty() || sample_rate_hz == 0 {
            return false;
        }
        let queue_depth = self.queue_depth;
        let Some(worker) = self.worker(channel) else {
            return false;
        };
        if worker.shared.active.load(Ordering::Acquire) >= queue_depth {
            return false;
        }
        let Some(jobs) = worker.jobs.as_ref() else {
            return false;
        };

        let mut buffer = worker.recycled.try_recv().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(samples);
        let job = Job {
            samples: buffer,
            sample_rate_hz,
            channel_count: if stereo { 2 } else { 1 },
            epoch: worker.shared.epoch.load(Ordering::Acquire),
        };

        worker.shared.active.fetch_add(1, Ordering::AcqRel);
        match jobs.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                worker.shared.active.fetch_sub(1, Ordering::AcqRel);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                worker.shared.active.fetch_sub(1, Ordering::AcqRel);
                warn!(target: LOG_TARGET, "Writer for channel {} has exited.", channel);
                false
            }
        }
    }

    fn active_count(&mut self, channel: u8) -> usize {
        self.workers
            .get(usize::from(channel))
            .and_then(|w| w.as_ref())
            .map_or(0, |w| w.shared.active.load(Ordering::Acquire))
    }

    fn stop(&mut self, channel: u8) {
        if let Some(Some(worker)) = self.workers.get(usize::from(channel)) {
            debug!(target: LOG_TARGET, "Stopping channel {}.", channel);
            worker.shared.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        for worker in self.workers.iter_mut().flatten() {
            worker.shared.epoch.fetch_add(1, Ordering::AcqRel);
            worker.jobs = None;
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!(target: LOG_TARGET, "ALSA writer thread panicked.");
                }
            }
        }
    }
}

fn open_pcm(device: &str) -> Result<PCM, AudioError> {
    let name = CString::new(device)
        .map_err(|e| AudioError::Sink(format!("invalid device name: {}", e)))?;
    Ok(PCM::open(&name, Direction::Playback, false)?)
}

fn spawn_worker(
    device: &str,
    channel: u8,
    queue_depth: usize,
) -> Result<ChannelWorker, AudioError> {
    let (job_tx, job_rx) = bounded::<Job>(queue_depth);
    let (recycle_tx, recycle_rx) = bounded::<Vec<i16>>(queue_depth);
    let shared = Arc::new(ChannelShared::default());

    let mut writer = PcmWriter {
        device: device.to_string(),
        pcm: None,
        format: None,
    };
    let thread_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
        .name(format!("alsa-ch{}", channel))
        .spawn(move || {
            for job in job_rx.iter() {
                if job.epoch == thread_shared.epoch.load(Ordering::Acquire) {
                    if let Err(e) = writer.play(&job, &thread_shared.epoch) {
                        error!(target: LOG_TARGET, "ALSA write failed: {}", e);
                        writer.close();
                    }
                } else {
                    trace!(target: LOG_TARGET, "Discarding stopped job.");
                }
                thread_shared.active.fetch_sub(1, Ordering::AcqRel);
                let _ = recycle_tx.try_send(job.samples);
            }
            writer.close();
        })
        .map_err(|e| AudioError::ResourceCreation(format!("ALSA writer thread: {}", e)))?;

    Ok(ChannelWorker {
        jobs: Some(job_tx),
        recycled: recycle_rx,
        shared,
        handle: Some(handle),
    })
}

/// Owns the PCM handle on the writer thread.
struct PcmWriter {
    device: String,
    pcm: Option<PCM>,
    format: Option<(u32, u32)>,
}

impl PcmWriter {
    fn configure(&mut self, sample_rate_hz: u32, channel_count: u32) -> Result<&PCM, AudioError> {
        if self.format != Some((sample_rate_hz, channel_count)) {
            self.close();
            let pcm = open_pcm(&self.device)?;
            {
                let hwp = HwParams::any(&pcm)?;
                hwp.set_access(Access::RWInterleaved)?;
                hwp.set_format(Format::s16())?;
                hwp.set_channels(channel_count)?;
                hwp.set_rate_near(sample_rate_hz, ValueOr::Nearest)?;
                let actual = hwp.get_rate()?;
                if actual != sample_rate_hz {
                    warn!(target: LOG_TARGET, "ALSA rate negotiation: requested={}, actual={}", sample_rate_hz, actual);
                }
                pcm.hw_params(&hwp)?;

                let swp = pcm.sw_params_current()?;
                let buffer_size = hwp.get_buffer_size()?;
                let period_size = hwp.get_period_size()?;
                swp.set_start_threshold(buffer_size - period_size)?;
                pcm.sw_params(&swp)?;
                debug!(target: LOG_TARGET, "ALSA configured: {} Hz, {} ch (buffer={}, period={}).",
                    sample_rate_hz, channel_count, buffer_size, period_size);
            }
            self.pcm = Some(pcm);
            self.format = Some((sample_rate_hz, channel_count));
        }
        self.pcm
            .as_ref()
            .ok_or_else(|| AudioError::Sink("PCM not open".to_string()))
    }

    /// Writes the whole job unless its epoch goes stale, in which case queued audio is dropped.
    fn play(&mut self, job: &Job, epoch: &AtomicU64) -> Result<(), AudioError> {
        let channels = job.channel_count as usize;
        let pcm = self.configure(job.sample_rate_hz, job.channel_count)?;
        let io = pcm.io_i16()?;
        let total_frames = job.samples.len() / channels;
        let mut offset = 0;

        while offset < total_frames {
            if epoch.load(Ordering::Acquire) != job.epoch {
                if let Err(e) = pcm.drop() {
                    warn!(target: LOG_TARGET, "Error dropping ALSA buffer (ignored): {}", e);
                }
                pcm.prepare()?;
                return Ok(());
            }
            match io.writei(&job.samples[offset * channels..total_frames * channels]) {
                Ok(frames) => offset += frames,
                Err(e) if e.errno() == Errno::EPIPE => {
                    warn!(target: LOG_TARGET, "ALSA buffer underrun, recovering.");
                    pcm.recover(libc::EPIPE, true)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            if pcm.state() == PcmState::Running {
                if let Err(e) = pcm.drain() {
                    warn!(target: LOG_TARGET, "Error draining ALSA buffer: {}", e);
                }
            }
            debug!(target: LOG_TARGET, "ALSA PCM closed.");
        }
        self.format = None;
    }
}
