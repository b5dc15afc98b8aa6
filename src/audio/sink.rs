use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const LOG_TARGET: &str = "pocket_player::audio::sink";

/// Number of virtual output channels a sink exposes.
pub const SINK_CHANNELS: usize = 8;

/// Where submitted PCM is rendered.
///
/// `submit` borrows the samples only for the duration of the call; a sink
/// that renders asynchronously copies them first.
pub trait AudioSink {
    /// Queues interleaved samples on `channel`. False if the sink refused them.
    fn submit(&mut self, samples: &[i16], sample_rate_hz: u32, stereo: bool, channel: u8) -> bool;

    /// Submissions on `channel` that are queued or still playing.
    fn active_count(&mut self, channel: u8) -> usize;

    /// Drops everything queued on `channel` immediately.
    fn stop(&mut self, channel: u8);
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn submit(&mut self, samples: &[i16], sample_rate_hz: u32, stereo: bool, channel: u8) -> bool {
        (**self).submit(samples, sample_rate_hz, stereo, channel)
    }

    fn active_count(&mut self, channel: u8) -> usize {
        (**self).active_count(channel)
    }

    fn stop(&mut self, channel: u8) {
        (**self).stop(channel)
    }
}

/// Playback time of `sample_count` interleaved samples.
pub fn submission_duration(sample_count: usize, sample_rate_hz: u32, stereo: bool) -> Duration {
    if sample_rate_hz == 0 {
        return Duration::ZERO;
    }
    let frames = (if stereo { sample_count / 2 } else { sample_count }) as u64;
    Duration::from_micros(frames * 1_000_000 / u64::from(sample_rate_hz))
}

/// Software sink that "plays" each submission for its real duration and discards the samples.
///
/// Submissions on a channel play back to back. Used for headless runs.
#[derive(Debug)]
pub struct ClockSink {
    queue_depth: usize,
    channels: Vec<VecDeque<Instant>>,
}

impl ClockSink {
    /// `queue_depth` is how many submissions a channel holds at once (playing + queued).
    pub fn new(queue_depth: usize) -> Self {
        let queue_depth = queue_depth.max(1);
        Self {
            queue_depth,
            channels: (0..SINK_CHANNELS)
                .map(|_| VecDeque::with_capacity(queue_depth))
                .collect(),
        }
    }

    fn prune(queue: &mut VecDeque<Instant>, now: Instant) {
        while queue.front().map_or(false, |end| *end <= now) {
            queue.pop_front();
        }
    }
}

impl AudioSink for ClockSink {
    fn submit(&mut self, samples: &[i16], sample_rate_hz: u32, stereo: bool, channel: u8) -> bool {
        let Some(queue) = self.channels.get_mut(usize::from(channel)) else {
            return false;
        };
        let now = Instant::now();
        Self::prune(queue, now);
        if samples.is_empty() || queue.len() >= self.queue_depth {
            return false;
        }
        let start = queue.back().copied().map_or(now, |end| end.max(now));
        let end = start + submission_duration(samples.len(), sample_rate_hz, stereo);
        queue.push_back(end);
        trace!(target: LOG_TARGET, "Channel {} accepted {} samples, {} active", channel, samples.len(), queue.len());
        true
    }

    fn active_count(&mut self, channel: u8) -> usize {
        match self.channels.get_mut(usize::from(channel)) {
            Some(queue) => {
                Self::prune(queue, Instant::now());
                queue.len()
            }
            None => 0,
        }
    }

    fn stop(&mut self, channel: u8) {
        if let Some(queue) = self.channels.get_mut(usize::from(channel)) {
            debug!(target: LOG_TARGET, "Stopping channel {}, dropping {} submissions", channel, queue.len());
            queue.clear();
        }
    }
}
