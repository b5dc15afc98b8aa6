//! Bounded index queues between the decode task and the playback loop.
//!
//! Slot indices are the only thing that crosses threads. Both queues have the
//! same capacity as the pool, so a push can never find the queue full.

use crate::audio::state::PipelineState;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::{trace, warn};

const LOG_TARGET: &str = "pocket_player::audio::handoff";

/// Decode-task side: takes free slots, publishes ready ones.
#[derive(Debug)]
pub struct DecoderEnd {
    free_rx: Receiver<usize>,
    free_tx: Sender<usize>,
    ready_tx: Sender<usize>,
}

/// Playback-loop side: takes ready slots, recycles finished ones. Never blocks.
#[derive(Debug)]
pub struct PlaybackEnd {
    ready_rx: Receiver<usize>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

/// Creates both queue ends and seeds the free queue with `0..slot_count`.
pub fn slot_queues(slot_count: usize) -> (DecoderEnd, PlaybackEnd) {
    let (free_tx, free_rx) = bounded(slot_count);
    let (ready_tx, ready_rx) = bounded(slot_count);
    for index in 0..slot_count {
        // Capacity equals slot_count, so seeding cannot fail.
        let _ = free_tx.try_send(index);
    }
    (
        DecoderEnd {
            free_rx: free_rx.clone(),
            free_tx: free_tx.clone(),
            ready_tx,
        },
        PlaybackEnd {
            ready_rx,
            free_tx,
            free_rx,
        },
    )
}

impl DecoderEnd {
    /// Blocks until a free slot is available, re-checking `stop` every `poll`.
    ///
    /// Returns `None` once stop is requested (or the playback side is gone).
    /// A slot received after stop was raised goes straight back to the free queue.
    pub fn acquire_free(&self, state: &PipelineState, poll: Duration) -> Option<usize> {
        loop {
            if state.stop_requested() {
                return None;
            }
            match self.free_rx.recv_timeout(poll) {
                Ok(index) => {
                    if state.stop_requested() {
                        self.return_free(index);
                        return None;
                    }
                    return Some(index);
                }
                Err(RecvTimeoutError::Timeout) => {
                    trace!(target: LOG_TARGET, "No free slot within {:?}, polling again.", poll);
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Hands a filled slot to the playback loop. Returns false if the loop is gone.
    pub fn publish_ready(&self, index: usize) -> bool {
        match self.ready_tx.send(index) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, "Ready queue closed, slot {} not published.", e.0);
                false
            }
        }
    }

    /// Gives back a slot the task acquired but will not publish.
    pub fn return_free(&self, index: usize) {
        if let Err(e) = self.free_tx.try_send(index) {
            warn!(target: LOG_TARGET, "Could not return slot {} to the free queue: {}", index, e);
        }
    }
}

impl PlaybackEnd {
    pub fn take_ready(&self) -> Option<usize> {
        match self.ready_rx.try_recv() {
            Ok(index) => Some(index),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn release_free(&self, index: usize) {
        if let Err(e) = self.free_tx.try_send(index) {
            warn!(target: LOG_TARGET, "Could not release slot {}: {}", index, e);
        }
    }

    pub fn ready_len(&self) -> usize {
        self.ready_rx.len()
    }

    pub fn free_len(&self) -> usize {
        self.free_rx.len()
    }

    /// Closes the ready queue while keeping the free queue observable.
    #[cfg(test)]
    pub(crate) fn into_free_receiver(self) -> Receiver<usize> {
        self.free_rx
    }
}
