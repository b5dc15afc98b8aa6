//! Sources the playback loop polls for a stop request.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "pocket_player::audio::cancel";

/// Non-blocking cancellation poll.
pub trait CancellationSource {
    fn poll_cancel_requested(&mut self) -> bool;
}

/// Shareable flag. Clones observe the same request, so a script runner
/// or another thread can interrupt playback it started.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CancellationSource for CancelFlag {
    fn poll_cancel_requested(&mut self) -> bool {
        self.is_requested()
    }
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationSource for NeverCancel {
    fn poll_cancel_requested(&mut self) -> bool {
        false
    }
}

/// A shutdown broadcast: any message, or the sender going away, cancels.
impl CancellationSource for broadcast::Receiver<()> {
    fn poll_cancel_requested(&mut self) -> bool {
        match self.try_recv() {
            Ok(()) => true,
            Err(broadcast::error::TryRecvError::Empty) => false,
            Err(broadcast::error::TryRecvError::Lagged(_))
            | Err(broadcast::error::TryRecvError::Closed) => true,
        }
    }
}

/// Either source cancels. Both are polled every time so neither backs up.
impl<A: CancellationSource, B: CancellationSource> CancellationSource for (A, B) {
    fn poll_cancel_requested(&mut self) -> bool {
        let a = self.0.poll_cancel_requested();
        let b = self.1.poll_cancel_requested();
        a || b
    }
}

impl<T: CancellationSource + ?Sized> CancellationSource for Box<T> {
    fn poll_cancel_requested(&mut self) -> bool {
        (**self).poll_cancel_requested()
    }
}

/// Stops on any key press. Puts the terminal in raw mode for its lifetime.
pub struct KeyboardCancel {
    raw_mode: bool,
    /// Set once a key was seen; later polls keep reporting it.
    latched: bool,
}

impl KeyboardCancel {
    /// Returns `None` when stdin is not a terminal.
    pub fn new() -> Option<Self> {
        if !io::stdin().is_terminal() {
            debug!(target: LOG_TARGET, "stdin is not a terminal, keyboard cancel disabled.");
            return None;
        }
        let raw_mode = match terminal::enable_raw_mode() {
            Ok(()) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, "Could not enable raw mode ({}), keys need Enter.", e);
                false
            }
        };
        Some(Self {
            raw_mode,
            latched: false,
        })
    }
}

impl CancellationSource for KeyboardCancel {
    fn poll_cancel_requested(&mut self) -> bool {
        if self.latched {
            return true;
        }
        while let Ok(true) = event::poll(Duration::ZERO) {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                        info!(target: LOG_TARGET, "Ctrl-C pressed.");
                    } else {
                        info!(target: LOG_TARGET, "Key pressed, stopping playback.");
                    }
                    self.latched = true;
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: LOG_TARGET, "Reading terminal events failed: {}", e);
                    break;
                }
            }
        }
        false
    }
}

impl Drop for KeyboardCancel {
    fn drop(&mut self) {
        if self.raw_mode {
            if let Err(e) = terminal::disable_raw_mode() {
                warn!(target: LOG_TARGET, "Failed to restore terminal mode: {}", e);
            }
        }
    }
}
