use std::error::Error;
use std::io;
use std::path::PathBuf;

/// Error types specific to audio playback.
///
/// Only failures that prevent playback from starting (or a sink from being
/// opened) are errors. Decoder desync, starvation and cancellation are normal
/// pipeline outcomes and are reported through `PlaybackReport` instead.
#[derive(Debug)]
pub enum AudioError {
    /// The file could not be opened or read at all.
    OpenFailure { path: PathBuf, source: io::Error },
    /// Bad container header or an encoding the player does not handle.
    FormatFailure(String),
    /// The decode thread (or another pipeline resource) could not be created.
    ResourceCreation(String),
    /// Pipeline configuration rejected before start.
    InvalidConfig(String),
    /// The audio output could not be opened or configured.
    Sink(String),
    Io(io::Error),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::OpenFailure { path, source } => {
                write!(f, "Cannot open {}: {}", path.display(), source)
            }
            AudioError::FormatFailure(s) => write!(f, "Unsupported format: {}", s),
            AudioError::ResourceCreation(s) => write!(f, "Resource creation failed: {}", s),
            AudioError::InvalidConfig(s) => write!(f, "Invalid pipeline configuration: {}", s),
            AudioError::Sink(s) => write!(f, "Audio sink error: {}", s),
            AudioError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for AudioError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AudioError::OpenFailure { source, .. } => Some(source),
            AudioError::Io(e) => Some(e),
            _ => None,
        }
    }
}

// --- From Implementations for AudioError ---

impl From<io::Error> for AudioError {
    fn from(e: io::Error) -> Self {
        AudioError::Io(e)
    }
}

#[cfg(feature = "alsa")]
impl From<alsa::Error> for AudioError {
    fn from(e: alsa::Error) -> Self {
        AudioError::Sink(e.to_string())
    }
}
