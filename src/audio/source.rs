use crate::audio::error::AudioError;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOG_TARGET: &str = "pocket_player::audio::source";

/// Sequential byte reader feeding the decode task.
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the underlying handle. Reads after close return EOF.
    fn close(&mut self);
}

/// Reads until `buf` is full or the source hits EOF. Returns the bytes read.
pub fn read_full<S: ByteSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A file on the local filesystem.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let open_failure = |source| AudioError::OpenFailure {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_failure)?;
        let len = file.metadata().map_err(open_failure)?.len();
        debug!(target: LOG_TARGET, "Opened {} ({} bytes)", path.display(), len);
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            len,
        })
    }

    /// Size of the file when it was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) if !buf.is_empty() => file.read(buf),
            _ => Ok(0),
        }
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(target: LOG_TARGET, "Closed {}", self.path.display());
        }
    }
}

/// In-memory source, mostly for tests and generated audio.
#[derive(Debug, Clone)]
pub struct MemorySource {
    cursor: Cursor<Vec<u8>>,
    closed: bool,
}

impl MemorySource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        self.cursor.read(buf)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
