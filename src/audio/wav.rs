//! RIFF/WAVE header negotiation for the raw PCM path.

use crate::audio::error::AudioError;
use crate::audio::source::{read_full, ByteSource};
use tracing::{debug, trace, warn};

const LOG_TARGET: &str = "pocket_player::audio::wav";

const WAVE_FORMAT_PCM: u16 = 1;
const FMT_MIN_LEN: u32 = 16;

/// Linear PCM layout from the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channel_count: u16,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> usize {
        usize::from(self.channel_count) * usize::from(self.bits_per_sample / 8)
    }
}

/// Everything needed to stream the `data` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: PcmFormat,
    /// Declared byte length of the `data` chunk.
    pub data_len: u64,
}

impl WavHeader {
    pub fn duration_ms(&self) -> u64 {
        let block = self.format.block_align() as u64;
        if block == 0 || self.format.sample_rate_hz == 0 {
            return 0;
        }
        (self.data_len / block) * 1000 / u64::from(self.format.sample_rate_hz)
    }
}

fn truncated(what: &str) -> AudioError {
    AudioError::FormatFailure(format!("truncated header while reading {}", what))
}

fn read_array<const N: usize, S: ByteSource + ?Sized>(
    source: &mut S,
    what: &str,
) -> Result<[u8; N], AudioError> {
    let mut buf = [0u8; N];
    if read_full(source, &mut buf)? != N {
        return Err(truncated(what));
    }
    Ok(buf)
}

fn skip<S: ByteSource + ?Sized>(
    source: &mut S,
    mut count: u64,
    what: &str,
) -> Result<(), AudioError> {
    let mut scratch = [0u8; 256];
    while count > 0 {
        let want = scratch.len().min(count as usize);
        let n = read_full(source, &mut scratch[..want])?;
        if n == 0 {
            return Err(truncated(what));
        }
        count -= n as u64;
    }
    Ok(())
}

fn parse_fmt(body: &[u8; 16]) -> Result<PcmFormat, AudioError> {
    let format_tag = u16::from_le_bytes([body[0], body[1]]);
    let channel_count = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate_hz = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let declared_align = u16::from_le_bytes([body[12], body[13]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    if format_tag != WAVE_FORMAT_PCM {
        return Err(AudioError::FormatFailure(format!("format tag {:#06x} is not linear PCM", format_tag)));
    }
    if !matches!(bits_per_sample, 8 | 16) {
        return Err(AudioError::FormatFailure(format!("{} bits per sample not supported", bits_per_sample)));
    }
    if !matches!(channel_count, 1 | 2) {
        return Err(AudioError::FormatFailure(format!("{} channels not supported", channel_count)));
    }
    if sample_rate_hz == 0 {
        return Err(AudioError::FormatFailure("sample rate is zero".to_string()));
    }

    let format = PcmFormat {
        channel_count,
        sample_rate_hz,
        bits_per_sample,
    };
    if usize::from(declared_align) != format.block_align() {
        warn!(target: LOG_TARGET, "Header block align {} disagrees with computed {}; using computed.",
            declared_align, format.block_align());
    }
    Ok(format)
}

/// Reads the RIFF header up to the start of the sample data.
///
/// On success `source` is positioned on the first data byte. Unknown chunks
/// are skipped by their declared (word-padded) length.
pub fn read_header<S: ByteSource + ?Sized>(source: &mut S) -> Result<WavHeader, AudioError> {
    let riff: [u8; 12] = read_array(source, "RIFF header")?;
    if &riff[0..4] != b"RIFF" {
        return Err(AudioError::FormatFailure("missing RIFF tag".to_string()));
    }
    if &riff[8..12] != b"WAVE" {
        return Err(AudioError::FormatFailure("RIFF form is not WAVE".to_string()));
    }

    let mut format: Option<PcmFormat> = None;
    loop {
        let chunk: [u8; 8] = read_array(source, "chunk header")?;
        let id = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let len = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let padded = u64::from(len) + u64::from(len & 1);
        trace!(target: LOG_TARGET, "Chunk {:?} ({} bytes)", String::from_utf8_lossy(&id), len);

        match &id {
            b"fmt " => {
                if len < FMT_MIN_LEN {
                    return Err(AudioError::FormatFailure(format!("fmt chunk too short ({} bytes)", len)));
                }
                let body: [u8; 16] = read_array(source, "fmt chunk")?;
                format = Some(parse_fmt(&body)?);
                skip(source, padded - u64::from(FMT_MIN_LEN), "fmt chunk")?;
            }
            b"data" => {
                let format = format
                    .ok_or_else(|| AudioError::FormatFailure("data chunk before fmt chunk".to_string()))?;
                let header = WavHeader {
                    format,
                    data_len: u64::from(len),
                };
                debug!(target: LOG_TARGET, "WAV: {} Hz, {} ch, {} bit, {} data bytes",
                    format.sample_rate_hz, format.channel_count, format.bits_per_sample, len);
                return Ok(header);
            }
            _ => skip(source, padded, "unknown chunk")?,
        }
    }
}
