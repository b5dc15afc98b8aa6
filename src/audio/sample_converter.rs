//! Raw PCM byte layouts to interleaved S16.

use tracing::trace;

const LOG_TARGET: &str = "pocket_player::audio::sample_converter";

/// Unsigned 8-bit sample (bias 128) to signed 16-bit.
#[inline]
pub fn u8_to_s16(sample: u8) -> i16 {
    (i16::from(sample) - 128) << 8
}

/// Converts unsigned 8-bit PCM bytes into `out`. Returns samples written.
pub fn convert_u8_to_s16(input: &[u8], out: &mut [i16]) -> usize {
    let n = input.len().min(out.len());
    for (dst, src) in out[..n].iter_mut().zip(&input[..n]) {
        *dst = u8_to_s16(*src);
    }
    n
}

/// Converts little-endian signed 16-bit PCM bytes into `out`. A trailing odd byte is ignored.
pub fn convert_s16le_to_s16(input: &[u8], out: &mut [i16]) -> usize {
    let n = (input.len() / 2).min(out.len());
    for (dst, pair) in out[..n].iter_mut().zip(input.chunks_exact(2)) {
        *dst = i16::from_le_bytes([pair[0], pair[1]]);
    }
    n
}

/// Dispatches on sample width. Returns samples written, or 0 for unsupported widths.
pub fn convert_pcm_to_s16(input: &[u8], bits_per_sample: u16, out: &mut [i16]) -> usize {
    let written = match bits_per_sample {
        8 => convert_u8_to_s16(input, out),
        16 => convert_s16le_to_s16(input, out),
        _ => 0,
    };
    trace!(target: LOG_TARGET, "Converted {} bytes of {}-bit PCM into {} samples", input.len(), bits_per_sample, written);
    written
}
