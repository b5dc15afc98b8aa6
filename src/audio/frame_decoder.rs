/// Result of one decode call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Bytes taken from the front of the input. Zero means no frame could be found.
    pub consumed_bytes: usize,
    /// Per-channel samples written to the output buffer.
    pub produced_samples: usize,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
}

impl DecodedFrame {
    /// Nothing recognised at the start of the input.
    pub const fn desync() -> Self {
        Self {
            consumed_bytes: 0,
            produced_samples: 0,
            sample_rate_hz: 0,
            channel_count: 0,
        }
    }

    /// A frame was consumed but carried no audio (tag, metadata, warmup).
    pub const fn silent(consumed_bytes: usize) -> Self {
        Self {
            consumed_bytes,
            produced_samples: 0,
            sample_rate_hz: 0,
            channel_count: 0,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.produced_samples > 0 && self.sample_rate_hz > 0 && matches!(self.channel_count, 1 | 2)
    }
}

/// Turns a window of compressed bytes into zero or more interleaved S16 samples.
///
/// Implementations may keep internal state across calls (bit reservoirs,
/// partially skipped tags) but must never read past `input`.
pub trait FrameDecoder: Send {
    fn decode(&mut self, input: &[u8], output: &mut [i16]) -> DecodedFrame;
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn decode(&mut self, input: &[u8], output: &mut [i16]) -> DecodedFrame {
        (**self).decode(input, output)
    }
}
