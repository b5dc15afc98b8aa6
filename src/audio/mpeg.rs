//! MPEG audio frame delimitation plus symphonia-backed decoding.
//!
//! Frames are located by parsing the 4-byte MPEG audio header. Only complete
//! frames followed by another frame (or a tag, or the end of the window) are
//! handed to symphonia. Everything else reports zero consumed bytes so the
//! pipeline can resynchronise one byte at a time.

use crate::audio::frame_decoder::{DecodedFrame, FrameDecoder};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_MP1, CODEC_TYPE_MP2,
    CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, trace, warn};

const LOG_TARGET: &str = "pocket_player::audio::mpeg";

const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_TAG_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegLayer {
    Layer1,
    Layer2,
    Layer3,
}

impl MpegLayer {
    fn codec(self) -> CodecType {
        match self {
            MpegLayer::Layer1 => CODEC_TYPE_MP1,
            MpegLayer::Layer2 => CODEC_TYPE_MP2,
            MpegLayer::Layer3 => CODEC_TYPE_MP3,
        }
    }
}

// Bitrates in kbps, indexed by the 4-bit bitrate field. Index 0 (free format) is unsupported.
const BITRATE_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATE_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATE_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATE_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATE_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];
const SAMPLE_RATES_V2: [u32; 3] = [22050, 24000, 16000];
const SAMPLE_RATES_V25: [u32; 3] = [11025, 12000, 8000];

/// A parsed MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub padding: bool,
    pub channel_count: u16,
    /// Whole frame length in bytes, header included.
    pub frame_len: usize,
}

impl FrameHeader {
    /// Parses the header at the start of `bytes`. `None` if it is not a usable header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0x03 {
            1 => MpegLayer::Layer3,
            2 => MpegLayer::Layer2,
            3 => MpegLayer::Layer1,
            _ => return None,
        };
        let bitrate_index = usize::from(bytes[2] >> 4);
        let rate_index = usize::from((bytes[2] >> 2) & 0x03);
        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return None;
        }
        let table = match (version, layer) {
            (MpegVersion::Mpeg1, MpegLayer::Layer1) => &BITRATE_V1_L1,
            (MpegVersion::Mpeg1, MpegLayer::Layer2) => &BITRATE_V1_L2,
            (MpegVersion::Mpeg1, MpegLayer::Layer3) => &BITRATE_V1_L3,
            (_, MpegLayer::Layer1) => &BITRATE_V2_L1,
            _ => &BITRATE_V2_L23,
        };
        let bitrate_kbps = table[bitrate_index];
        let sample_rate_hz = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_V2[rate_index],
            MpegVersion::Mpeg25 => SAMPLE_RATES_V25[rate_index],
        };
        let padding = (bytes[2] >> 1) & 0x01 == 1;
        let channel_count = if bytes[3] >> 6 == 0x03 { 1 } else { 2 };

        let bitrate = bitrate_kbps as usize * 1000;
        let rate = sample_rate_hz as usize;
        let pad = usize::from(padding);
        let frame_len = match (layer, version) {
            (MpegLayer::Layer1, _) => (12 * bitrate / rate + pad) * 4,
            (MpegLayer::Layer2, _) | (MpegLayer::Layer3, MpegVersion::Mpeg1) => {
                144 * bitrate / rate + pad
            }
            (MpegLayer::Layer3, _) => 72 * bitrate / rate + pad,
        };

        Some(Self {
            version,
            layer,
            bitrate_kbps,
            sample_rate_hz,
            padding,
            channel_count,
            frame_len,
        })
    }

    /// Samples per channel carried by one frame.
    pub fn samples_per_channel(&self) -> usize {
        match (self.layer, self.version) {
            (MpegLayer::Layer1, _) => 384,
            (MpegLayer::Layer2, _) | (MpegLayer::Layer3, MpegVersion::Mpeg1) => 1152,
            (MpegLayer::Layer3, _) => 576,
        }
    }

    fn same_stream(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate_hz == other.sample_rate_hz
    }
}

/// Total length of an ID3v2 tag starting at `bytes[0]`, if `bytes` begins with one.
pub fn id3v2_tag_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < ID3V2_HEADER_LEN || &bytes[..3] != b"ID3" {
        return None;
    }
    let size_bytes = &bytes[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(*b));
    let footer = if bytes[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

fn starts_with_tag(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ID3") || bytes.starts_with(b"TAG")
}

/// `FrameDecoder` for MPEG-1/2/2.5 audio streams.
pub struct MpegFrameDecoder {
    decoder: Option<Box<dyn Decoder>>,
    /// Layer, rate and channel count the current decoder was built for.
    active: Option<(MpegLayer, u32, u16)>,
    scratch: Option<SampleBuffer<i16>>,
    /// Bytes of an ID3v2 tag that did not fit in the previous window.
    pending_skip: usize,
    frames_decoded: u64,
}

impl MpegFrameDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            active: None,
            scratch: None,
            pending_skip: 0,
            frames_decoded: 0,
        }
    }

    /// Makes sure a symphonia decoder matching `header` exists. False if none can be built.
    fn ensure_decoder(&mut self, header: &FrameHeader) -> bool {
        let key = (header.layer, header.sample_rate_hz, header.channel_count);
        if self.active == Some(key) {
            return self.decoder.is_some();
        }
        self.active = Some(key);
        let mut params = CodecParameters::new();
        params
            .for_codec(header.layer.codec())
            .with_sample_rate(header.sample_rate_hz);
        let codecs = symphonia::default::get_codecs();
        self.decoder = match codecs.make(&params, &DecoderOptions::default()) {
            Ok(decoder) => {
                debug!(target: LOG_TARGET, "Decoder created for {:?} {:?}, {} Hz, {} ch",
                    header.version, header.layer, header.sample_rate_hz, header.channel_count);
                Some(decoder)
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "No decoder for {:?}: {}. Frames will be skipped.", header.layer, e);
                None
            }
        };
        self.decoder.is_some()
    }

    fn decode_frame(
        &mut self,
        frame: &[u8],
        header: FrameHeader,
        output: &mut [i16],
    ) -> DecodedFrame {
        let consumed = frame.len();
        if !self.ensure_decoder(&header) {
            return DecodedFrame::silent(consumed);
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return DecodedFrame::silent(consumed);
        };

        let duration = header.samples_per_channel() as u64;
        let packet = Packet::new_from_slice(0, self.frames_decoded, duration, frame);
        self.frames_decoded += 1;

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frames = decoded.frames();
                let channels = spec.channels.count();
                if frames == 0 || !(1..=2).contains(&channels) {
                    return DecodedFrame::silent(consumed);
                }
                let needed = frames * channels;
                if needed > output.len() {
                    warn!(target: LOG_TARGET, "Frame of {} samples exceeds chunk capacity {}, skipped.", needed, output.len());
                    return DecodedFrame::silent(consumed);
                }
                if self.scratch.as_ref().map_or(true, |s| s.capacity() < needed) {
                    self.scratch = None;
                }
                let scratch = self
                    .scratch
                    .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
                scratch.copy_interleaved_ref(decoded);
                let samples = scratch.samples();
                output[..samples.len()].copy_from_slice(samples);
                DecodedFrame {
                    consumed_bytes: consumed,
                    produced_samples: samples.len() / channels,
                    sample_rate_hz: spec.rate,
                    channel_count: channels as u16,
                }
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                // Typical for the first frames of a stream while the bit reservoir fills.
                debug!(target: LOG_TARGET, "Frame not decodable ({}), skipping.", reason);
                DecodedFrame::silent(consumed)
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                DecodedFrame::silent(consumed)
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Unexpected decoder error: {}", e);
                DecodedFrame::silent(consumed)
            }
        }
    }
}

impl Default for MpegFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for MpegFrameDecoder {
    fn decode(&mut self, input: &[u8], output: &mut [i16]) -> DecodedFrame {
        if input.is_empty() {
            return DecodedFrame::desync();
        }

        if self.pending_skip > 0 {
            let n = self.pending_skip.min(input.len());
            self.pending_skip -= n;
            return DecodedFrame::silent(n);
        }

        if input.starts_with(b"ID3") {
            return match id3v2_tag_len(input) {
                Some(total) => {
                    let n = total.min(input.len());
                    self.pending_skip = total - n;
                    debug!(target: LOG_TARGET, "Skipping ID3v2 tag of {} bytes.", total);
                    DecodedFrame::silent(n)
                }
                None => DecodedFrame::desync(),
            };
        }

        if input.starts_with(b"TAG") && input.len() >= ID3V1_TAG_LEN {
            debug!(target: LOG_TARGET, "Skipping ID3v1 tag.");
            return DecodedFrame::silent(ID3V1_TAG_LEN);
        }

        let Some(header) = FrameHeader::parse(input) else {
            return DecodedFrame::desync();
        };
        if header.frame_len < 4 || header.frame_len > input.len() {
            trace!(target: LOG_TARGET, "Incomplete frame: need {} bytes, have {}.", header.frame_len, input.len());
            return DecodedFrame::desync();
        }

        // A real frame is followed by another frame of the same stream, a tag, or the end of data.
        let next = &input[header.frame_len..];
        if next.len() >= 4 && !starts_with_tag(next) {
            let follows = FrameHeader::parse(next).map_or(false, |n| header.same_stream(&n));
            if !follows {
                return DecodedFrame::desync();
            }
        }

        self.decode_frame(&input[..header.frame_len], header, output)
    }
}
