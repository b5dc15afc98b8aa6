//! Decode-ahead audio pipeline: a background task fills a fixed pool of PCM
//! chunks while the foreground loop feeds them to a sink.

#[cfg(feature = "alsa")]
pub mod alsa_sink;
pub mod cancel;
pub mod decode_task;
pub mod error;
pub mod frame_decoder;
pub mod handoff;
pub mod mpeg;
pub mod pipeline;
mod playback;
pub mod pool;
pub mod ring;
pub mod sample_converter;
pub mod sink;
pub mod source;
pub mod state;
pub mod wav;

#[cfg(feature = "alsa")]
pub use alsa_sink::AlsaSink;
pub use cancel::{CancelFlag, CancellationSource, KeyboardCancel, NeverCancel};
pub use decode_task::{ChunkFiller, CompressedFiller, FillStep, RawPcmFiller};
pub use error::AudioError;
pub use frame_decoder::{DecodedFrame, FrameDecoder};
pub use pipeline::{Pipeline, PipelineConfig, TeardownReport};
pub use playback::*;
pub use pool::{BufferPool, PcmChunk, MAX_SAMPLES_PER_FRAME};
pub use sink::{AudioSink, ClockSink};
pub use source::{ByteSource, FileSource, MemorySource};
