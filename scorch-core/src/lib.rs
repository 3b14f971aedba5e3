//! # scorch-core
//!
//! Streaming roast-audio engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! HTTP chunked response → TtsStream → FrameAssembler → DecodedFrame
//!                                                       │        │
//!                                                 text delta   PcmChunk
//!                                                       │        │
//!                                              on_transcript  PlaybackEngine
//!                                                                 │
//!                                                   AudioSink (24 kHz timeline)
//!                                                                 │
//!                                                       cpal output callback
//! ```
//!
//! The read loop suspends on each network chunk; all engine mutation is
//! synchronous within the receiving task. The engine schedules chunks
//! back-to-back on the sink's device clock so irregular network arrivals
//! render as one gapless waveform.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod chunk;
pub mod decode;
pub mod error;
pub mod events;
pub mod playback;
pub mod roast;
pub mod tts;

// Convenience re-exports for downstream crates
pub use chunk::{PcmChunk, SAMPLE_RATE};
pub use decode::{assembler::FrameAssembler, DecodedFrame};
pub use error::ScorchError;
pub use events::{PlaybackState, PlaybackStatusEvent};
pub use playback::{sink::AudioSink, PlaybackEngine};
pub use roast::{RoastClient, RoastIntensity, RoastResponse};
pub use tts::{stream_speech, TtsRequest, TtsStream, Voice};

#[cfg(feature = "audio-cpal")]
pub use playback::sink::CpalSink;
