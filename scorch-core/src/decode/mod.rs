//! Stream chunk decoding.
//!
//! The backend streams one utterance as a chunked HTTP response that
//! interleaves transcript text and raw PCM audio. Three wire framings are
//! supported:
//!
//! 1. Newline-delimited event frames (`data: {json}`), each carrying a
//!    `text` delta and/or a base64-encoded `audio` payload.
//! 2. Whole-body JSON with `text` and/or `audio` (numeric sample array).
//! 3. Raw little-endian 16-bit PCM, when the body is not parseable as
//!    text/JSON and its byte length plausibly is audio.
//!
//! Functions in this module are pure: one complete frame (or buffer) in,
//! zero-or-one [`DecodedFrame`] out. Network reads split frames at
//! arbitrary byte boundaries, so the carry-over state lives in the
//! reader-side [`assembler::FrameAssembler`], which only hands complete
//! frames down here.
//!
//! A malformed frame is skipped with a log — it never aborts the stream.

pub mod assembler;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::debug;

use crate::chunk::PcmChunk;

/// Marker prefixing server-sent event frames.
const EVENT_MARKER: &str = "data:";

/// Terminal sentinel some backends append after the last event frame.
const DONE_SENTINEL: &str = "[DONE]";

/// Minimum byte length at which an unparseable buffer is plausibly raw
/// PCM rather than a truncated text frame (≈ 10.7 ms at 24 kHz).
pub const RAW_PCM_MIN_BYTES: usize = 512;

/// What one decoded frame contained. Both fields are independent — a
/// frame may carry text, audio, both, or (rarely) neither.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    /// Incremental transcript text.
    pub text_delta: Option<String>,
    /// Decoded PCM samples.
    pub audio: Option<PcmChunk>,
}

impl DecodedFrame {
    pub fn is_empty(&self) -> bool {
        self.text_delta.is_none() && self.audio.is_none()
    }
}

/// Wire payload shared by the event-frame and whole-body framings.
///
/// The audio field is either a base64 string (event frames) or a plain
/// sample array (whole-body responses).
#[derive(Debug, Deserialize)]
struct WirePayload {
    text: Option<String>,
    audio: Option<AudioPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudioPayload {
    Base64(String),
    Samples(Vec<i16>),
}

/// Decode one complete event line (framing 1).
///
/// Returns `None` for blank lines, the `[DONE]` sentinel, lines without a
/// recognizable payload, and malformed JSON (skipped, logged).
pub fn decode_event_line(line: &str) -> Option<DecodedFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let payload = match trimmed.strip_prefix(EVENT_MARKER) {
        Some(rest) => rest.trim_start(),
        // A complete line that is itself a JSON object is accepted too —
        // some backends omit the marker on the final frame.
        None if trimmed.starts_with('{') => trimmed,
        None => {
            debug!(line_len = trimmed.len(), "skipping non-event line");
            return None;
        }
    };

    if payload == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str::<WirePayload>(payload) {
        Ok(wire) => frame_from_payload(wire),
        Err(e) => {
            debug!(error = %e, "skipping malformed event frame");
            None
        }
    }
}

/// Decode a whole response body (framings 2 and 3).
///
/// Tries JSON first; falls back to raw PCM only when JSON parsing failed
/// AND the byte length strongly suggests audio (even, non-trivially
/// sized). Empty buffers decode to an empty frame without error.
pub fn decode_buffer(buf: &[u8]) -> DecodedFrame {
    if buf.is_empty() {
        return DecodedFrame::default();
    }

    if let Ok(wire) = serde_json::from_slice::<WirePayload>(buf) {
        return frame_from_payload(wire).unwrap_or_default();
    }

    if buf.len() % 2 == 0 && buf.len() >= RAW_PCM_MIN_BYTES {
        return DecodedFrame {
            text_delta: None,
            audio: Some(PcmChunk::from_le_bytes(buf)),
        };
    }

    debug!(len = buf.len(), "dropping undecodable buffer");
    DecodedFrame::default()
}

fn frame_from_payload(wire: WirePayload) -> Option<DecodedFrame> {
    let audio = match wire.audio {
        Some(AudioPayload::Base64(encoded)) => match BASE64.decode(encoded.as_bytes()) {
            Ok(bytes) => {
                if bytes.len() % 2 != 0 {
                    debug!(len = bytes.len(), "audio payload has odd byte length");
                }
                Some(PcmChunk::from_le_bytes(&bytes))
            }
            Err(e) => {
                debug!(error = %e, "skipping frame with undecodable audio payload");
                None
            }
        },
        Some(AudioPayload::Samples(samples)) => Some(PcmChunk::new(samples)),
        None => None,
    };

    let frame = DecodedFrame {
        text_delta: wire.text,
        audio,
    };
    if frame.is_empty() {
        None
    } else {
        Some(frame)
    }
}
