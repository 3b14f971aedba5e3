//! Reader-side frame assembly.
//!
//! Network reads split wire frames at arbitrary byte boundaries, so the
//! read loop cannot decode buffers directly: an event line may arrive as
//! `data: {"tex` in one read and `t":"hello"}\n` in the next. The
//! [`FrameAssembler`] owns that carry-over buffer, sniffs which framing
//! the response uses from its first bytes, and only passes complete
//! frames to the pure decoders in [`super`].

use tracing::debug;

use super::{decode_buffer, decode_event_line, DecodedFrame, RAW_PCM_MIN_BYTES};
use crate::chunk::PcmChunk;

/// Which wire framing the response turned out to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireMode {
    /// Not enough bytes seen yet to decide.
    Detecting,
    /// Newline-delimited `data: {json}` event frames.
    EventLines,
    /// One JSON object spanning the whole body; decoded at end of stream.
    BodyJson,
    /// Raw LE i16 PCM; each read is forwarded as a chunk.
    RawPcm,
}

/// Stateful accumulator turning network reads into decoded frames.
///
/// Push every received buffer through [`push`](Self::push); call
/// [`finish`](Self::finish) exactly once when the stream ends to flush
/// whatever the framing kept buffered (the unterminated last event line,
/// the whole JSON body, or a trailing odd byte's worth of PCM).
#[derive(Debug)]
pub struct FrameAssembler {
    mode: WireMode,
    carry: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            mode: WireMode::Detecting,
            carry: Vec::new(),
        }
    }

    /// Feed one network read; returns every frame it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodedFrame> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.carry.extend_from_slice(bytes);

        if self.mode == WireMode::Detecting {
            self.mode = Self::sniff(&self.carry);
        }

        match self.mode {
            WireMode::Detecting | WireMode::BodyJson => Vec::new(),
            WireMode::EventLines => self.drain_complete_lines(),
            WireMode::RawPcm => self.drain_raw(),
        }
    }

    /// Flush the tail at end of stream.
    pub fn finish(&mut self) -> Option<DecodedFrame> {
        let tail = std::mem::take(&mut self.carry);
        if tail.is_empty() {
            return None;
        }

        let frame = match self.mode {
            // An unterminated final event line is still a complete frame
            // once the stream has ended.
            WireMode::EventLines => std::str::from_utf8(&tail)
                .ok()
                .and_then(decode_event_line)
                .unwrap_or_default(),
            WireMode::RawPcm => {
                debug!(len = tail.len(), "discarding trailing partial sample");
                DecodedFrame::default()
            }
            WireMode::Detecting | WireMode::BodyJson => decode_buffer(&tail),
        };

        if frame.is_empty() {
            None
        } else {
            Some(frame)
        }
    }

    /// Decide the framing from the first bytes of the response.
    ///
    /// Stays undecided on a short ambiguous prefix rather than guessing:
    /// raw PCM is only assumed once the accumulated bytes are too large
    /// to be a truncated text frame.
    fn sniff(buf: &[u8]) -> WireMode {
        let first = buf.iter().position(|b| !b.is_ascii_whitespace());
        let head = match first {
            Some(i) => &buf[i..],
            None => return WireMode::Detecting,
        };

        if head.starts_with(b"data:") {
            WireMode::EventLines
        } else if head.starts_with(b"{") {
            WireMode::BodyJson
        } else if buf.len() >= RAW_PCM_MIN_BYTES {
            WireMode::RawPcm
        } else {
            WireMode::Detecting
        }
    }

    fn drain_complete_lines(&mut self) -> Vec<DecodedFrame> {
        let mut frames = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(frame) = decode_event_line(text) {
                        frames.push(frame);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "skipping non-UTF-8 event line");
                }
            }
        }
        frames
    }

    fn drain_raw(&mut self) -> Vec<DecodedFrame> {
        // Keep a trailing odd byte so samples are never split across reads.
        let even_len = self.carry.len() & !1;
        if even_len == 0 {
            return Vec::new();
        }
        let bytes: Vec<u8> = self.carry.drain(..even_len).collect();
        vec![DecodedFrame {
            text_delta: None,
            audio: Some(PcmChunk::from_le_bytes(&bytes)),
        }]
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_event_line_split_across_two_reads() {
        let mut asm = FrameAssembler::new();

        let first = asm.push(br#"data: {"tex"#);
        assert!(first.is_empty(), "no complete line yet");

        let second = asm.push(b"t\":\"hello\"}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].text_delta.as_deref(), Some("hello"));

        assert!(asm.finish().is_none(), "nothing buffered after the line");
    }

    #[test]
    fn multiple_lines_in_one_read() {
        let mut asm = FrameAssembler::new();
        let frames = asm.push(b"data: {\"text\":\"a\"}\ndata: {\"text\":\"b\"}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].text_delta.as_deref(), Some("a"));
        assert_eq!(frames[1].text_delta.as_deref(), Some("b"));
    }

    #[test]
    fn malformed_middle_line_is_skipped() {
        let mut asm = FrameAssembler::new();
        let frames = asm.push(
            b"data: {\"text\":\"one\"}\ndata: {broken\ndata: {\"text\":\"three\"}\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].text_delta.as_deref(), Some("one"));
        assert_eq!(frames[1].text_delta.as_deref(), Some("three"));
    }

    #[test]
    fn unterminated_final_line_flushes_on_finish() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(b"data: {\"text\":\"tail\"}").is_empty());
        let frame = asm.finish().expect("flushed frame");
        assert_eq!(frame.text_delta.as_deref(), Some("tail"));
    }

    #[test]
    fn whole_body_json_decodes_only_at_finish() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(br#"{"text":"all","#).is_empty());
        assert!(asm.push(br#""audio":[7,8]}"#).is_empty());
        let frame = asm.finish().expect("body frame");
        assert_eq!(frame.text_delta.as_deref(), Some("all"));
        assert_eq!(frame.audio.expect("audio").samples(), &[7, 8]);
    }

    #[test]
    fn raw_pcm_streams_per_read_with_odd_byte_carry() {
        let mut asm = FrameAssembler::new();

        // 513 bytes of non-text data: enough to sniff raw mode, odd length.
        let mut first = vec![0x80u8; RAW_PCM_MIN_BYTES];
        first.push(0x01);
        let frames = asm.push(&first);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].audio.as_ref().expect("audio").len(),
            RAW_PCM_MIN_BYTES / 2
        );

        // The held-back odd byte pairs with the next read's first byte.
        let frames = asm.push(&[0x02]);
        assert_eq!(frames.len(), 1);
        let chunk = frames[0].audio.as_ref().expect("audio");
        assert_eq!(chunk.samples(), &[i16::from_le_bytes([0x01, 0x02])]);

        // A lone trailing byte is dropped at end of stream.
        assert!(asm.push(&[0x09]).is_empty());
        assert!(asm.finish().is_none());
    }

    #[test]
    fn short_binary_prefix_does_not_trigger_raw_mode() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(&[0x80, 0x81]).is_empty());
        // Still undecided; a tiny unparseable tail is dropped at finish.
        assert!(asm.finish().is_none());
    }

    #[test]
    fn empty_reads_are_ignored() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(&[]).is_empty());
        assert!(asm.finish().is_none());
    }
}
