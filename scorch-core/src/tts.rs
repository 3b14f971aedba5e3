//! Streaming text-to-speech client.
//!
//! Opens one chunked HTTP response per utterance and turns it into
//! transcript deltas + PCM chunks:
//!
//! ```text
//! TtsStream::open ──► Response::chunk() loop ──► FrameAssembler
//!                                                    │
//!                                  DecodedFrame { text_delta, audio }
//!                                        │                │
//!                                 on_transcript      PlaybackEngine::add_chunk
//! ```
//!
//! Each `chunk()` call suspends the task until bytes arrive — the read
//! loop interleaves with transport-control handling on the same event
//! loop. There is no mid-read cancellation: the loop runs to end of
//! stream or error, and `PlaybackEngine::reset()` is the cancellation
//! point for audio.
//!
//! The transcript callback receives the *cumulative* text each time a
//! delta decodes. That is the contract — not an echo of the prompt.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::chunk::PcmChunk;
use crate::decode::{assembler::FrameAssembler, DecodedFrame};
use crate::error::{Result, ScorchError};

/// Model identifier the backend routes TTS generations to.
pub const DEFAULT_TTS_MODEL: &str = "openai-audio";

/// Backend input limit; longer prompts are truncated before the request.
pub const MAX_PROMPT_CHARS: usize = 4_000;

/// Voices the TTS backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Echo,
    Fable,
    Onyx,
    #[default]
    Nova,
    Shimmer,
}

impl Voice {
    pub const ALL: [Voice; 6] = [
        Voice::Alloy,
        Voice::Echo,
        Voice::Fable,
        Voice::Onyx,
        Voice::Nova,
        Voice::Shimmer,
    ];

    /// Wire identifier.
    pub fn id(self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }

    /// Human-readable label for pickers.
    pub fn label(self) -> &'static str {
        match self {
            Voice::Alloy => "Alloy (Neutral)",
            Voice::Echo => "Echo (Male)",
            Voice::Fable => "Fable (Male)",
            Voice::Onyx => "Onyx (Male)",
            Voice::Nova => "Nova (Female)",
            Voice::Shimmer => "Shimmer (Female)",
        }
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.id() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown voice '{s}'"))
    }
}

/// Parameters for one streamed utterance.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub prompt: String,
    pub voice: Voice,
    pub model: String,
}

impl TtsRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            voice: Voice::default(),
            model: DEFAULT_TTS_MODEL.to_string(),
        }
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    voice: &'a str,
    messages: [WireMessage<'a>; 1],
    stream: bool,
    seed: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// An in-progress streamed utterance.
pub struct TtsStream {
    response: reqwest::Response,
    assembler: FrameAssembler,
    done: bool,
}

impl TtsStream {
    /// Open the streaming response.
    ///
    /// # Errors
    /// `ScorchError::Transport` on a non-success status — fatal to this
    /// generation attempt, not retried here.
    pub async fn open(client: &reqwest::Client, base_url: &str, request: &TtsRequest) -> Result<Self> {
        let prompt = truncate_prompt(&request.prompt);
        let seed = rand::thread_rng().gen_range(0..1_000_000);
        let body = WireRequest {
            model: &request.model,
            voice: request.voice.id(),
            messages: [WireMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
            seed,
        };

        info!(voice = %request.voice, model = %request.model, prompt_chars = prompt.len(), "opening TTS stream");

        let response = client.post(base_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScorchError::Transport {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Self {
            response,
            assembler: FrameAssembler::new(),
            done: false,
        })
    }

    /// Await the next network read and return the frames it completed.
    ///
    /// Returns `Ok(None)` once after the stream ends (any buffered tail
    /// is flushed into the final `Ok(Some(..))` batch first).
    pub async fn next_frames(&mut self) -> Result<Option<Vec<DecodedFrame>>> {
        if self.done {
            return Ok(None);
        }

        match self.response.chunk().await? {
            Some(bytes) => Ok(Some(self.assembler.push(&bytes))),
            None => {
                self.done = true;
                match self.assembler.finish() {
                    Some(frame) => Ok(Some(vec![frame])),
                    None => Ok(None),
                }
            }
        }
    }
}

/// Run a whole utterance through callbacks.
///
/// `on_transcript` receives the cumulative transcript after every decoded
/// delta; `on_chunk` receives PCM chunks in arrival order. Returns the
/// final transcript.
pub async fn stream_speech(
    client: &reqwest::Client,
    base_url: &str,
    request: &TtsRequest,
    mut on_transcript: impl FnMut(&str),
    mut on_chunk: impl FnMut(PcmChunk),
) -> Result<String> {
    let mut stream = TtsStream::open(client, base_url, request).await?;
    let mut transcript = String::new();

    while let Some(frames) = stream.next_frames().await? {
        for frame in frames {
            if let Some(delta) = frame.text_delta {
                if !delta.is_empty() {
                    transcript.push_str(&delta);
                    on_transcript(&transcript);
                }
            }
            if let Some(chunk) = frame.audio {
                debug!(samples = chunk.len(), "audio chunk decoded");
                on_chunk(chunk);
            }
        }
    }

    info!(transcript_chars = transcript.len(), "TTS stream complete");
    Ok(transcript)
}

/// Cap the prompt at the backend limit, respecting char boundaries.
fn truncate_prompt(prompt: &str) -> &str {
    if prompt.chars().count() <= MAX_PROMPT_CHARS {
        return prompt;
    }
    let end = prompt
        .char_indices()
        .nth(MAX_PROMPT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(prompt.len());
    &prompt[..end]
}
