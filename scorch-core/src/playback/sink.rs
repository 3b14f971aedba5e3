//! Audio output sink.
//!
//! The playback engine talks to the output device through the
//! [`AudioSink`] trait: a device clock plus "schedule these samples at
//! time T". Tests drive the engine with a hand-rolled fake; production
//! uses [`CpalSink`].
//!
//! ## How scheduling works on top of cpal
//!
//! cpal has no "start this buffer at time T" API — it pulls samples from
//! a callback. `CpalSink` therefore keeps a [`Timeline`]: a buffer of
//! 24 kHz frames addressed by absolute frame index. `schedule_at` writes
//! samples at `start_secs * 24_000`; the output callback drains frames in
//! order, emitting silence for unwritten slots, and the count of frames
//! drained *is* the device clock. Where the device does not run at
//! 24 kHz, the callback converts through a pre-allocated
//! [`RateConverter`](super::resample::RateConverter).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). `CpalSink` — and therefore the engine that owns it — must be
//! created, used, and dropped on one thread. Hosts run the engine on a
//! current-thread runtime.

use std::collections::VecDeque;

/// The engine's seam to the output device.
///
/// Implementations own the device resource exclusively; two engines use
/// two sinks, each with its own clock.
pub trait AudioSink: 'static {
    /// Seconds elapsed on the device clock since the sink was created.
    /// Monotonically non-decreasing, advances whether or not audio is
    /// scheduled.
    fn clock(&self) -> f64;

    /// Schedule normalized mono samples (engine rate) to begin at
    /// `start_secs` on the device clock. Samples landing in the past are
    /// clipped, not played late.
    fn schedule_at(&mut self, start_secs: f64, samples: &[f32]);

    /// Silence the output without affecting scheduling or the clock.
    fn set_muted(&mut self, muted: bool);
}

/// Absolute-frame sample buffer shared between the scheduling side and
/// the output callback.
#[derive(Debug)]
pub(crate) struct Timeline {
    /// Scheduled samples; `buffer[0]` is frame `base_frame`.
    buffer: VecDeque<f32>,
    /// Frame index of the next frame the callback will consume — i.e. the
    /// number of frames already rendered. This is the device clock.
    base_frame: u64,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            base_frame: 0,
        }
    }

    /// Frames consumed so far.
    pub(crate) fn frames_rendered(&self) -> u64 {
        self.base_frame
    }

    /// Write samples starting at an absolute frame index.
    ///
    /// Samples that would land before the consumption point are clipped.
    /// Overlapping writes sum (the callback clamps on output).
    pub(crate) fn write_at(&mut self, start_frame: u64, samples: &[f32]) {
        let start = start_frame.max(self.base_frame);
        let skip = (start - start_frame) as usize;
        if skip >= samples.len() {
            return;
        }
        let samples = &samples[skip..];

        let offset = (start - self.base_frame) as usize;
        let end = offset + samples.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0.0);
        }
        for (i, s) in samples.iter().enumerate() {
            self.buffer[offset + i] += *s;
        }
    }

    /// Consume one frame, returning silence where nothing was scheduled.
    /// Always advances the clock.
    pub(crate) fn pop_frame(&mut self) -> f32 {
        self.base_frame += 1;
        self.buffer.pop_front().unwrap_or(0.0)
    }
}

#[cfg(feature = "audio-cpal")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "audio-cpal")]
mod cpal_sink {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, Stream, StreamConfig,
    };
    use parking_lot::Mutex;
    use tracing::{error, info, warn};

    use super::{AudioSink, Timeline};
    use crate::chunk::SAMPLE_RATE;
    use crate::error::{Result, ScorchError};
    use crate::playback::resample::RateConverter;

    /// Engine-rate frames pulled from the timeline per conversion step in
    /// the output callback.
    const PULL_CHUNK: usize = 512;

    /// Output sink backed by a cpal stream on the default (or named)
    /// output device.
    pub struct CpalSink {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        timeline: Arc<Mutex<Timeline>>,
        muted: Arc<AtomicBool>,
    }

    impl CpalSink {
        /// Open the system default output device.
        ///
        /// # Errors
        /// `ScorchError::NoDefaultOutputDevice` when no output device
        /// exists, `ScorchError::AudioStream` if cpal fails to build the
        /// stream. Both are fatal — there is no degraded fallback.
        pub fn open_default() -> Result<Self> {
            Self::open_with_preference(None)
        }

        /// Open an output device by preferred name, otherwise fall back
        /// to the system default.
        pub fn open_with_preference(preferred_device_name: Option<&str>) -> Result<Self> {
            let host = cpal::default_host();
            let mut selected_device = None;

            if let Some(preferred_name) = preferred_device_name {
                match host.output_devices() {
                    Ok(mut devices) => {
                        selected_device = devices.find(|device| {
                            device
                                .name()
                                .map(|name| name == preferred_name)
                                .unwrap_or(false)
                        });
                        if selected_device.is_none() {
                            warn!(
                                "preferred output device '{}' not found, falling back",
                                preferred_name
                            );
                        }
                    }
                    Err(e) => {
                        warn!("failed to list output devices while resolving preference: {e}");
                    }
                }
            }

            let device = match selected_device.or_else(|| host.default_output_device()) {
                Some(d) => d,
                None => return Err(ScorchError::NoDefaultOutputDevice),
            };

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening output device"
            );

            let supported = device
                .default_output_config()
                .map_err(|e| ScorchError::AudioDevice(e.to_string()))?;

            let device_rate = supported.sample_rate().0;
            let channels = supported.channels();

            info!(device_rate, channels, "output config selected");

            let config = StreamConfig {
                channels,
                sample_rate: supported.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };

            let timeline = Arc::new(Mutex::new(Timeline::new()));
            let muted = Arc::new(AtomicBool::new(false));

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    let mut render =
                        CallbackRenderer::new(Arc::clone(&timeline), Arc::clone(&muted), device_rate)?;
                    let ch = channels as usize;
                    device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _info| {
                            render.fill(data.len() / ch);
                            for frame in data.chunks_mut(ch) {
                                let s = render.next_sample();
                                for slot in frame.iter_mut() {
                                    *slot = s;
                                }
                            }
                        },
                        |err| error!("audio output stream error: {err}"),
                        None,
                    )
                }

                SampleFormat::I16 => {
                    let mut render =
                        CallbackRenderer::new(Arc::clone(&timeline), Arc::clone(&muted), device_rate)?;
                    let ch = channels as usize;
                    device.build_output_stream(
                        &config,
                        move |data: &mut [i16], _info| {
                            render.fill(data.len() / ch);
                            for frame in data.chunks_mut(ch) {
                                let s = (render.next_sample() * 32_767.0) as i16;
                                for slot in frame.iter_mut() {
                                    *slot = s;
                                }
                            }
                        },
                        |err| error!("audio output stream error: {err}"),
                        None,
                    )
                }

                fmt => {
                    return Err(ScorchError::AudioStream(format!(
                        "unsupported output sample format: {fmt:?}"
                    )))
                }
            }
            .map_err(|e| ScorchError::AudioStream(e.to_string()))?;

            stream
                .play()
                .map_err(|e| ScorchError::AudioStream(e.to_string()))?;

            Ok(Self {
                _stream: stream,
                timeline,
                muted,
            })
        }
    }

    impl AudioSink for CpalSink {
        fn clock(&self) -> f64 {
            let frames = self.timeline.lock().frames_rendered();
            frames as f64 / SAMPLE_RATE as f64
        }

        fn schedule_at(&mut self, start_secs: f64, samples: &[f32]) {
            let start_frame = (start_secs.max(0.0) * SAMPLE_RATE as f64).round() as u64;
            self.timeline.lock().write_at(start_frame, samples);
        }

        fn set_muted(&mut self, muted: bool) {
            self.muted.store(muted, Ordering::Relaxed);
        }
    }

    /// Per-stream state captured by the output callback.
    ///
    /// All buffers are sized at construction; `fill`/`next_sample` do not
    /// allocate while capacity holds, keeping the callback RT-friendly.
    /// The timeline lock is a short pop-only critical section.
    struct CallbackRenderer {
        timeline: Arc<Mutex<Timeline>>,
        muted: Arc<AtomicBool>,
        converter: RateConverter,
        /// Engine-rate scratch pulled from the timeline per step.
        scratch: Vec<f32>,
        /// Converted device-rate frames awaiting output.
        pending: VecDeque<f32>,
    }

    impl CallbackRenderer {
        fn new(
            timeline: Arc<Mutex<Timeline>>,
            muted: Arc<AtomicBool>,
            device_rate: u32,
        ) -> Result<Self> {
            let converter = RateConverter::new(SAMPLE_RATE, device_rate, PULL_CHUNK)?;
            let pending_capacity = converter.max_output_frames() * 4;
            Ok(Self {
                timeline,
                muted,
                converter,
                scratch: vec![0f32; PULL_CHUNK],
                pending: VecDeque::with_capacity(pending_capacity),
            })
        }

        /// Top up `pending` until it can cover `frames` output frames.
        fn fill(&mut self, frames: usize) {
            while self.pending.len() < frames {
                {
                    let mut tl = self.timeline.lock();
                    for slot in self.scratch.iter_mut() {
                        *slot = tl.pop_frame();
                    }
                }
                let produced = self.converter.process(&self.scratch);
                if produced.is_empty() {
                    // Converter error — bail out; unwritten output frames
                    // fall back to silence.
                    break;
                }
                for &s in produced {
                    self.pending.push_back(s);
                }
            }
        }

        fn next_sample(&mut self) -> f32 {
            let s = self.pending.pop_front().unwrap_or(0.0);
            if self.muted.load(Ordering::Relaxed) {
                0.0
            } else {
                s.clamp(-1.0, 1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_from_empty_timeline_yields_silence_and_advances_clock() {
        let mut tl = Timeline::new();
        assert_eq!(tl.pop_frame(), 0.0);
        assert_eq!(tl.pop_frame(), 0.0);
        assert_eq!(tl.frames_rendered(), 2);
    }

    #[test]
    fn scheduled_samples_come_back_in_order_with_silence_gap() {
        let mut tl = Timeline::new();
        // Leave frames 0..2 unscheduled.
        tl.write_at(2, &[0.5, -0.5]);

        assert_eq!(tl.pop_frame(), 0.0);
        assert_eq!(tl.pop_frame(), 0.0);
        assert_eq!(tl.pop_frame(), 0.5);
        assert_eq!(tl.pop_frame(), -0.5);
        assert_eq!(tl.pop_frame(), 0.0);
    }

    #[test]
    fn back_to_back_writes_are_gapless() {
        let mut tl = Timeline::new();
        tl.write_at(0, &[0.1, 0.2]);
        tl.write_at(2, &[0.3, 0.4]);

        let out: Vec<f32> = (0..4).map(|_| tl.pop_frame()).collect();
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn writes_landing_in_the_past_are_clipped() {
        let mut tl = Timeline::new();
        for _ in 0..3 {
            tl.pop_frame();
        }
        // Frames 1..5 requested; 1 and 2 are already rendered.
        tl.write_at(1, &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(tl.pop_frame(), 0.3);
        assert_eq!(tl.pop_frame(), 0.4);
    }

    #[test]
    fn overlapping_writes_sum() {
        let mut tl = Timeline::new();
        tl.write_at(0, &[0.25, 0.25]);
        tl.write_at(1, &[0.5]);
        assert_eq!(tl.pop_frame(), 0.25);
        assert_eq!(tl.pop_frame(), 0.75);
    }

    #[test]
    fn fully_past_write_is_dropped() {
        let mut tl = Timeline::new();
        for _ in 0..10 {
            tl.pop_frame();
        }
        tl.write_at(2, &[0.9, 0.9]);
        assert_eq!(tl.pop_frame(), 0.0);
    }
}
