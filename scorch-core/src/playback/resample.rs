//! Output-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! The engine timeline runs at the backend's fixed 24 kHz rate, but cpal
//! renders at whatever the output device reports (commonly 44.1 or
//! 48 kHz). `RateConverter` bridges that gap inside the output callback,
//! which is why everything here is pre-allocated: the caller always feeds
//! exactly `chunk_size` input frames, rubato writes into a buffer sized
//! at construction, and no allocation happens after `new`.
//!
//! When engine rate == device rate, `RateConverter` is a passthrough and
//! no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Result, ScorchError};

/// Converts f32 mono audio from the engine rate to the device rate.
pub struct RateConverter {
    /// `None` when engine rate == device rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// How many input samples each `process` call must supply.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `engine_rate`: Sample rate of the scheduling timeline (Hz).
    /// - `device_rate`: Sample rate of the output device (Hz).
    /// - `chunk_size`: Input frame count per `process` call.
    ///
    /// # Errors
    /// Returns `ScorchError::AudioDevice` if rubato fails to initialise.
    pub fn new(engine_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        if engine_rate == device_rate {
            return Ok(Self {
                resampler: None,
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = device_rate as f64 / engine_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| ScorchError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(engine_rate, device_rate, chunk_size, max_out, "output resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            chunk_size,
            output_buf,
        })
    }

    /// Convert exactly `chunk_size` input frames; returns the produced
    /// device-rate frames as a slice into the internal buffer.
    ///
    /// In passthrough mode the input is returned directly.
    ///
    /// # Panics
    /// Debug-asserts that `input.len() == chunk_size` when resampling.
    pub fn process<'a>(&'a mut self, input: &'a [f32]) -> &'a [f32] {
        let Some(ref mut resampler) = self.resampler else {
            return input;
        };

        debug_assert_eq!(input.len(), self.chunk_size);

        match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => &self.output_buf[0][..produced],
            Err(e) => {
                tracing::error!("resampler process error: {e}");
                &[]
            }
        }
    }

    /// Returns `true` when engine rate == device rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Upper bound on frames produced per `process` call.
    pub fn max_output_frames(&self) -> usize {
        match &self.resampler {
            Some(r) => r.output_frames_max(),
            None => self.chunk_size,
        }
    }
}
