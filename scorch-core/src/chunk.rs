//! Typed PCM chunk passed from the stream decoder to the playback engine.

/// Sample rate of every chunk the backend streams (Hz).
pub const SAMPLE_RATE: u32 = 24_000;

/// A contiguous block of mono signed 16-bit little-endian PCM samples at
/// [`SAMPLE_RATE`].
///
/// Chunk boundaries are a transport artifact — one chunk is whatever the
/// network delivered in a single read. Chunks are never mutated after
/// creation; ownership moves into the playback engine's buffer on
/// `add_chunk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    samples: Vec<i16>,
}

impl PcmChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Reinterpret little-endian bytes as i16 samples.
    ///
    /// A trailing odd byte is ignored; callers that care about byte-split
    /// chunks carry the remainder themselves.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this chunk in seconds (`sample count / 24 000`).
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    /// Normalize to f32 in [-1.0, 1.0).
    ///
    /// Divisor is 32768 (not 32767) so i16::MIN maps exactly to -1.0.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_of_one_second_chunk() {
        let chunk = PcmChunk::new(vec![0i16; SAMPLE_RATE as usize]);
        assert!((chunk.duration_secs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn from_le_bytes_decodes_little_endian_pairs() {
        // 0x0100 = 256, 0xFFFF = -1
        let chunk = PcmChunk::from_le_bytes(&[0x00, 0x01, 0xFF, 0xFF]);
        assert_eq!(chunk.samples(), &[256, -1]);
    }

    #[test]
    fn from_le_bytes_ignores_trailing_odd_byte() {
        let chunk = PcmChunk::from_le_bytes(&[0x00, 0x01, 0x7F]);
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn normalization_is_exact_at_both_extremes() {
        let chunk = PcmChunk::new(vec![i16::MIN, i16::MAX, 0]);
        let f = chunk.to_f32();
        assert_eq!(f[0], -1.0);
        assert_eq!(f[1], 32_767.0 / 32_768.0);
        assert_eq!(f[2], 0.0);
        assert!(f[1] < 1.0, "positive extreme must stay below 1.0");
    }

    #[test]
    fn empty_chunk() {
        let chunk = PcmChunk::new(vec![]);
        assert!(chunk.is_empty());
        assert_eq!(chunk.duration_secs(), 0.0);
    }
}
