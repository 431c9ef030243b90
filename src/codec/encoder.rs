//! PCM16 encoder

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{BYTES_PER_SAMPLE, FULL_SCALE};

/// Converts float capture buffers into voice payloads
pub struct PcmEncoder {
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
    /// Samples that had to be clamped into [-1, 1]
    samples_clipped: u64,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self {
            frames_encoded: 0,
            bytes_produced: 0,
            samples_clipped: 0,
        }
    }

    /// Quantize one sample: `round(clamp(s, -1, 1) * 32767)`
    pub fn encode_sample(sample: f32) -> i16 {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        (clamped * FULL_SCALE).round() as i16
    }

    /// Encode a buffer of float samples to little-endian PCM16
    pub fn encode(&mut self, samples: &[f32]) -> Bytes {
        let mut out = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for &sample in samples {
            if !(-1.0..=1.0).contains(&sample) {
                self.samples_clipped += 1;
            }
            out.put_i16_le(Self::encode_sample(sample));
        }
        self.frames_encoded += 1;
        self.bytes_produced += out.len() as u64;
        out.freeze()
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            samples_clipped: self.samples_clipped,
        }
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub samples_clipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization() {
        assert_eq!(PcmEncoder::encode_sample(0.0), 0);
        assert_eq!(PcmEncoder::encode_sample(1.0), 32767);
        assert_eq!(PcmEncoder::encode_sample(-1.0), -32767);
        assert_eq!(PcmEncoder::encode_sample(0.5), 16384);
        assert_eq!(PcmEncoder::encode_sample(f32::NAN), 0);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let mut encoder = PcmEncoder::new();
        let bytes = encoder.encode(&[2.0, -3.5]);
        assert_eq!(&bytes[..], &[0xff, 0x7f, 0x01, 0x80]);
        assert_eq!(encoder.stats().samples_clipped, 2);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut encoder = PcmEncoder::new();
        let bytes = encoder.encode(&[256.0 / 32767.0, -1.0 / 32767.0]);
        assert_eq!(&bytes[..], &[0x00, 0x01, 0xff, 0xff]);
        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, 4);
    }
}
