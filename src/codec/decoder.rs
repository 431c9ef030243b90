//! PCM16 decoder

use crate::codec::{BYTES_PER_SAMPLE, FULL_SCALE};
use crate::error::CodecError;

/// Turns voice payloads back into samples
pub struct PcmDecoder {
    frames_decoded: u64,
    frames_rejected: u64,
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self {
            frames_decoded: 0,
            frames_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Map a quantized sample back to float: `i / 32767`
    pub fn decode_sample(sample: i16) -> f32 {
        sample as f32 / FULL_SCALE
    }

    /// Decode a payload into PCM16 samples. Empty and odd-length payloads
    /// are corrupt and rejected whole.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
        if payload.is_empty() {
            self.frames_rejected += 1;
            return Err(CodecError::EmptyPayload);
        }
        if payload.len() % BYTES_PER_SAMPLE != 0 {
            self.frames_rejected += 1;
            return Err(CodecError::OddLength(payload.len()));
        }
        let samples: Vec<i16> = payload
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.frames_decoded += 1;
        self.samples_produced += samples.len() as u64;
        Ok(samples)
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmEncoder;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_corrupt_payloads() {
        let mut decoder = PcmDecoder::new();
        assert_eq!(decoder.decode(&[]), Err(CodecError::EmptyPayload));
        assert_eq!(decoder.decode(&[1, 2, 3]), Err(CodecError::OddLength(3)));
        // A bad frame does not poison the next one
        assert_eq!(decoder.decode(&[0x00, 0x01]), Ok(vec![256]));

        let stats = decoder.stats();
        assert_eq!(stats.frames_rejected, 2);
        assert_eq!(stats.frames_decoded, 1);
    }

    #[test]
    fn test_decode_sample_scale() {
        assert_eq!(PcmDecoder::decode_sample(32767), 1.0);
        assert_eq!(PcmDecoder::decode_sample(0), 0.0);
        assert_eq!(PcmDecoder::decode_sample(-32767), -1.0);
    }

    proptest! {
        #[test]
        fn prop_quantization_error_is_bounded(samples in prop::collection::vec(-1.0f32..=1.0, 1..512)) {
            let mut encoder = PcmEncoder::new();
            let mut decoder = PcmDecoder::new();
            let decoded = decoder.decode(&encoder.encode(&samples)).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (original, quantized) in samples.iter().zip(decoded) {
                let restored = PcmDecoder::decode_sample(quantized);
                prop_assert!((original - restored).abs() <= 1.0 / 32767.0);
            }
        }
    }
}
