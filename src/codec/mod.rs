//! Voice sample codec
//!
//! Voice frames travel as raw signed 16-bit little-endian PCM, mono, at the
//! sample rate every participant agrees on. There is no header: the payload
//! length alone gives the sample count.

pub mod decoder;
pub mod encoder;

pub use decoder::PcmDecoder;
pub use encoder::PcmEncoder;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Full-scale value a sample of 1.0 maps to
pub const FULL_SCALE: f32 = i16::MAX as f32;
