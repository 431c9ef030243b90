//! Energy gate for captured audio

/// Mean absolute amplitude of a buffer; zero when empty
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Discards buffers too quiet to be worth sending
#[derive(Debug, Clone, Copy)]
pub struct SilenceGate {
    threshold: f32,
}

impl SilenceGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// True when the buffer must not be transmitted. A non-finite level
    /// counts as silence.
    pub fn is_silent(&self, samples: &[f32]) -> bool {
        let level = mean_abs(samples);
        !level.is_finite() || level < self.threshold
    }
}
