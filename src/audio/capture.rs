//! Audio capture
//!
//! The voice pipeline pulls whole processing buffers from a [`CaptureSource`].
//! [`RingCapture`] is fed by anything holding its ring (tests, the demo's
//! tone generator); [`MicrophoneCapture`] feeds the same ring from a cpal
//! input stream running on its own thread.

use crate::audio::buffer::{create_shared_ring, SharedSampleRing};

/// Where captured mono samples come from
pub trait CaptureSource: Send {
    /// Samples captured and not yet consumed
    fn available(&self) -> usize;

    /// Take exactly `count` samples, or `None` if fewer are available
    fn read(&mut self, count: usize) -> Option<Vec<f32>>;

    /// Throw away the captured backlog
    fn discard(&mut self) -> usize;
}

/// Capture fed through a shared sample ring
pub struct RingCapture {
    ring: SharedSampleRing,
}

impl RingCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: create_shared_ring(capacity),
        }
    }

    pub fn from_ring(ring: SharedSampleRing) -> Self {
        Self { ring }
    }

    /// Producer side of the ring
    pub fn writer(&self) -> SharedSampleRing {
        self.ring.clone()
    }
}

impl CaptureSource for RingCapture {
    fn available(&self) -> usize {
        self.ring.len()
    }

    fn read(&mut self, count: usize) -> Option<Vec<f32>> {
        self.ring.pop_exact(count)
    }

    fn discard(&mut self) -> usize {
        self.ring.clear()
    }
}

#[cfg(feature = "device-audio")]
pub use device_capture::MicrophoneCapture;

#[cfg(feature = "device-audio")]
mod device_capture {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::StreamConfig;
    use crossbeam_channel::{bounded, Receiver};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    use super::{CaptureSource, RingCapture};
    use crate::audio::buffer::SharedSampleRing;
    use crate::audio::device::{get_default_input_device, get_device_by_id};
    use crate::error::AudioError;

    /// Microphone input downmixed to mono
    pub struct MicrophoneCapture {
        device_id: Option<String>,
        ring: RingCapture,
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        error_rx: Option<Receiver<AudioError>>,
        samples_captured: Arc<AtomicU64>,
        sample_rate: u32,
    }

    impl MicrophoneCapture {
        /// Capture from `device_id`, or the default input when `None`
        pub fn new(device_id: Option<&str>, sample_rate: u32, capacity: usize) -> Self {
            Self {
                device_id: device_id.map(str::to_string),
                ring: RingCapture::new(capacity),
                running: Arc::new(AtomicBool::new(false)),
                thread_handle: None,
                error_rx: None,
                samples_captured: Arc::new(AtomicU64::new(0)),
                sample_rate,
            }
        }

        /// Start capturing audio
        pub fn start(&mut self) -> Result<(), AudioError> {
            if self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            let device = match &self.device_id {
                Some(id) => get_device_by_id(id)?,
                None => get_default_input_device()?,
            };
            let channels = device.default_input_config()?.channels();
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(self.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (error_tx, error_rx) = bounded::<AudioError>(16);
            self.error_rx = Some(error_rx);

            let running = self.running.clone();
            let running_for_loop = self.running.clone();
            let ring: SharedSampleRing = self.ring.writer();
            let samples_captured = self.samples_captured.clone();
            let stride = channels.max(1) as usize;

            running.store(true, Ordering::SeqCst);

            let handle = thread::Builder::new()
                .name("voice-capture".to_string())
                .spawn(move || {
                    let cpal_device = device.into_inner();
                    let stream = cpal_device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if !running.load(Ordering::Relaxed) {
                                return;
                            }
                            // First channel only
                            let mono: Vec<f32> = data.iter().step_by(stride).copied().collect();
                            samples_captured.fetch_add(mono.len() as u64, Ordering::Relaxed);
                            ring.push_slice(&mono);
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    );

                    match stream {
                        Ok(stream) => {
                            if let Err(e) = stream.play() {
                                tracing::error!("Failed to start capture stream: {}", e);
                                return;
                            }
                            while running_for_loop.load(Ordering::Relaxed) {
                                thread::sleep(std::time::Duration::from_millis(10));
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to build capture stream: {}", e);
                        }
                    }
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            self.thread_handle = Some(handle);
            tracing::info!("Microphone capture started at {} Hz", self.sample_rate);
            Ok(())
        }

        /// Stop capturing audio
        pub fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }

        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        /// Get total samples captured
        pub fn samples_captured(&self) -> u64 {
            self.samples_captured.load(Ordering::Relaxed)
        }

        /// Check for stream errors
        pub fn check_errors(&self) -> Option<AudioError> {
            self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
        }
    }

    impl CaptureSource for MicrophoneCapture {
        fn available(&self) -> usize {
            self.ring.available()
        }

        fn read(&mut self, count: usize) -> Option<Vec<f32>> {
            self.ring.read(count)
        }

        fn discard(&mut self) -> usize {
            self.ring.discard()
        }
    }

    impl Drop for MicrophoneCapture {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_capture_reads_whole_buffers() {
        let mut capture = RingCapture::new(16);
        let writer = capture.writer();
        writer.push_slice(&[0.5; 5]);

        assert_eq!(capture.available(), 5);
        assert!(capture.read(8).is_none());
        assert_eq!(capture.read(4).map(|b| b.len()), Some(4));
        assert_eq!(capture.discard(), 1);
        assert_eq!(capture.available(), 0);
    }
}
