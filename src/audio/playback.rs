//! Audio playback
//!
//! One [`AudioSink`] exists per remote sender. The voice pipeline paces the
//! clips itself, so a sink only has to start a clip and to stop on demand.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::PeerId;

/// Plays clips for one remote sender
pub trait AudioSink: Send {
    /// Start playing a clip of mono samples in [-1, 1]
    fn play(&mut self, clip: &[f32]);

    /// Cut off whatever is playing
    fn stop(&mut self);
}

/// Creates a sink the first time a sender is heard
pub trait SinkFactory: Send {
    fn create(&mut self, peer: PeerId, sample_rate: u32) -> Box<dyn AudioSink>;
}

#[derive(Default)]
struct PlaybackLog {
    clips: HashMap<PeerId, Vec<Vec<f32>>>,
    stops: HashMap<PeerId, usize>,
    created: Vec<PeerId>,
}

/// Sinks that record what they were asked to play. Used headless and in tests.
#[derive(Clone, Default)]
pub struct RecordingSinks {
    log: Arc<Mutex<PlaybackLog>>,
}

impl RecordingSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clips played for `peer`, oldest first
    pub fn clips(&self, peer: PeerId) -> Vec<Vec<f32>> {
        self.log.lock().clips.get(&peer).cloned().unwrap_or_default()
    }

    pub fn clip_count(&self, peer: PeerId) -> usize {
        self.log.lock().clips.get(&peer).map(Vec::len).unwrap_or(0)
    }

    pub fn stop_count(&self, peer: PeerId) -> usize {
        self.log.lock().stops.get(&peer).copied().unwrap_or(0)
    }

    /// Senders a sink was created for, in creation order
    pub fn created(&self) -> Vec<PeerId> {
        self.log.lock().created.clone()
    }
}

impl SinkFactory for RecordingSinks {
    fn create(&mut self, peer: PeerId, _sample_rate: u32) -> Box<dyn AudioSink> {
        self.log.lock().created.push(peer);
        Box::new(RecordingSink {
            peer,
            log: self.log.clone(),
        })
    }
}

struct RecordingSink {
    peer: PeerId,
    log: Arc<Mutex<PlaybackLog>>,
}

impl AudioSink for RecordingSink {
    fn play(&mut self, clip: &[f32]) {
        self.log
            .lock()
            .clips
            .entry(self.peer)
            .or_default()
            .push(clip.to_vec());
    }

    fn stop(&mut self) {
        *self.log.lock().stops.entry(self.peer).or_default() += 1;
    }
}

#[cfg(feature = "device-audio")]
pub use device_playback::SpeakerSinks;

#[cfg(feature = "device-audio")]
mod device_playback {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::StreamConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    use super::{AudioSink, SinkFactory};
    use crate::audio::device::get_default_output_device;
    use crate::protocol::PeerId;

    /// Opens one output stream per sender on the default output device
    #[derive(Default)]
    pub struct SpeakerSinks;

    impl SinkFactory for SpeakerSinks {
        fn create(&mut self, peer: PeerId, sample_rate: u32) -> Box<dyn AudioSink> {
            Box::new(DeviceSink::open(peer, sample_rate))
        }
    }

    struct DeviceSink {
        pending: Arc<Mutex<VecDeque<f32>>>,
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        /// Device frames per voice sample
        ratio: f64,
    }

    impl DeviceSink {
        fn open(peer: PeerId, sample_rate: u32) -> Self {
            let pending = Arc::new(Mutex::new(VecDeque::new()));
            let running = Arc::new(AtomicBool::new(true));
            let mut sink = Self {
                pending: pending.clone(),
                running: running.clone(),
                thread_handle: None,
                ratio: 1.0,
            };

            let device = match get_default_output_device() {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!("No speaker for {}: {}", peer.short(), e);
                    return sink;
                }
            };
            let default_config = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("No output config for {}: {}", peer.short(), e);
                    return sink;
                }
            };
            let config: StreamConfig = default_config.config();
            let channels = config.channels.max(1) as usize;
            sink.ratio = config.sample_rate.0 as f64 / sample_rate.max(1) as f64;

            let handle = thread::Builder::new()
                .name(format!("voice-play-{}", peer.short()))
                .spawn(move || {
                    let cpal_device = device.into_inner();
                    let callback_queue = pending.clone();
                    let stream = cpal_device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let mut queue = callback_queue.lock();
                            for frame in data.chunks_mut(channels) {
                                let sample = queue.pop_front().unwrap_or(0.0);
                                frame.iter_mut().for_each(|out| *out = sample);
                            }
                        },
                        move |err| {
                            tracing::error!("Playback stream error: {}", err);
                        },
                        None,
                    );

                    match stream {
                        Ok(stream) => {
                            if let Err(e) = stream.play() {
                                tracing::error!("Failed to start playback stream: {}", e);
                                return;
                            }
                            while running.load(Ordering::Relaxed) {
                                thread::sleep(std::time::Duration::from_millis(10));
                            }
                        }
                        Err(e) => tracing::error!("Failed to build playback stream: {}", e),
                    }
                });

            match handle {
                Ok(handle) => sink.thread_handle = Some(handle),
                Err(e) => tracing::warn!("Playback thread failed to start: {}", e),
            }
            sink
        }
    }

    impl AudioSink for DeviceSink {
        fn play(&mut self, clip: &[f32]) {
            // Nearest-neighbour resample to the device rate
            let frames = (clip.len() as f64 * self.ratio) as usize;
            let mut queue = self.pending.lock();
            for i in 0..frames {
                let source = ((i as f64 / self.ratio) as usize).min(clip.len().saturating_sub(1));
                queue.push_back(clip.get(source).copied().unwrap_or(0.0));
            }
        }

        fn stop(&mut self) {
            self.pending.lock().clear();
        }
    }

    impl Drop for DeviceSink {
        fn drop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sinks_share_one_log() {
        let mut factory = RecordingSinks::new();
        let observer = factory.clone();
        let (a, b) = (PeerId::random(), PeerId::random());

        let mut sink_a = factory.create(a, 11025);
        let mut sink_b = factory.create(b, 11025);
        sink_a.play(&[0.1, 0.2]);
        sink_a.play(&[0.3]);
        sink_b.stop();

        assert_eq!(observer.created(), vec![a, b]);
        assert_eq!(observer.clips(a), vec![vec![0.1, 0.2], vec![0.3]]);
        assert_eq!(observer.clip_count(b), 0);
        assert_eq!(observer.stop_count(b), 1);
    }
}
