//! Audio subsystem module

pub mod buffer;
pub mod capture;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod playback;

pub use buffer::{
    create_shared_ring, JitterBuffer, JitterBufferStats, SampleRing, SharedSampleRing, VoiceFrame,
};
pub use capture::{CaptureSource, RingCapture};
pub use playback::{AudioSink, RecordingSinks, SinkFactory};

#[cfg(feature = "device-audio")]
pub use capture::MicrophoneCapture;
#[cfg(feature = "device-audio")]
pub use device::{list_devices, AudioDeviceInfo};
#[cfg(feature = "device-audio")]
pub use playback::SpeakerSinks;
