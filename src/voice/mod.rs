//! Voice pipeline
//!
//! Capture side: pull whole processing buffers from the capture source, drop
//! the quiet ones at the silence gate, encode the rest as PCM16.
//!
//! Playback side: decode each inbound payload into the sender's jitter
//! buffer. Once two frames are queued and nothing is playing for that sender,
//! a playback run starts: play one frame, wait its real-time duration on the
//! pacing scheduler, play the next. The run ends when the buffer is empty.
//! Muting a sender or disabling playback cancels the run and empties the
//! buffer at once.

pub mod gate;

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::audio::{AudioSink, CaptureSource, JitterBuffer, JitterBufferStats, SinkFactory, VoiceFrame};
use crate::codec::{decoder::DecoderStats, encoder::EncoderStats, PcmDecoder, PcmEncoder};
use crate::config::VoiceConfig;
use crate::protocol::PeerId;
use crate::timer::{Scheduler, TimerToken};

pub use gate::{mean_abs, SilenceGate};

/// Highest accepted output gain
pub const MAX_OUTPUT_VOLUME: f32 = 5.0;

/// Voice pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct VoiceStats {
    /// Full processing buffers taken from the capture source
    pub buffers_captured: u64,
    /// Buffers discarded by the silence gate
    pub buffers_gated: u64,
    /// Encoded payloads handed out for broadcast
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_played: u64,
    pub decode_failures: u64,
    /// Payloads dropped because the sender is muted
    pub dropped_muted: u64,
    /// Payloads dropped because playback is disabled
    pub dropped_disabled: u64,
}

/// Playback state for one remote sender
struct PeerStream {
    jitter: JitterBuffer,
    sink: Box<dyn AudioSink>,
    /// Pacing timer and the instant the current clip ends
    playing: Option<(TimerToken, Instant)>,
}

pub struct VoicePipeline {
    sample_rate: u32,
    buffer_samples: usize,
    jitter_capacity: usize,
    jitter_start_depth: usize,
    gate: SilenceGate,
    capture: Box<dyn CaptureSource>,
    sinks: Box<dyn SinkFactory>,
    encoder: PcmEncoder,
    decoder: PcmDecoder,
    streams: HashMap<PeerId, PeerStream>,
    muted: HashSet<PeerId>,
    pacing: Scheduler<PeerId>,
    microphone_enabled: bool,
    playback_enabled: bool,
    volume: f32,
    stats: VoiceStats,
}

impl VoicePipeline {
    pub fn new(
        config: &VoiceConfig,
        capture: Box<dyn CaptureSource>,
        sinks: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            sample_rate: config.sample_rate,
            buffer_samples: config.buffer_samples(),
            jitter_capacity: config.jitter_capacity,
            jitter_start_depth: config.jitter_start_depth,
            gate: SilenceGate::new(config.silence_threshold),
            capture,
            sinks,
            encoder: PcmEncoder::new(),
            decoder: PcmDecoder::new(),
            streams: HashMap::new(),
            muted: HashSet::new(),
            pacing: Scheduler::new(),
            microphone_enabled: config.microphone_enabled,
            playback_enabled: config.playback_enabled,
            volume: config.output_volume.clamp(0.0, MAX_OUTPUT_VOLUME),
            stats: VoiceStats::default(),
        }
    }

    /// Encode every full capture buffer that passes the gate.
    /// Returns the payloads to broadcast, oldest first.
    pub fn capture_tick(&mut self) -> Vec<Bytes> {
        if !self.microphone_enabled {
            self.capture.discard();
            return Vec::new();
        }

        let mut payloads = Vec::new();
        while self.capture.available() >= self.buffer_samples {
            let Some(buffer) = self.capture.read(self.buffer_samples) else {
                break;
            };
            self.stats.buffers_captured += 1;
            if self.gate.is_silent(&buffer) {
                self.stats.buffers_gated += 1;
                continue;
            }
            payloads.push(self.encoder.encode(&buffer));
            self.stats.frames_sent += 1;
        }
        payloads
    }

    /// Handle one voice payload from `sender`
    pub fn receive(&mut self, now: Instant, sender: PeerId, payload: &[u8]) {
        if !self.playback_enabled {
            self.stats.dropped_disabled += 1;
            return;
        }
        if self.muted.contains(&sender) {
            self.stats.dropped_muted += 1;
            return;
        }

        let samples = match self.decoder.decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::debug!("Discarding voice frame from {}: {}", sender.short(), e);
                return;
            }
        };
        self.stats.frames_received += 1;

        let (capacity, start_depth, sample_rate) =
            (self.jitter_capacity, self.jitter_start_depth, self.sample_rate);
        let sinks = &mut self.sinks;
        let stream = self.streams.entry(sender).or_insert_with(|| {
            tracing::debug!("Audio stream opened for {}", sender.short());
            PeerStream {
                jitter: JitterBuffer::new(capacity, start_depth),
                sink: sinks.create(sender, sample_rate),
                playing: None,
            }
        });
        if !stream.jitter.push(VoiceFrame::new(sender, samples, sample_rate)) {
            tracing::debug!("Jitter buffer for {} overflowed", sender.short());
        }

        if stream.playing.is_none() && stream.jitter.ready_to_start() {
            self.play_next(sender, now);
        }
    }

    /// Advance paced playback: start the next clip of every run whose current
    /// clip has finished.
    pub fn playback_tick(&mut self, now: Instant) {
        for (token, peer) in self.pacing.take_due(now) {
            let Some(stream) = self.streams.get(&peer) else {
                continue;
            };
            let Some((current, deadline)) = stream.playing else {
                continue;
            };
            if current != token {
                continue;
            }
            // Keep the cadence unless we fell more than one frame behind
            let frame = Duration::from_secs_f64(self.buffer_samples as f64 / self.sample_rate as f64);
            let base = if now.saturating_duration_since(deadline) > frame {
                now
            } else {
                deadline
            };
            self.play_next(peer, base);
        }
    }

    fn play_next(&mut self, peer: PeerId, start: Instant) {
        let volume = self.volume;
        let Some(stream) = self.streams.get_mut(&peer) else {
            return;
        };
        match stream.jitter.pop() {
            Some(frame) => {
                let clip: Vec<f32> = frame
                    .samples
                    .iter()
                    .map(|&s| (PcmDecoder::decode_sample(s) * volume).clamp(-1.0, 1.0))
                    .collect();
                stream.sink.play(&clip);
                let ends = start + frame.duration();
                let token = self.pacing.schedule_at(ends, peer);
                stream.playing = Some((token, ends));
                self.stats.frames_played += 1;
            }
            None => {
                stream.playing = None;
            }
        }
    }

    /// Stop a sender's run and empty its buffer
    fn silence(&mut self, peer: PeerId) {
        if let Some(stream) = self.streams.get_mut(&peer) {
            if let Some((token, _)) = stream.playing.take() {
                self.pacing.cancel(token);
            }
            stream.jitter.clear();
            stream.sink.stop();
        }
    }

    pub fn set_muted(&mut self, peer: PeerId, muted: bool) {
        if muted {
            if self.muted.insert(peer) {
                self.silence(peer);
                tracing::info!("Muted {}", peer.short());
            }
        } else if self.muted.remove(&peer) {
            tracing::info!("Unmuted {}", peer.short());
        }
    }

    /// Flip the mute state of `peer`; returns the new state
    pub fn toggle_mute(&mut self, peer: PeerId) -> bool {
        let muted = !self.is_muted(peer);
        self.set_muted(peer, muted);
        muted
    }

    pub fn is_muted(&self, peer: PeerId) -> bool {
        self.muted.contains(&peer)
    }

    pub fn set_playback_enabled(&mut self, enabled: bool) {
        if self.playback_enabled == enabled {
            return;
        }
        self.playback_enabled = enabled;
        if !enabled {
            let peers: Vec<PeerId> = self.streams.keys().copied().collect();
            for peer in peers {
                self.silence(peer);
            }
        }
        tracing::info!("Playback {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn playback_enabled(&self) -> bool {
        self.playback_enabled
    }

    pub fn set_microphone_enabled(&mut self, enabled: bool) {
        if self.microphone_enabled == enabled {
            return;
        }
        self.microphone_enabled = enabled;
        let dropped = self.capture.discard();
        tracing::info!(
            "Microphone {} ({} stale samples dropped)",
            if enabled { "enabled" } else { "disabled" },
            dropped
        );
    }

    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled
    }

    /// Set output gain, clamped to `0.0..=5.0`
    pub fn set_output_volume(&mut self, volume: f32) -> f32 {
        self.volume = if volume.is_nan() {
            1.0
        } else {
            volume.clamp(0.0, MAX_OUTPUT_VOLUME)
        };
        self.volume
    }

    pub fn output_volume(&self) -> f32 {
        self.volume
    }

    /// Tear down a sender's stream when its session closes
    pub fn remove_peer(&mut self, peer: PeerId) {
        self.silence(peer);
        if self.streams.remove(&peer).is_some() {
            tracing::debug!("Audio stream closed for {}", peer.short());
        }
    }

    /// Tear down every stream
    pub fn clear(&mut self) {
        let peers: Vec<PeerId> = self.streams.keys().copied().collect();
        for peer in peers {
            self.remove_peer(peer);
        }
        self.pacing.clear();
    }

    pub fn is_playing(&self, peer: PeerId) -> bool {
        self.streams
            .get(&peer)
            .map(|s| s.playing.is_some())
            .unwrap_or(false)
    }

    /// Frames queued for `peer`
    pub fn buffered(&self, peer: PeerId) -> usize {
        self.streams.get(&peer).map(|s| s.jitter.len()).unwrap_or(0)
    }

    pub fn has_stream(&self, peer: PeerId) -> bool {
        self.streams.contains_key(&peer)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn jitter_stats(&self, peer: PeerId) -> Option<JitterBufferStats> {
        self.streams.get(&peer).map(|s| s.jitter.stats())
    }

    pub fn stats(&self) -> &VoiceStats {
        &self.stats
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingSinks, RingCapture, SharedSampleRing};

    const FRAME: usize = 1102;

    fn pipeline(mic: bool) -> (VoicePipeline, SharedSampleRing, RecordingSinks) {
        let config = VoiceConfig {
            microphone_enabled: mic,
            ..VoiceConfig::default()
        };
        let capture = RingCapture::new(FRAME * 8);
        let ring = capture.writer();
        let sinks = RecordingSinks::new();
        let pipeline = VoicePipeline::new(&config, Box::new(capture), Box::new(sinks.clone()));
        (pipeline, ring, sinks)
    }

    fn payload(value: i16) -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes())
            .take(FRAME)
            .flatten()
            .collect()
    }

    fn frame_len() -> Duration {
        Duration::from_secs_f64(FRAME as f64 / 11025.0)
    }

    #[test]
    fn test_capture_waits_for_full_buffer() {
        let (mut voice, ring, _) = pipeline(true);
        ring.push_slice(&[0.5; FRAME - 1]);
        assert!(voice.capture_tick().is_empty());
        ring.push_slice(&[0.5]);
        let sent = voice.capture_tick();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), FRAME * 2);
    }

    #[test]
    fn test_silence_is_never_sent() {
        let (mut voice, ring, _) = pipeline(true);
        ring.push_slice(&[0.001; FRAME]);
        ring.push_slice(&[0.3; FRAME]);
        ring.push_slice(&[0.0; FRAME]);

        let sent = voice.capture_tick();
        assert_eq!(sent.len(), 1);
        assert_eq!(voice.stats().buffers_captured, 3);
        assert_eq!(voice.stats().buffers_gated, 2);
    }

    #[test]
    fn test_disabled_microphone_discards_backlog() {
        let (mut voice, ring, _) = pipeline(false);
        ring.push_slice(&[0.5; FRAME]);
        assert!(voice.capture_tick().is_empty());
        assert!(ring.is_empty());

        voice.set_microphone_enabled(true);
        ring.push_slice(&[0.5; FRAME]);
        voice.set_microphone_enabled(false);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_playback_starts_at_depth_two() {
        let (mut voice, _, sinks) = pipeline(false);
        let peer = PeerId::random();
        let now = Instant::now();

        voice.receive(now, peer, &payload(100));
        assert!(!voice.is_playing(peer));
        assert_eq!(sinks.clip_count(peer), 0);

        voice.receive(now, peer, &payload(200));
        assert!(voice.is_playing(peer));
        assert_eq!(sinks.clip_count(peer), 1);
        assert_eq!(voice.buffered(peer), 1);
    }

    #[test]
    fn test_playback_is_paced_by_frame_duration() {
        let (mut voice, _, sinks) = pipeline(false);
        let peer = PeerId::random();
        let start = Instant::now();
        for value in [1, 2, 3] {
            voice.receive(start, peer, &payload(value));
        }
        assert_eq!(sinks.clip_count(peer), 1);

        voice.playback_tick(start + frame_len() / 2);
        assert_eq!(sinks.clip_count(peer), 1);
        voice.playback_tick(start + frame_len());
        assert_eq!(sinks.clip_count(peer), 2);
        voice.playback_tick(start + frame_len() * 2);
        assert_eq!(sinks.clip_count(peer), 3);

        // Buffer drained: the run ends on the next deadline
        voice.playback_tick(start + frame_len() * 3);
        assert!(!voice.is_playing(peer));

        let first: Vec<i16> = sinks
            .clips(peer)
            .iter()
            .map(|clip| (clip[0] * 32767.0).round() as i16)
            .collect();
        assert_eq!(first, vec![1, 2, 3]);
    }

    #[test]
    fn test_mute_clears_buffer_and_stops_run() {
        let (mut voice, _, sinks) = pipeline(false);
        let peer = PeerId::random();
        let now = Instant::now();
        for value in [1, 2, 3] {
            voice.receive(now, peer, &payload(value));
        }

        assert!(voice.toggle_mute(peer));
        assert_eq!(voice.buffered(peer), 0);
        assert!(!voice.is_playing(peer));
        assert_eq!(sinks.stop_count(peer), 1);

        voice.receive(now, peer, &payload(4));
        assert_eq!(voice.stats().dropped_muted, 1);
        voice.playback_tick(now + frame_len() * 4);
        assert_eq!(sinks.clip_count(peer), 1);

        assert!(!voice.toggle_mute(peer));
        voice.receive(now, peer, &payload(5));
        assert_eq!(voice.buffered(peer), 1);
    }

    #[test]
    fn test_disabling_playback_clears_every_stream() {
        let (mut voice, _, _) = pipeline(false);
        let (a, b) = (PeerId::random(), PeerId::random());
        let now = Instant::now();
        for peer in [a, b] {
            voice.receive(now, peer, &payload(1));
            voice.receive(now, peer, &payload(2));
        }

        voice.set_playback_enabled(false);
        assert!(!voice.is_playing(a) && !voice.is_playing(b));
        assert_eq!(voice.buffered(a) + voice.buffered(b), 0);

        voice.receive(now, a, &payload(3));
        assert_eq!(voice.stats().dropped_disabled, 1);
    }

    #[test]
    fn test_corrupt_frame_is_skipped() {
        let (mut voice, _, sinks) = pipeline(false);
        let peer = PeerId::random();
        let now = Instant::now();

        voice.receive(now, peer, &payload(1));
        voice.receive(now, peer, &[1, 2, 3]);
        voice.receive(now, peer, &[]);
        voice.receive(now, peer, &payload(2));

        assert_eq!(voice.stats().decode_failures, 2);
        assert_eq!(sinks.clip_count(peer), 1);
    }

    #[test]
    fn test_volume_is_clamped_and_applied() {
        let (mut voice, _, sinks) = pipeline(false);
        let peer = PeerId::random();
        assert_eq!(voice.set_output_volume(9.0), MAX_OUTPUT_VOLUME);
        assert_eq!(voice.set_output_volume(-1.0), 0.0);
        voice.set_output_volume(4.0);

        let now = Instant::now();
        voice.receive(now, peer, &payload(16384));
        voice.receive(now, peer, &payload(16384));
        let clip = &sinks.clips(peer)[0];
        assert_eq!(clip[0], 1.0);
    }

    #[test]
    fn test_initial_volume_comes_from_config() {
        let config = VoiceConfig {
            output_volume: 2.5,
            ..VoiceConfig::default()
        };
        let sinks = RecordingSinks::new();
        let mut voice = VoicePipeline::new(
            &config,
            Box::new(RingCapture::new(FRAME)),
            Box::new(sinks.clone()),
        );
        assert_eq!(voice.output_volume(), 2.5);

        let peer = PeerId::random();
        let now = Instant::now();
        voice.receive(now, peer, &payload(3277));
        voice.receive(now, peer, &payload(3277));
        let clip = &sinks.clips(peer)[0];
        assert!((clip[0] - 0.25).abs() < 1e-3, "{}", clip[0]);

        assert_eq!(voice.set_output_volume(9.0), MAX_OUTPUT_VOLUME);
    }

    #[test]
    fn test_late_tick_restarts_cadence_from_now() {
        let (mut voice, _, _) = pipeline(false);
        let peer = PeerId::random();
        let start = Instant::now();
        for value in [1, 2, 3] {
            voice.receive(start, peer, &payload(value));
        }

        // Far behind: next clip is timed from the late tick
        let late = start + frame_len() * 5;
        voice.playback_tick(late);
        voice.playback_tick(late + frame_len() / 2);
        assert_eq!(voice.buffered(peer), 1);
        voice.playback_tick(late + frame_len());
        assert_eq!(voice.buffered(peer), 0);
    }

    #[test]
    fn test_remove_peer_drops_stream() {
        let (mut voice, _, _) = pipeline(false);
        let peer = PeerId::random();
        let now = Instant::now();
        voice.receive(now, peer, &payload(1));
        voice.receive(now, peer, &payload(2));
        assert_eq!(voice.stream_count(), 1);

        voice.remove_peer(peer);
        assert!(!voice.has_stream(peer));
        voice.playback_tick(now + frame_len() * 2);
        assert_eq!(voice.stream_count(), 0);
    }
}
