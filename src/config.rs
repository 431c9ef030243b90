//! Application configuration
//!
//! Persisted as TOML in the platform config directory. Missing files fall
//! back to defaults so a fresh install needs no setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub voice: VoiceConfig,
    pub party: PartyConfig,
}

/// Transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the UDP transport binds to
    pub bind_address: String,
    /// UDP port (0 = ephemeral)
    pub udp_port: u16,
    /// Largest datagram accepted or sent
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            udp_port: DEFAULT_UDP_PORT,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Voice pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Mono sample rate shared by every participant
    pub sample_rate: u32,
    /// Capture processing buffer length
    pub processing_buffer_ms: u32,
    /// Mean absolute amplitude below which a buffer is discarded
    pub silence_threshold: f32,
    /// Queued frames required before a sender starts playing
    pub jitter_start_depth: usize,
    /// Per-sender jitter buffer capacity in frames
    pub jitter_capacity: usize,
    /// Playback gain
    pub output_volume: f32,
    /// Microphone starts enabled
    pub microphone_enabled: bool,
    /// Playback (headphones) starts enabled
    pub playback_enabled: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            processing_buffer_ms: DEFAULT_PROCESSING_BUFFER_MS,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            jitter_start_depth: JITTER_START_DEPTH,
            jitter_capacity: DEFAULT_JITTER_CAPACITY,
            output_volume: 1.0,
            microphone_enabled: false,
            playback_enabled: true,
        }
    }
}

impl VoiceConfig {
    /// Samples in one capture processing buffer
    pub fn buffer_samples(&self) -> usize {
        (self.sample_rate as u64 * self.processing_buffer_ms as u64 / 1000) as usize
    }
}

/// Group and host-authority settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    /// Name shown to other participants
    pub display_name: String,
    /// Member limit used when creating a group
    pub member_limit: usize,
    /// Delay between broadcasting a handoff and disconnecting
    pub handoff_grace_ms: u64,
    /// Period of the background host reconciliation
    pub reconcile_interval_ms: u64,
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            display_name: "Player".to_string(),
            member_limit: MAX_PARTY_SIZE,
            handoff_grace_ms: DEFAULT_HANDOFF_GRACE_MS,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
        }
    }
}

impl PartyConfig {
    pub fn handoff_grace(&self) -> Duration {
        Duration::from_millis(self.handoff_grace_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "party-voice", "party-voice")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("no config directory on this platform".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let voice = &self.voice;
        if voice.sample_rate == 0 {
            return Err(Error::Config("voice.sample_rate must be positive".into()));
        }
        if voice.buffer_samples() == 0 {
            return Err(Error::Config("voice.processing_buffer_ms is too small".into()));
        }
        if voice.jitter_start_depth == 0 || voice.jitter_start_depth > voice.jitter_capacity {
            return Err(Error::Config(format!(
                "voice.jitter_start_depth must be in 1..={}",
                voice.jitter_capacity
            )));
        }
        if !(0.0..=5.0).contains(&voice.output_volume) {
            return Err(Error::Config("voice.output_volume must be in 0.0..=5.0".into()));
        }
        if !(0.0..=1.0).contains(&voice.silence_threshold) {
            return Err(Error::Config("voice.silence_threshold must be in 0.0..=1.0".into()));
        }
        if !(2..=MAX_PARTY_SIZE).contains(&self.party.member_limit) {
            return Err(Error::Config(format!(
                "party.member_limit must be in 2..={MAX_PARTY_SIZE}"
            )));
        }
        if self.party.handoff_grace_ms == 0 {
            return Err(Error::Config("party.handoff_grace_ms must be positive".into()));
        }
        if self.party.reconcile_interval_ms == 0 {
            return Err(Error::Config("party.reconcile_interval_ms must be positive".into()));
        }
        if self.network.max_datagram_size < 64 {
            return Err(Error::Config("network.max_datagram_size is too small".into()));
        }
        Ok(())
    }
}
