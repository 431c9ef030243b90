//! # Party Voice
//!
//! Peer-to-peer session layer for a small real-time group: reliable control
//! messages and unreliable voice audio over direct links, plus a host-authority
//! migration protocol that keeps exactly one participant designated "host".
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                 PARTY NODE                                  │
//! │                                                                             │
//! │  ┌─────────────┐    ┌──────────────┐    ┌───────────────────────────────┐   │
//! │  │ Microphone  │───▶│ Voice        │───▶│  Peer Session Manager         │   │
//! │  │ (capture)   │    │ Pipeline     │    │  (network::session)           │   │
//! │  └─────────────┘    │  gate + PCM  │    │  broadcast / unicast          │   │
//! │                     └──────▲───────┘    └──────────────┬────────────────┘   │
//! │                            │                           │                    │
//! │  ┌─────────────┐    ┌──────┴───────┐                   ▼                    │
//! │  │ Speakers    │◀───│ Jitter       │    ┌───────────────────────────────┐   │
//! │  │ (per peer)  │    │ Buffers      │◀───│  Channel Multiplexer          │   │
//! │  └─────────────┘    └──────────────┘    │  ch 0 = Control (reliable)    │   │
//! │                                         │  ch 1 = Voice (unreliable)    │   │
//! │  ┌─────────────┐    ┌──────────────┐    └──────────────┬────────────────┘   │
//! │  │ Chat sink   │◀───│ Control      │◀──────────────────┘                    │
//! │  └─────────────┘    │ Dispatcher   │                                        │
//! │                     └──────┬───────┘                                        │
//! │                            ▼                                                │
//! │                     ┌──────────────┐    ┌───────────────────────────────┐   │
//! │                     │ Host         │◀──▶│  Membership Oracle            │   │
//! │                     │ Authority    │    │  (members, owner, metadata)   │   │
//! │                     └──────────────┘    └───────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is advanced by [`party::Party::tick`] on a single execution
//! context. Timers (handoff grace, playback pacing) are deadline entries in a
//! [`timer::Scheduler`], never blocking sleeps.

pub mod audio;
pub mod chat;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod network;
pub mod oracle;
pub mod party;
pub mod protocol;
pub mod timer;
pub mod voice;

pub use error::{Error, Result};
pub use party::Party;
pub use protocol::{Channel, ControlMessage, GroupId, PeerId};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for voice (mono)
    pub const DEFAULT_SAMPLE_RATE: u32 = 11025;

    /// Default capture processing buffer in milliseconds
    pub const DEFAULT_PROCESSING_BUFFER_MS: u32 = 100;

    /// Mean absolute amplitude below which a capture buffer is not sent
    pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;

    /// Frames that must be queued before a sender's playback starts
    pub const JITTER_START_DEPTH: usize = 2;

    /// Default per-sender jitter buffer capacity (in frames)
    pub const DEFAULT_JITTER_CAPACITY: usize = 8;

    /// Largest group the party layer is meant for
    pub const MAX_PARTY_SIZE: usize = 4;

    /// Default handoff grace period in milliseconds
    pub const DEFAULT_HANDOFF_GRACE_MS: u64 = 500;

    /// Default periodic reconciliation interval in milliseconds
    pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 2000;

    /// Default UDP port for the party transport
    pub const DEFAULT_UDP_PORT: u16 = 27015;

    /// Maximum datagram size accepted by the UDP transport
    pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

    /// Capture ring capacity in samples (two seconds at the default rate)
    pub const CAPTURE_RING_CAPACITY: usize = DEFAULT_SAMPLE_RATE as usize * 2;

    /// Group metadata key holding the host's peer id
    pub const HOST_KEY: &str = "host";
}
