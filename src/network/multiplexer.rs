//! Channel multiplexer
//!
//! Demultiplexes inbound datagrams by channel index. Holds no buffers of its
//! own: each poll drains whatever the transport has queued for one channel.

use bytes::Bytes;

use crate::network::transport::Transport;
use crate::protocol::{Channel, PeerId};

/// A datagram received on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub sender: PeerId,
    pub payload: Bytes,
}

/// Per-channel receive statistics
#[derive(Debug, Clone, Default)]
pub struct MultiplexerStats {
    pub control_datagrams: u64,
    pub voice_datagrams: u64,
    pub bytes_received: u64,
}

pub struct ChannelMultiplexer {
    stats: MultiplexerStats,
}

impl ChannelMultiplexer {
    pub fn new() -> Self {
        Self {
            stats: MultiplexerStats::default(),
        }
    }

    /// Drain every datagram currently queued on `channel`
    pub fn poll<T: Transport>(&mut self, transport: &mut T, channel: Channel) -> Vec<Inbound> {
        let mut received = Vec::new();
        while transport.poll_available(channel).is_some() {
            let Some((sender, payload)) = transport.read_datagram(channel) else {
                break;
            };
            self.stats.bytes_received += payload.len() as u64;
            match channel {
                Channel::Control => self.stats.control_datagrams += 1,
                Channel::Voice => self.stats.voice_datagrams += 1,
            }
            received.push(Inbound { sender, payload });
        }
        received
    }

    pub fn stats(&self) -> &MultiplexerStats {
        &self.stats
    }
}

impl Default for ChannelMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
