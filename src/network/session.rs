//! Peer session manager
//!
//! Tracks which peers have a point-to-point link with this node and sends
//! datagrams to them. Sends are fire-and-forget: a failure is logged and
//! counted, never retried.

use std::collections::HashMap;

use crate::network::transport::Transport;
use crate::protocol::{Channel, ControlMessage, PeerId};

/// Lifecycle of a link with one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// We sent the first datagram, nothing heard back yet
    Requested,
    /// Traffic seen in both directions or accepted from the remote side
    Active,
    /// Torn down
    Closed,
}

/// Send statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

pub struct PeerSessionManager<T: Transport> {
    transport: T,
    local: PeerId,
    /// Tracked peers in the order they were added
    order: Vec<PeerId>,
    states: HashMap<PeerId, SessionState>,
    stats: SessionStats,
}

impl<T: Transport> PeerSessionManager<T> {
    pub fn new(transport: T) -> Self {
        let local = transport.local_id();
        Self {
            transport,
            local,
            order: Vec::new(),
            states: HashMap::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Accept an inbound connection request. Returns true if the peer is new.
    pub fn accept_incoming(&mut self, peer: PeerId) -> bool {
        if peer == self.local {
            return false;
        }
        if let Err(e) = self.transport.accept_session(peer) {
            tracing::warn!("Failed to accept session from {}: {}", peer.short(), e);
            return false;
        }
        match self.states.get(&peer) {
            Some(SessionState::Active) => false,
            Some(_) => {
                self.states.insert(peer, SessionState::Active);
                false
            }
            None => {
                self.order.push(peer);
                self.states.insert(peer, SessionState::Active);
                tracing::info!(
                    "Peer {} connected ({} peers tracked)",
                    peer.short(),
                    self.order.len()
                );
                true
            }
        }
    }

    /// Open links to every member not tracked yet by sending `HELLO`.
    /// Returns the number of new peers.
    pub fn connect_all(&mut self, members: &[PeerId]) -> usize {
        let hello = ControlMessage::Hello.encode();
        let mut connected = 0;
        for &member in members {
            if member == self.local || self.states.contains_key(&member) {
                continue;
            }
            tracing::debug!("Connecting to {}", member.short());
            self.send(member, &hello, Channel::Control);
            self.order.push(member);
            self.states.insert(member, SessionState::Requested);
            connected += 1;
        }
        if connected > 0 {
            tracing::info!("Connected to {} new peers ({} tracked)", connected, self.order.len());
        }
        connected
    }

    /// Note that traffic arrived from `peer`
    pub fn mark_active(&mut self, peer: PeerId) {
        if let Some(state) = self.states.get_mut(&peer) {
            if *state == SessionState::Requested {
                *state = SessionState::Active;
            }
        }
    }

    /// Fire-and-forget send. Returns whether the transport took the datagram.
    pub fn send(&mut self, peer: PeerId, payload: &[u8], channel: Channel) -> bool {
        match self
            .transport
            .send_datagram(peer, payload, channel, channel.reliability())
        {
            Ok(()) => {
                self.stats.datagrams_sent += 1;
                self.stats.bytes_sent += payload.len() as u64;
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                match channel {
                    Channel::Control => tracing::warn!("Control send failed: {}", e),
                    Channel::Voice => tracing::debug!("Voice send failed: {}", e),
                }
                false
            }
        }
    }

    /// Send to every tracked peer. Returns how many sends succeeded.
    pub fn broadcast(&mut self, payload: &[u8], channel: Channel) -> usize {
        let peers = self.order.clone();
        peers
            .into_iter()
            .filter(|&peer| self.send(peer, payload, channel))
            .count()
    }

    /// Stop tracking one peer and close its link
    pub fn remove(&mut self, peer: PeerId) -> bool {
        if self.states.remove(&peer).is_none() {
            return false;
        }
        self.order.retain(|p| *p != peer);
        self.transport.close_session(peer);
        tracing::info!("Session with {} closed ({} peers tracked)", peer.short(), self.order.len());
        true
    }

    /// Close every session. Safe with zero peers.
    pub fn disconnect_all(&mut self) {
        for peer in self.order.drain(..) {
            self.transport.close_session(peer);
        }
        self.states.clear();
        tracing::info!("All sessions closed");
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.states.contains_key(peer)
    }

    pub fn state(&self, peer: &PeerId) -> SessionState {
        self.states.get(peer).copied().unwrap_or(SessionState::Closed)
    }

    /// Tracked peers in the order they were added
    pub fn peers(&self) -> &[PeerId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}
