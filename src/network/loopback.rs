//! In-process transport hub
//!
//! Every node attached to the same [`LoopbackHub`] can reach every other one.
//! Control datagrams are always delivered in send order; chosen voice
//! datagrams can be dropped to simulate a lossy link, and a node can be taken
//! offline to simulate a crash.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::NetworkError;
use crate::network::transport::Transport;
use crate::protocol::{Channel, PeerId, Reliability};

#[derive(Default)]
struct Endpoint {
    online: bool,
    inbox: [VecDeque<(PeerId, Bytes)>; 2],
    links: HashSet<PeerId>,
    requests: Vec<PeerId>,
}

#[derive(Default)]
struct HubInner {
    endpoints: HashMap<PeerId, Endpoint>,
    /// Voice ordinals (1-based, per directed link) to drop
    voice_drops: HashMap<(PeerId, PeerId), HashSet<u64>>,
    voice_counters: HashMap<(PeerId, PeerId), u64>,
    control_log: Vec<(PeerId, PeerId, Bytes)>,
    voice_sent: HashMap<PeerId, u64>,
}

/// Shared switchboard connecting loopback endpoints
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node and return its transport
    pub fn endpoint(&self, local: PeerId) -> LoopbackTransport {
        let mut inner = self.inner.lock();
        let endpoint = inner.endpoints.entry(local).or_default();
        endpoint.online = true;
        LoopbackTransport {
            hub: self.clone(),
            local,
        }
    }

    /// Take a node offline as if its process died
    pub fn disconnect(&self, peer: PeerId) {
        let mut inner = self.inner.lock();
        if let Some(endpoint) = inner.endpoints.get_mut(&peer) {
            endpoint.online = false;
            endpoint.inbox.iter_mut().for_each(VecDeque::clear);
            endpoint.links.clear();
            endpoint.requests.clear();
        }
    }

    /// Drop the given voice datagrams (1-based send order) on the link `from -> to`
    pub fn drop_voice(&self, from: PeerId, to: PeerId, ordinals: impl IntoIterator<Item = u64>) {
        self.inner
            .lock()
            .voice_drops
            .entry((from, to))
            .or_default()
            .extend(ordinals);
    }

    /// Control payloads sent by `from`, in order, with their destination
    pub fn control_sent_by(&self, from: PeerId) -> Vec<(PeerId, Bytes)> {
        self.inner
            .lock()
            .control_log
            .iter()
            .filter(|(sender, _, _)| *sender == from)
            .map(|(_, to, payload)| (*to, payload.clone()))
            .collect()
    }

    /// Voice datagrams `from` handed to the hub, including dropped ones
    pub fn voice_sent_by(&self, from: PeerId) -> u64 {
        self.inner.lock().voice_sent.get(&from).copied().unwrap_or(0)
    }

    /// Whether `local` currently has an open link to `peer`
    pub fn has_link(&self, local: PeerId, peer: PeerId) -> bool {
        self.inner
            .lock()
            .endpoints
            .get(&local)
            .map(|e| e.links.contains(&peer))
            .unwrap_or(false)
    }

    fn send(&self, from: PeerId, to: PeerId, payload: &[u8], channel: Channel) -> Result<(), NetworkError> {
        let mut inner = self.inner.lock();

        let sender_online = inner.endpoints.get(&from).map(|e| e.online).unwrap_or(false);
        let target_online = inner.endpoints.get(&to).map(|e| e.online).unwrap_or(false);
        if !sender_online || !target_online {
            return Err(NetworkError::SendFailed {
                peer: to,
                reason: "peer unreachable".to_string(),
            });
        }

        if let Some(endpoint) = inner.endpoints.get_mut(&from) {
            endpoint.links.insert(to);
        }

        let payload = Bytes::copy_from_slice(payload);
        match channel {
            Channel::Control => inner.control_log.push((from, to, payload.clone())),
            Channel::Voice => {
                *inner.voice_sent.entry(from).or_default() += 1;
                let counter = inner.voice_counters.entry((from, to)).or_default();
                *counter += 1;
                let ordinal = *counter;
                let dropped = inner
                    .voice_drops
                    .get(&(from, to))
                    .map(|set| set.contains(&ordinal))
                    .unwrap_or(false);
                if dropped {
                    return Ok(());
                }
            }
        }

        if let Some(target) = inner.endpoints.get_mut(&to) {
            if !target.links.contains(&from) && !target.requests.contains(&from) {
                target.requests.push(from);
            }
            target.inbox[channel.index() as usize].push_back((from, payload));
        }
        Ok(())
    }
}

/// One node's view of a [`LoopbackHub`]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    local: PeerId,
}

impl LoopbackTransport {
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> PeerId {
        self.local
    }

    fn accept_session(&mut self, peer: PeerId) -> Result<(), NetworkError> {
        let mut inner = self.hub.inner.lock();
        let endpoint = inner
            .endpoints
            .get_mut(&self.local)
            .ok_or(NetworkError::UnknownPeer(self.local))?;
        endpoint.requests.retain(|p| *p != peer);
        endpoint.links.insert(peer);
        Ok(())
    }

    fn send_datagram(
        &mut self,
        peer: PeerId,
        payload: &[u8],
        channel: Channel,
        _reliability: Reliability,
    ) -> Result<(), NetworkError> {
        self.hub.send(self.local, peer, payload, channel)
    }

    fn poll_available(&mut self, channel: Channel) -> Option<usize> {
        let inner = self.hub.inner.lock();
        inner
            .endpoints
            .get(&self.local)
            .and_then(|e| e.inbox[channel.index() as usize].front())
            .map(|(_, payload)| payload.len())
    }

    fn read_datagram(&mut self, channel: Channel) -> Option<(PeerId, Bytes)> {
        let mut inner = self.hub.inner.lock();
        inner
            .endpoints
            .get_mut(&self.local)
            .and_then(|e| e.inbox[channel.index() as usize].pop_front())
    }

    fn close_session(&mut self, peer: PeerId) {
        let mut inner = self.hub.inner.lock();
        if let Some(endpoint) = inner.endpoints.get_mut(&self.local) {
            endpoint.links.remove(&peer);
        }
    }

    fn take_session_requests(&mut self) -> Vec<PeerId> {
        let mut inner = self.hub.inner.lock();
        inner
            .endpoints
            .get_mut(&self.local)
            .map(|e| std::mem::take(&mut e.requests))
            .unwrap_or_default()
    }
}
