//! UDP transport
//!
//! One non-blocking socket per node carries both channels. Each datagram is
//! framed as:
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────────────┐
//! │ channel  │ sender PeerId    │ payload             │
//! │ 1 byte   │ 16 bytes (uuid)  │ rest of datagram    │
//! └──────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! The socket is drained into per-channel queues on every poll. The control
//! channel inherits UDP's delivery model; on a LAN loss is rare and the party
//! protocol corrects itself through reconciliation.

use bytes::{BufMut, Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::transport::Transport;
use crate::protocol::{Channel, PeerId, Reliability};

const HEADER_LEN: usize = 1 + 16;

/// Create a non-blocking UDP socket bound to `addr`
pub fn create_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    // Room for a burst of voice frames from every peer
    socket
        .set_recv_buffer_size(256 * 1024)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{addr}: {e}")))?;

    Ok(socket.into())
}

/// Party transport over a single UDP socket
pub struct UdpTransport {
    local: PeerId,
    socket: UdpSocket,
    max_datagram_size: usize,
    /// Known peer addresses
    routes: HashMap<PeerId, SocketAddr>,
    /// Peers with an open session
    sessions: HashMap<PeerId, SocketAddr>,
    inbox: [VecDeque<(PeerId, Bytes)>; 2],
    requests: Vec<PeerId>,
    recv_buffer: Vec<u8>,
    invalid_packets: u64,
}

impl UdpTransport {
    pub fn bind(local: PeerId, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addr: SocketAddr = format!("{}:{}", config.bind_address, config.udp_port)
            .parse()
            .map_err(|e| NetworkError::BindFailed(format!("invalid bind address: {e}")))?;
        let socket = create_socket(addr)?;
        tracing::debug!("UDP transport for {} bound to {:?}", local.short(), socket.local_addr());

        Ok(Self {
            local,
            socket,
            max_datagram_size: config.max_datagram_size,
            routes: HashMap::new(),
            sessions: HashMap::new(),
            inbox: Default::default(),
            requests: Vec::new(),
            recv_buffer: vec![0u8; config.max_datagram_size + HEADER_LEN],
            invalid_packets: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Tell the transport where `peer` can be reached
    pub fn register_peer(&mut self, peer: PeerId, addr: SocketAddr) {
        self.routes.insert(peer, addr);
    }

    /// Datagrams discarded because their framing was invalid
    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets
    }

    /// Move everything the socket has queued into the channel queues
    fn pump(&mut self) {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((len, from)) => self.accept_datagram(len, from),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    // ICMP port unreachable from a departed peer
                    continue;
                }
                Err(e) => {
                    tracing::warn!("UDP receive failed: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_datagram(&mut self, len: usize, from: SocketAddr) {
        if len < HEADER_LEN {
            self.invalid_packets += 1;
            return;
        }
        let Some(channel) = Channel::from_index(self.recv_buffer[0]) else {
            self.invalid_packets += 1;
            return;
        };
        let mut id = [0u8; 16];
        id.copy_from_slice(&self.recv_buffer[1..HEADER_LEN]);
        let sender = PeerId::from_bytes(id);
        if sender == self.local {
            return;
        }

        self.routes.insert(sender, from);
        if !self.sessions.contains_key(&sender) && !self.requests.contains(&sender) {
            self.requests.push(sender);
        }

        let payload = Bytes::copy_from_slice(&self.recv_buffer[HEADER_LEN..len]);
        self.inbox[channel.index() as usize].push_back((sender, payload));
    }
}

impl Transport for UdpTransport {
    fn local_id(&self) -> PeerId {
        self.local
    }

    fn accept_session(&mut self, peer: PeerId) -> Result<(), NetworkError> {
        let addr = *self.routes.get(&peer).ok_or(NetworkError::UnknownPeer(peer))?;
        self.requests.retain(|p| *p != peer);
        self.sessions.insert(peer, addr);
        Ok(())
    }

    fn send_datagram(
        &mut self,
        peer: PeerId,
        payload: &[u8],
        channel: Channel,
        _reliability: Reliability,
    ) -> Result<(), NetworkError> {
        if payload.len() > self.max_datagram_size {
            return Err(NetworkError::PacketTooLarge(payload.len()));
        }
        let addr = *self.routes.get(&peer).ok_or(NetworkError::UnknownPeer(peer))?;
        self.sessions.entry(peer).or_insert(addr);

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u8(channel.index());
        frame.put_slice(self.local.as_bytes());
        frame.put_slice(payload);

        match self.socket.send_to(&frame, addr) {
            Ok(_) => Ok(()),
            Err(e) => Err(NetworkError::SendFailed {
                peer,
                reason: e.to_string(),
            }),
        }
    }

    fn poll_available(&mut self, channel: Channel) -> Option<usize> {
        self.pump();
        self.inbox[channel.index() as usize]
            .front()
            .map(|(_, payload)| payload.len())
    }

    fn read_datagram(&mut self, channel: Channel) -> Option<(PeerId, Bytes)> {
        self.pump();
        self.inbox[channel.index() as usize].pop_front()
    }

    fn close_session(&mut self, peer: PeerId) {
        self.sessions.remove(&peer);
    }

    fn take_session_requests(&mut self) -> Vec<PeerId> {
        self.pump();
        std::mem::take(&mut self.requests)
    }
}
