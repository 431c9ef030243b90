//! Point-to-point transport contract
//!
//! The party layer never talks to sockets directly. Anything that can move
//! datagrams between peers on two independent channels (a relay service, a
//! LAN socket, an in-process hub) plugs in here.

use bytes::Bytes;

use crate::error::NetworkError;
use crate::protocol::{Channel, PeerId, Reliability};

pub trait Transport {
    /// Identity this transport sends as
    fn local_id(&self) -> PeerId;

    /// Accept a pending inbound connection from `peer`
    fn accept_session(&mut self, peer: PeerId) -> Result<(), NetworkError>;

    /// Send one datagram. Sending to a peer with no session opens one.
    fn send_datagram(
        &mut self,
        peer: PeerId,
        payload: &[u8],
        channel: Channel,
        reliability: Reliability,
    ) -> Result<(), NetworkError>;

    /// Size of the next queued datagram on `channel`, if any
    fn poll_available(&mut self, channel: Channel) -> Option<usize>;

    /// Take the next queued datagram on `channel`
    fn read_datagram(&mut self, channel: Channel) -> Option<(PeerId, Bytes)>;

    /// Tear down the session with `peer`
    fn close_session(&mut self, peer: PeerId);

    /// Inbound connection requests raised since the last call
    fn take_session_requests(&mut self) -> Vec<PeerId>;
}
