//! Network subsystem: transports, channel multiplexing and peer sessions

pub mod loopback;
pub mod multiplexer;
pub mod session;
pub mod transport;
pub mod udp;

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use multiplexer::{ChannelMultiplexer, Inbound};
pub use session::{PeerSessionManager, SessionState, SessionStats};
pub use transport::Transport;
pub use udp::{create_socket, UdpTransport};
