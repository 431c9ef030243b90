//! Control message dispatcher
//!
//! Parses reliable-channel payloads and routes them. Anything that needs the
//! network (a reply, leaving after a kick) is handed back to the caller as a
//! [`Dispatch`] so this module never sends on its own.

use crate::chat::{ChatEntry, ChatSink};
use crate::host::HostAuthority;
use crate::network::Inbound;
use crate::protocol::{ControlMessage, PeerId};

/// What the caller should do after a control payload was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Fully handled here
    Handled,
    /// Send `message` back to `to`
    Reply { to: PeerId, message: ControlMessage },
    /// The host removed us from the party
    Kicked { by: PeerId },
    /// Dropped: malformed or not allowed
    Dropped,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub received: u64,
    pub malformed: u64,
    pub hellos: u64,
    pub chats: u64,
    pub host_changes: u64,
    pub kicks: u64,
    pub rejected_kicks: u64,
}

#[derive(Default)]
pub struct ControlDispatcher {
    stats: DispatchStats,
}

impl ControlDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(
        &mut self,
        inbound: &Inbound,
        host: &mut HostAuthority,
        chat: &mut dyn ChatSink,
    ) -> Dispatch {
        self.stats.received += 1;
        let message = match ControlMessage::parse(&inbound.payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::warn!("Dropping control payload from {}: {}", inbound.sender.short(), e);
                return Dispatch::Dropped;
            }
        };
        tracing::trace!("Control from {}: {}", inbound.sender.short(), message);

        match message {
            ControlMessage::Hello => {
                self.stats.hellos += 1;
                Dispatch::Reply {
                    to: inbound.sender,
                    message: ControlMessage::HelloAck,
                }
            }
            ControlMessage::HelloAck => Dispatch::Handled,
            ControlMessage::Chat { sender, text } => {
                self.stats.chats += 1;
                chat.deliver(ChatEntry::remote(inbound.sender, sender, text));
                Dispatch::Handled
            }
            ControlMessage::HostChange {
                new_host,
                new_host_name,
            } => {
                self.stats.host_changes += 1;
                if host.apply_external_host_change(new_host) {
                    tracing::info!("{} is now hosting", new_host_name);
                }
                Dispatch::Handled
            }
            ControlMessage::Kick => {
                if host.is_host(inbound.sender) {
                    self.stats.kicks += 1;
                    tracing::info!("Kicked by host {}", inbound.sender.short());
                    Dispatch::Kicked { by: inbound.sender }
                } else {
                    self.stats.rejected_kicks += 1;
                    tracing::warn!("Ignoring kick from non-host {}", inbound.sender.short());
                    Dispatch::Dropped
                }
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}
