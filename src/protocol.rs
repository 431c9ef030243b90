//! Identifiers, channels and the control-channel wire protocol
//!
//! Control messages are `|`-delimited UTF-8 text with the type tag first:
//!
//! ```text
//! HELLO
//! HELLO_BACK
//! CHAT|<senderDisplayName>|<message>
//! HOST_CHANGE|<newHostPeerId>|<newHostDisplayName>
//! KICK
//! ```
//!
//! Voice payloads carry no header at all; the channel index alone tells them
//! apart from control traffic.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Stable, globally unique participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidPeerId(s.to_string()))
    }
}

/// Identifier of a group (lobby) held by the membership oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl GroupId {
    /// Join code derived from the id: its last six decimal digits
    pub fn join_code(&self) -> String {
        let digits = self.0.to_string();
        let start = digits.len().saturating_sub(6);
        digits[start..].to_string()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel a datagram travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Reliable, ordered per peer pair
    Control,
    /// Unreliable, unordered, lowest latency
    Voice,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Control, Channel::Voice];

    pub fn index(self) -> u8 {
        match self {
            Channel::Control => 0,
            Channel::Voice => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Channel::Control),
            1 => Some(Channel::Voice),
            _ => None,
        }
    }

    /// Delivery mode requested from the transport for this channel
    pub fn reliability(self) -> Reliability {
        match self {
            Channel::Control => Reliability::Reliable,
            Channel::Voice => Reliability::UnreliableNoDelay,
        }
    }
}

/// Delivery guarantee requested per datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    Reliable,
    UnreliableNoDelay,
}

const TAG_HELLO: &str = "HELLO";
const TAG_HELLO_ACK: &str = "HELLO_BACK";
const TAG_CHAT: &str = "CHAT";
const TAG_HOST_CHANGE: &str = "HOST_CHANGE";
const TAG_KICK: &str = "KICK";
const DELIMITER: char = '|';

/// Messages exchanged on the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello,
    HelloAck,
    Chat { sender: String, text: String },
    HostChange { new_host: PeerId, new_host_name: String },
    Kick,
}

impl ControlMessage {
    /// Wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            ControlMessage::Hello => TAG_HELLO,
            ControlMessage::HelloAck => TAG_HELLO_ACK,
            ControlMessage::Chat { .. } => TAG_CHAT,
            ControlMessage::HostChange { .. } => TAG_HOST_CHANGE,
            ControlMessage::Kick => TAG_KICK,
        }
    }

    /// Serialize to the delimited text form
    pub fn encode(&self) -> Bytes {
        let text = match self {
            ControlMessage::Hello | ControlMessage::HelloAck | ControlMessage::Kick => {
                self.tag().to_string()
            }
            ControlMessage::Chat { sender, text } => {
                format!("{TAG_CHAT}|{}|{}", inner_field(sender), text)
            }
            ControlMessage::HostChange { new_host, new_host_name } => {
                format!("{TAG_HOST_CHANGE}|{}|{}", new_host, new_host_name)
            }
        };
        Bytes::from(text)
    }

    /// Parse a control-channel payload
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::NotUtf8)?;

        let (tag, rest) = match text.split_once(DELIMITER) {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (text, None),
        };

        match tag {
            TAG_HELLO => no_fields(TAG_HELLO, rest).map(|_| ControlMessage::Hello),
            TAG_HELLO_ACK => no_fields(TAG_HELLO_ACK, rest).map(|_| ControlMessage::HelloAck),
            TAG_KICK => no_fields(TAG_KICK, rest).map(|_| ControlMessage::Kick),
            TAG_CHAT => {
                let rest = rest.ok_or(ProtocolError::MissingField { tag: TAG_CHAT, field: "sender" })?;
                let (sender, text) = rest
                    .split_once(DELIMITER)
                    .ok_or(ProtocolError::MissingField { tag: TAG_CHAT, field: "message" })?;
                Ok(ControlMessage::Chat {
                    sender: sender.to_string(),
                    text: text.to_string(),
                })
            }
            TAG_HOST_CHANGE => {
                let rest = rest.ok_or(ProtocolError::MissingField {
                    tag: TAG_HOST_CHANGE,
                    field: "newHost",
                })?;
                let (id, name) = rest.split_once(DELIMITER).ok_or(ProtocolError::MissingField {
                    tag: TAG_HOST_CHANGE,
                    field: "newHostDisplayName",
                })?;
                Ok(ControlMessage::HostChange {
                    new_host: id.parse()?,
                    new_host_name: name.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Chat { sender, .. } => write!(f, "CHAT from {sender}"),
            ControlMessage::HostChange { new_host, new_host_name } => {
                write!(f, "HOST_CHANGE to {new_host_name} ({})", new_host.short())
            }
            other => f.write_str(other.tag()),
        }
    }
}

fn no_fields(tag: &'static str, rest: Option<&str>) -> Result<(), ProtocolError> {
    match rest {
        None => Ok(()),
        Some(_) => Err(ProtocolError::UnexpectedField(tag)),
    }
}

/// Non-final fields must not contain the delimiter
fn inner_field(value: &str) -> String {
    value.replace(DELIMITER, "/")
}
