//! Error types for the party session layer

use thiserror::Error;

use crate::protocol::{GroupId, PeerId};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Only the host may do this")]
    NotHost,

    #[error("Not in a group")]
    NotInGroup,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport and session errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send to {peer} failed: {reason}")]
    SendFailed { peer: PeerId, reason: String },

    #[error("No route to peer {0}")]
    UnknownPeer(PeerId),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Control-channel parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Payload is empty")]
    Empty,

    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    #[error("Unknown message tag: {0}")]
    UnknownTag(String),

    #[error("{tag} is missing field `{field}`")]
    MissingField { tag: &'static str, field: &'static str },

    #[error("{0} takes no fields")]
    UnexpectedField(&'static str),

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),
}

/// Voice codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty voice payload")]
    EmptyPayload,

    #[error("Odd payload length: {0} bytes")]
    OddLength(usize),
}

/// Membership oracle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Peer {0} is not a member")]
    NotAMember(PeerId),

    #[error("Group is full ({0} members)")]
    GroupFull(usize),

    #[error("Only the group owner may write")]
    NotOwner,

    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
