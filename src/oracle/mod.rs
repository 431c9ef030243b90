//! Membership / ownership oracle
//!
//! The oracle is the external source of truth for who is in a group, who
//! owns it, and the group's key/value metadata. Local host state is a cache
//! of what the oracle says and is always corrected against a fresh read.

pub mod memory;

pub use memory::{InMemoryOracle, OracleHandle};

use crate::error::OracleError;
use crate::protocol::{GroupId, PeerId};

/// Membership changes observed by a group member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    Entered { group: GroupId, peer: PeerId },
    Left { group: GroupId, peer: PeerId },
    OwnerChanged { group: GroupId, owner: PeerId },
}

impl MembershipEvent {
    pub fn group(&self) -> GroupId {
        match *self {
            MembershipEvent::Entered { group, .. }
            | MembershipEvent::Left { group, .. }
            | MembershipEvent::OwnerChanged { group, .. } => group,
        }
    }
}

/// Operations a node performs against the oracle, acting as itself
pub trait MembershipOracle {
    /// Members in the oracle's enumeration order
    fn list_members(&self, group: GroupId) -> Result<Vec<PeerId>, OracleError>;

    fn get_attribute(&self, group: GroupId, key: &str) -> Result<Option<String>, OracleError>;

    fn set_attribute(&self, group: GroupId, key: &str, value: &str) -> Result<(), OracleError>;

    /// The group's true owner
    fn get_owner(&self, group: GroupId) -> Result<PeerId, OracleError>;

    fn set_owner(&self, group: GroupId, owner: PeerId) -> Result<(), OracleError>;

    /// Human-readable name of a participant
    fn display_name(&self, peer: PeerId) -> String;

    /// Create a group owned by this node
    fn create_group(&self, member_limit: usize) -> Result<GroupId, OracleError>;

    fn join_group(&self, group: GroupId) -> Result<(), OracleError>;

    fn leave_group(&self, group: GroupId);

    /// Events delivered to this node since the last call
    fn poll_events(&self) -> Vec<MembershipEvent>;
}
