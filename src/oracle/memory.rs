//! Shared in-memory lobby service
//!
//! Plays the role of the external membership service for tests and the
//! in-process demo. Behaves like a hosted lobby backend: only the owner may
//! write, groups have a member limit, and when the owner leaves the first
//! remaining member (join order) becomes owner.

use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::OracleError;
use crate::oracle::{MembershipEvent, MembershipOracle};
use crate::protocol::{GroupId, PeerId};

/// First id handed out; mimics the magnitude of hosted lobby ids
const GROUP_ID_BASE: u64 = 109_775_240_000_000_000;

struct Group {
    members: Vec<PeerId>,
    owner: PeerId,
    attributes: HashMap<String, String>,
    member_limit: usize,
}

pub struct InMemoryOracle {
    groups: DashMap<GroupId, Group>,
    names: DashMap<PeerId, String>,
    inboxes: DashMap<PeerId, VecDeque<MembershipEvent>>,
    next_group: AtomicU64,
    write_failures: AtomicBool,
}

impl InMemoryOracle {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            names: DashMap::new(),
            inboxes: DashMap::new(),
            next_group: AtomicU64::new(GROUP_ID_BASE),
            write_failures: AtomicBool::new(false),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A view of the oracle acting as `peer`
    pub fn handle(self: &Arc<Self>, peer: PeerId) -> OracleHandle {
        OracleHandle {
            oracle: Arc::clone(self),
            local: peer,
        }
    }

    pub fn register_name(&self, peer: PeerId, name: impl Into<String>) {
        self.names.insert(peer, name.into());
    }

    /// Make every subsequent write fail until switched off
    pub fn set_write_failures(&self, enabled: bool) {
        self.write_failures.store(enabled, Ordering::SeqCst);
    }

    pub fn create_group(&self, owner: PeerId, member_limit: usize) -> GroupId {
        let id = GroupId(self.next_group.fetch_add(1, Ordering::Relaxed));
        self.groups.insert(
            id,
            Group {
                members: vec![owner],
                owner,
                attributes: HashMap::new(),
                member_limit,
            },
        );
        tracing::debug!("Group {} created by {}", id, owner.short());
        id
    }

    pub fn join(&self, group: GroupId, peer: PeerId) -> Result<(), OracleError> {
        let others = {
            let mut entry = self
                .groups
                .get_mut(&group)
                .ok_or(OracleError::GroupNotFound(group))?;
            if entry.members.contains(&peer) {
                return Ok(());
            }
            if entry.members.len() >= entry.member_limit {
                return Err(OracleError::GroupFull(entry.member_limit));
            }
            let others = entry.members.clone();
            entry.members.push(peer);
            others
        };
        self.notify(&others, MembershipEvent::Entered { group, peer });
        Ok(())
    }

    /// Remove `peer`. Used both for a graceful leave and for a crash, which
    /// the service observes the same way.
    pub fn leave(&self, group: GroupId, peer: PeerId) {
        let (remaining, new_owner) = {
            let Some(mut entry) = self.groups.get_mut(&group) else {
                return;
            };
            let before = entry.members.len();
            entry.members.retain(|m| *m != peer);
            if entry.members.len() == before {
                return;
            }
            let new_owner = if entry.owner == peer {
                entry.members.first().copied()
            } else {
                None
            };
            if let Some(owner) = new_owner {
                entry.owner = owner;
            }
            (entry.members.clone(), new_owner)
        };

        if remaining.is_empty() {
            self.groups.remove(&group);
            tracing::debug!("Group {} closed", group);
            return;
        }
        self.notify(&remaining, MembershipEvent::Left { group, peer });
        if let Some(owner) = new_owner {
            self.notify(&remaining, MembershipEvent::OwnerChanged { group, owner });
        }
    }

    pub fn members(&self, group: GroupId) -> Result<Vec<PeerId>, OracleError> {
        self.groups
            .get(&group)
            .map(|g| g.members.clone())
            .ok_or(OracleError::GroupNotFound(group))
    }

    pub fn owner(&self, group: GroupId) -> Result<PeerId, OracleError> {
        self.groups
            .get(&group)
            .map(|g| g.owner)
            .ok_or(OracleError::GroupNotFound(group))
    }

    pub fn attribute(&self, group: GroupId, key: &str) -> Result<Option<String>, OracleError> {
        self.groups
            .get(&group)
            .map(|g| g.attributes.get(key).cloned())
            .ok_or(OracleError::GroupNotFound(group))
    }

    fn check_write(&self, group: &Group, actor: PeerId) -> Result<(), OracleError> {
        if self.write_failures.load(Ordering::SeqCst) {
            return Err(OracleError::WriteRejected("service unavailable".to_string()));
        }
        if group.owner != actor {
            return Err(OracleError::NotOwner);
        }
        Ok(())
    }

    fn write_attribute(
        &self,
        actor: PeerId,
        group: GroupId,
        key: &str,
        value: &str,
    ) -> Result<(), OracleError> {
        let mut entry = self
            .groups
            .get_mut(&group)
            .ok_or(OracleError::GroupNotFound(group))?;
        self.check_write(&entry, actor)?;
        entry.attributes.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn transfer_owner(&self, actor: PeerId, group: GroupId, owner: PeerId) -> Result<(), OracleError> {
        let members = {
            let mut entry = self
                .groups
                .get_mut(&group)
                .ok_or(OracleError::GroupNotFound(group))?;
            self.check_write(&entry, actor)?;
            if !entry.members.contains(&owner) {
                return Err(OracleError::NotAMember(owner));
            }
            if entry.owner == owner {
                return Ok(());
            }
            entry.owner = owner;
            entry.members.clone()
        };
        self.notify(&members, MembershipEvent::OwnerChanged { group, owner });
        Ok(())
    }

    fn notify(&self, recipients: &[PeerId], event: MembershipEvent) {
        for peer in recipients {
            self.inboxes.entry(*peer).or_default().push_back(event);
        }
    }

    fn drain_events(&self, peer: PeerId) -> Vec<MembershipEvent> {
        self.inboxes
            .get_mut(&peer)
            .map(|mut inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryOracle {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle on the shared oracle
#[derive(Clone)]
pub struct OracleHandle {
    oracle: Arc<InMemoryOracle>,
    local: PeerId,
}

impl OracleHandle {
    pub fn oracle(&self) -> &Arc<InMemoryOracle> {
        &self.oracle
    }
}

impl MembershipOracle for OracleHandle {
    fn list_members(&self, group: GroupId) -> Result<Vec<PeerId>, OracleError> {
        self.oracle.members(group)
    }

    fn get_attribute(&self, group: GroupId, key: &str) -> Result<Option<String>, OracleError> {
        self.oracle.attribute(group, key)
    }

    fn set_attribute(&self, group: GroupId, key: &str, value: &str) -> Result<(), OracleError> {
        self.oracle.write_attribute(self.local, group, key, value)
    }

    fn get_owner(&self, group: GroupId) -> Result<PeerId, OracleError> {
        self.oracle.owner(group)
    }

    fn set_owner(&self, group: GroupId, owner: PeerId) -> Result<(), OracleError> {
        self.oracle.transfer_owner(self.local, group, owner)
    }

    fn display_name(&self, peer: PeerId) -> String {
        self.oracle
            .names
            .get(&peer)
            .map(|name| name.value().clone())
            .unwrap_or_else(|| peer.short())
    }

    fn create_group(&self, member_limit: usize) -> Result<GroupId, OracleError> {
        Ok(self.oracle.create_group(self.local, member_limit))
    }

    fn join_group(&self, group: GroupId) -> Result<(), OracleError> {
        self.oracle.join(group, self.local)
    }

    fn leave_group(&self, group: GroupId) {
        self.oracle.leave(group, self.local)
    }

    fn poll_events(&self) -> Vec<MembershipEvent> {
        self.oracle.drain_events(self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(n: usize) -> (Arc<InMemoryOracle>, GroupId, Vec<PeerId>) {
        let oracle = InMemoryOracle::shared();
        let peers: Vec<PeerId> = (0..n).map(|_| PeerId::random()).collect();
        let group = oracle.create_group(peers[0], 4);
        for peer in &peers[1..] {
            oracle.join(group, *peer).unwrap();
        }
        (oracle, group, peers)
    }

    #[test]
    fn test_join_notifies_existing_members_only() {
        let (oracle, group, peers) = group_of(2);
        let a = oracle.handle(peers[0]);
        let b = oracle.handle(peers[1]);

        assert_eq!(
            a.poll_events(),
            vec![MembershipEvent::Entered { group, peer: peers[1] }]
        );
        assert!(b.poll_events().is_empty());
        assert_eq!(a.list_members(group).unwrap(), peers);
    }

    #[test]
    fn test_member_limit_is_enforced() {
        let (oracle, group, _) = group_of(4);
        assert_eq!(
            oracle.join(group, PeerId::random()),
            Err(OracleError::GroupFull(4))
        );
    }

    #[test]
    fn test_owner_leaving_promotes_first_remaining_member() {
        let (oracle, group, peers) = group_of(3);
        let c = oracle.handle(peers[2]);
        c.poll_events();

        oracle.leave(group, peers[0]);
        assert_eq!(oracle.owner(group).unwrap(), peers[1]);
        assert_eq!(
            c.poll_events(),
            vec![
                MembershipEvent::Left { group, peer: peers[0] },
                MembershipEvent::OwnerChanged { group, owner: peers[1] },
            ]
        );
    }

    #[test]
    fn test_only_owner_may_write() {
        let (oracle, group, peers) = group_of(2);
        let owner = oracle.handle(peers[0]);
        let member = oracle.handle(peers[1]);

        assert_eq!(member.set_attribute(group, "type", "private"), Err(OracleError::NotOwner));
        assert_eq!(member.set_owner(group, peers[1]), Err(OracleError::NotOwner));

        owner.set_attribute(group, "type", "private").unwrap();
        assert_eq!(member.get_attribute(group, "type").unwrap().as_deref(), Some("private"));

        owner.set_owner(group, peers[1]).unwrap();
        assert_eq!(member.get_owner(group).unwrap(), peers[1]);
    }

    #[test]
    fn test_write_failures_can_be_injected() {
        let (oracle, group, peers) = group_of(2);
        let owner = oracle.handle(peers[0]);
        oracle.set_write_failures(true);
        assert!(matches!(
            owner.set_owner(group, peers[1]),
            Err(OracleError::WriteRejected(_))
        ));
        assert_eq!(oracle.owner(group).unwrap(), peers[0]);
    }

    #[test]
    fn test_last_member_leaving_closes_group() {
        let (oracle, group, peers) = group_of(1);
        oracle.leave(group, peers[0]);
        assert_eq!(oracle.members(group), Err(OracleError::GroupNotFound(group)));
    }

    #[test]
    fn test_display_name_falls_back_to_short_id() {
        let oracle = InMemoryOracle::shared();
        let peer = PeerId::random();
        let handle = oracle.handle(peer);
        assert_eq!(handle.display_name(peer), peer.short());
        oracle.register_name(peer, "Ayse");
        assert_eq!(handle.display_name(peer), "Ayse");
    }
}
