//! Host authority coordinator
//!
//! Keeps the single "who is host" fact for this node and drives the
//! handoff protocol.
//!
//! ```text
//!                 begin_voluntary_leave (host, successor found)
//!   ┌────────┐ ───────────────────────────────────────────▶ ┌────────────────┐
//!   │ Stable │                                               │ HandoffPending │──▶ grace expires ──▶ leave
//!   └────────┘ ◀──────────┐                                  └────────────────┘
//!       │                 │ oracle owner read
//!       │ member left /   │
//!       │ owner changed   │
//!       ▼                 │
//!   ┌─────────────┐ ──────┘
//!   │ Reconciling │  (stays here while the oracle cannot be read)
//!   └─────────────┘
//! ```
//!
//! The cached host is only ever a cache. Reconciliation always re-reads the
//! oracle's true owner and compares it to the local id; it never trusts the
//! `host` metadata or what other peers claimed.

use std::time::{Duration, Instant};

use crate::config::PartyConfig;
use crate::constants::HOST_KEY;
use crate::network::{PeerSessionManager, Transport};
use crate::oracle::MembershipOracle;
use crate::protocol::{Channel, ControlMessage, GroupId, PeerId};
use crate::timer::{Scheduler, TimerToken};

/// Cached view of who hosts the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    cached_host: Option<PeerId>,
    is_self_host: bool,
}

impl HostState {
    fn unknown() -> Self {
        Self {
            cached_host: None,
            is_self_host: false,
        }
    }

    fn set(&mut self, host: Option<PeerId>, local: PeerId) {
        self.cached_host = host;
        self.is_self_host = host == Some(local);
    }

    pub fn cached_host(&self) -> Option<PeerId> {
        self.cached_host
    }

    pub fn is_self_host(&self) -> bool {
        self.is_self_host
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// One host, known and self-consistent
    Stable,
    /// We are leaving as host; successor announced, waiting out the grace period
    HandoffPending,
    /// Membership changed and the true owner has not been confirmed yet
    Reconciling,
}

/// Why a leave skipped the handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateLeave {
    NotHost,
    LastMember,
    NoSuccessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Disconnect now
    Immediate(ImmediateLeave),
    /// Disconnect when the grace period ends
    Deferred { successor: PeerId, until: Instant },
    /// A handoff is already in flight
    AlreadyPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// We became host and announced it
    Promoted,
    /// We were host and no longer are
    Demoted { new_host: PeerId },
    /// Another peer hosts; the cache now points at it
    Follower { host: PeerId },
    /// Nothing to do while a handoff is pending
    Skipped,
    /// The oracle could not be read; try again next tick
    Unresolved,
}

/// What the timers asked the owner to do this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostTick {
    pub handoff_complete: bool,
    pub reconciled: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostTimer {
    HandoffComplete,
    Reconcile,
}

pub struct HostAuthority {
    local: PeerId,
    group: GroupId,
    state: HostState,
    phase: HostPhase,
    grace: Duration,
    reconcile_interval: Duration,
    timers: Scheduler<HostTimer>,
    handoff: Option<TimerToken>,
    periodic: Option<TimerToken>,
}

impl HostAuthority {
    pub fn new(local: PeerId, group: GroupId, config: &PartyConfig) -> Self {
        Self {
            local,
            group,
            state: HostState::unknown(),
            phase: HostPhase::Reconciling,
            grace: config.handoff_grace(),
            reconcile_interval: config.reconcile_interval(),
            timers: Scheduler::new(),
            handoff: None,
            periodic: None,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn is_self_host(&self) -> bool {
        self.state.is_self_host
    }

    pub fn cached_host(&self) -> Option<PeerId> {
        self.state.cached_host
    }

    /// Whether `sender` is allowed to issue host-only commands to us
    pub fn is_host(&self, sender: PeerId) -> bool {
        self.state.cached_host == Some(sender)
    }

    /// First read after joining or creating the group; starts periodic reconciliation
    pub fn initialize<O: MembershipOracle>(&mut self, now: Instant, oracle: &O) {
        match oracle.get_owner(self.group) {
            Ok(owner) => {
                self.state.set(Some(owner), self.local);
                self.phase = HostPhase::Stable;
                if self.state.is_self_host {
                    self.write_host_attribute(oracle);
                }
                tracing::info!(
                    "Host of group {} is {}{}",
                    self.group,
                    owner.short(),
                    if self.state.is_self_host { " (us)" } else { "" }
                );
            }
            Err(e) => {
                tracing::warn!("Could not read group owner, will retry: {}", e);
                self.phase = HostPhase::Reconciling;
            }
        }
        self.schedule_periodic(now);
    }

    /// Start leaving the group. A host with peers left hands authority to
    /// the first other member in the oracle's order before going.
    pub fn begin_voluntary_leave<T: Transport, O: MembershipOracle>(
        &mut self,
        now: Instant,
        oracle: &O,
        sessions: &mut PeerSessionManager<T>,
    ) -> LeaveOutcome {
        if self.phase == HostPhase::HandoffPending {
            return LeaveOutcome::AlreadyPending;
        }
        if !self.state.is_self_host {
            return LeaveOutcome::Immediate(ImmediateLeave::NotHost);
        }

        let members = match oracle.list_members(self.group) {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!("Could not list members for handoff: {}", e);
                return LeaveOutcome::Immediate(ImmediateLeave::NoSuccessor);
            }
        };
        if members.len() <= 1 {
            tracing::info!("Last member leaving, no handoff needed");
            return LeaveOutcome::Immediate(ImmediateLeave::LastMember);
        }
        let Some(successor) = members.iter().copied().find(|m| *m != self.local) else {
            tracing::warn!("No successor available, leaving without handoff");
            return LeaveOutcome::Immediate(ImmediateLeave::NoSuccessor);
        };

        // Metadata first: once ownership moves we may no longer write
        if let Err(e) = oracle.set_attribute(self.group, HOST_KEY, &successor.to_string()) {
            tracing::warn!("Host metadata write failed: {}", e);
        }
        if let Err(e) = oracle.set_owner(self.group, successor) {
            tracing::warn!("Ownership transfer to {} failed: {}", successor.short(), e);
        }

        let name = oracle.display_name(successor);
        let announcement = ControlMessage::HostChange {
            new_host: successor,
            new_host_name: name.clone(),
        };
        let reached = sessions.broadcast(&announcement.encode(), Channel::Control);
        tracing::info!(
            "Handing host to {} ({}), announced to {} peers",
            name,
            successor.short(),
            reached
        );

        self.state.set(Some(successor), self.local);
        self.phase = HostPhase::HandoffPending;
        let token = self.timers.schedule_after(now, self.grace, HostTimer::HandoffComplete);
        self.handoff = Some(token);

        LeaveOutcome::Deferred {
            successor,
            until: now + self.grace,
        }
    }

    /// Correct the cached host against the oracle's true owner
    pub fn reconcile<T: Transport, O: MembershipOracle>(
        &mut self,
        oracle: &O,
        sessions: &mut PeerSessionManager<T>,
    ) -> ReconcileOutcome {
        if self.phase == HostPhase::HandoffPending {
            return ReconcileOutcome::Skipped;
        }
        self.phase = HostPhase::Reconciling;

        let owner = match oracle.get_owner(self.group) {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!("Reconciliation could not read owner: {}", e);
                return ReconcileOutcome::Unresolved;
            }
        };

        let was_host = self.state.is_self_host;
        self.state.set(Some(owner), self.local);
        self.phase = HostPhase::Stable;

        match (owner == self.local, was_host) {
            (true, false) => {
                tracing::info!("Oracle names us owner, taking over as host");
                self.write_host_attribute(oracle);
                let announcement = ControlMessage::HostChange {
                    new_host: self.local,
                    new_host_name: oracle.display_name(self.local),
                };
                sessions.broadcast(&announcement.encode(), Channel::Control);
                ReconcileOutcome::Promoted
            }
            (true, true) => ReconcileOutcome::Follower { host: self.local },
            (false, true) => {
                tracing::info!("Oracle names {} owner, stepping down", owner.short());
                ReconcileOutcome::Demoted { new_host: owner }
            }
            (false, false) => ReconcileOutcome::Follower { host: owner },
        }
    }

    /// Apply a `HOST_CHANGE` from a peer. Returns whether anything changed.
    pub fn apply_external_host_change(&mut self, new_host: PeerId) -> bool {
        let before = self.state;
        self.state.set(Some(new_host), self.local);
        let changed = before != self.state;
        if changed {
            tracing::info!(
                "Host changed to {}{}",
                new_host.short(),
                if self.state.is_self_host { " (us)" } else { "" }
            );
        }
        changed
    }

    /// Fire due timers. Periodic reconciliation reschedules itself, and a
    /// reconciliation left unresolved is retried every tick.
    pub fn on_tick<T: Transport, O: MembershipOracle>(
        &mut self,
        now: Instant,
        oracle: &O,
        sessions: &mut PeerSessionManager<T>,
    ) -> HostTick {
        let mut tick = HostTick::default();
        let mut reconcile_due = self.phase == HostPhase::Reconciling;

        for (token, timer) in self.timers.take_due(now) {
            match timer {
                HostTimer::HandoffComplete => {
                    if self.handoff == Some(token) {
                        self.handoff = None;
                        tick.handoff_complete = true;
                    }
                }
                HostTimer::Reconcile => {
                    reconcile_due = true;
                    self.periodic = None;
                    self.schedule_periodic(now);
                }
            }
        }

        if reconcile_due && !tick.handoff_complete {
            tick.reconciled = Some(self.reconcile(oracle, sessions));
        }
        tick
    }

    /// Drop every pending timer (explicit disconnect)
    pub fn cancel(&mut self) {
        if let Some(token) = self.handoff.take() {
            self.timers.cancel(token);
            tracing::debug!("Pending handoff cancelled");
        }
        if let Some(token) = self.periodic.take() {
            self.timers.cancel(token);
        }
        self.timers.clear();
        if self.phase == HostPhase::HandoffPending {
            self.phase = HostPhase::Stable;
        }
    }

    pub fn handoff_pending(&self) -> bool {
        self.handoff.is_some()
    }

    fn schedule_periodic(&mut self, now: Instant) {
        if self.periodic.is_none() {
            let token = self
                .timers
                .schedule_after(now, self.reconcile_interval, HostTimer::Reconcile);
            self.periodic = Some(token);
        }
    }

    fn write_host_attribute<O: MembershipOracle>(&self, oracle: &O) {
        if let Err(e) = oracle.set_attribute(self.group, HOST_KEY, &self.local.to_string()) {
            tracing::warn!("Host metadata write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LoopbackHub, LoopbackTransport};
    use crate::oracle::{InMemoryOracle, OracleHandle};
    use std::sync::Arc;

    struct Node {
        id: PeerId,
        oracle: OracleHandle,
        sessions: PeerSessionManager<LoopbackTransport>,
        host: HostAuthority,
    }

    fn group(n: usize) -> (Arc<InMemoryOracle>, LoopbackHub, GroupId, Vec<Node>) {
        let oracle = InMemoryOracle::shared();
        let hub = LoopbackHub::new();
        let ids: Vec<PeerId> = (0..n).map(|_| PeerId::random()).collect();
        let group = oracle.create_group(ids[0], 4);
        for id in &ids[1..] {
            oracle.join(group, *id).unwrap();
        }
        let now = Instant::now();
        let config = PartyConfig::default();
        let transports: Vec<_> = ids.iter().map(|&id| hub.endpoint(id)).collect();
        let nodes = ids
            .iter()
            .zip(transports)
            .map(|(&id, transport)| {
                oracle.register_name(id, format!("peer-{}", id.short()));
                let handle = oracle.handle(id);
                let mut sessions = PeerSessionManager::new(transport);
                sessions.connect_all(&ids);
                let mut host = HostAuthority::new(id, group, &config);
                host.initialize(now, &handle);
                Node {
                    id,
                    oracle: handle,
                    sessions,
                    host,
                }
            })
            .collect();
        (oracle, hub, group, nodes)
    }

    #[test]
    fn test_initialize_reads_owner() {
        let (_oracle, _hub, group, nodes) = group(3);
        assert!(nodes[0].host.is_self_host());
        assert!(!nodes[1].host.is_self_host());
        assert_eq!(nodes[2].host.cached_host(), Some(nodes[0].id));
        assert_eq!(nodes[0].host.phase(), HostPhase::Stable);
        assert_eq!(
            nodes[0].oracle.get_attribute(group, HOST_KEY).unwrap(),
            Some(nodes[0].id.to_string())
        );
    }

    #[test]
    fn test_voluntary_leave_hands_off_to_first_other_member() {
        let (oracle, hub, group, mut nodes) = group(3);
        let now = Instant::now();
        let b = nodes[1].id;
        let a = &mut nodes[0];

        let outcome = a.host.begin_voluntary_leave(now, &a.oracle, &mut a.sessions);
        assert_eq!(
            outcome,
            LeaveOutcome::Deferred {
                successor: b,
                until: now + Duration::from_millis(500)
            }
        );
        assert_eq!(oracle.owner(group).unwrap(), b);
        assert_eq!(oracle.attribute(group, HOST_KEY).unwrap(), Some(b.to_string()));
        assert!(!a.host.is_self_host());
        assert_eq!(a.host.phase(), HostPhase::HandoffPending);

        let announcements: Vec<_> = hub
            .control_sent_by(a.id)
            .into_iter()
            .filter(|(_, p)| p.starts_with(b"HOST_CHANGE"))
            .collect();
        assert_eq!(announcements.len(), 2);

        // Second attempt while the first is in flight
        assert_eq!(
            a.host.begin_voluntary_leave(now, &a.oracle, &mut a.sessions),
            LeaveOutcome::AlreadyPending
        );

        let early = a.host.on_tick(now + Duration::from_millis(100), &a.oracle, &mut a.sessions);
        assert!(!early.handoff_complete);
        let done = a.host.on_tick(now + Duration::from_millis(500), &a.oracle, &mut a.sessions);
        assert!(done.handoff_complete);
    }

    #[test]
    fn test_last_member_leaves_immediately() {
        let (_oracle, hub, _group, mut nodes) = group(1);
        let a = &mut nodes[0];
        let outcome = a.host.begin_voluntary_leave(Instant::now(), &a.oracle, &mut a.sessions);
        assert_eq!(outcome, LeaveOutcome::Immediate(ImmediateLeave::LastMember));
        assert!(hub.control_sent_by(a.id).is_empty());
    }

    #[test]
    fn test_non_host_leaves_immediately() {
        let (_oracle, _hub, _group, mut nodes) = group(2);
        let b = &mut nodes[1];
        let outcome = b.host.begin_voluntary_leave(Instant::now(), &b.oracle, &mut b.sessions);
        assert_eq!(outcome, LeaveOutcome::Immediate(ImmediateLeave::NotHost));
    }

    #[test]
    fn test_handoff_still_announced_when_oracle_write_fails() {
        let (oracle, hub, group, mut nodes) = group(2);
        let b = nodes[1].id;
        oracle.set_write_failures(true);
        let a = &mut nodes[0];

        let outcome = a.host.begin_voluntary_leave(Instant::now(), &a.oracle, &mut a.sessions);
        assert!(matches!(outcome, LeaveOutcome::Deferred { successor, .. } if successor == b));
        assert_eq!(oracle.owner(group).unwrap(), a.id);
        assert!(hub
            .control_sent_by(a.id)
            .iter()
            .any(|(to, p)| *to == b && p.starts_with(b"HOST_CHANGE")));
    }

    #[test]
    fn test_reconcile_promotes_new_owner_after_crash() {
        let (oracle, hub, group, mut nodes) = group(3);
        let (a, b, c) = (nodes[0].id, nodes[1].id, nodes[2].id);
        hub.disconnect(a);
        oracle.leave(group, a);

        let node_b = &mut nodes[1];
        node_b.sessions.remove(a);
        assert_eq!(
            node_b.host.reconcile(&node_b.oracle, &mut node_b.sessions),
            ReconcileOutcome::Promoted
        );
        assert!(node_b.host.is_self_host());
        assert_eq!(oracle.attribute(group, HOST_KEY).unwrap(), Some(b.to_string()));
        assert!(hub
            .control_sent_by(b)
            .iter()
            .any(|(to, p)| *to == c && p.starts_with(b"HOST_CHANGE")));

        // Running it again is a no-op
        assert_eq!(
            node_b.host.reconcile(&node_b.oracle, &mut node_b.sessions),
            ReconcileOutcome::Follower { host: b }
        );

        let node_c = &mut nodes[2];
        assert_eq!(
            node_c.host.reconcile(&node_c.oracle, &mut node_c.sessions),
            ReconcileOutcome::Follower { host: b }
        );
        assert_eq!(node_c.host.cached_host(), Some(b));
    }

    #[test]
    fn test_reconcile_overrides_forged_claims() {
        let (_oracle, _hub, _group, mut nodes) = group(2);
        let (a, b) = (nodes[0].id, nodes[1].id);

        // A believes a bogus announcement naming B
        let node_a = &mut nodes[0];
        assert!(node_a.host.apply_external_host_change(b));
        assert!(!node_a.host.is_self_host());
        assert_eq!(
            node_a.host.reconcile(&node_a.oracle, &mut node_a.sessions),
            ReconcileOutcome::Promoted
        );
        assert!(node_a.host.is_self_host());

        // B was told it is host but the oracle disagrees
        let node_b = &mut nodes[1];
        node_b.host.apply_external_host_change(b);
        assert!(node_b.host.is_self_host());
        assert_eq!(
            node_b.host.reconcile(&node_b.oracle, &mut node_b.sessions),
            ReconcileOutcome::Demoted { new_host: a }
        );
        assert_eq!(node_b.host.cached_host(), Some(a));
    }

    #[test]
    fn test_external_host_change_is_idempotent() {
        let (_oracle, _hub, _group, mut nodes) = group(3);
        let c = nodes[2].id;
        let node = &mut nodes[1];

        assert!(node.host.apply_external_host_change(c));
        let once = node.host.state();
        assert!(!node.host.apply_external_host_change(c));
        assert_eq!(node.host.state(), once);
        assert!(!node.host.is_self_host());

        assert!(node.host.apply_external_host_change(node.id));
        assert!(node.host.is_self_host());
    }

    #[test]
    fn test_periodic_reconcile_corrects_lost_announcement() {
        let (oracle, _hub, group, mut nodes) = group(3);
        let start = Instant::now();
        let (a, b) = (nodes[0].id, nodes[1].id);
        // Ownership moved but the HOST_CHANGE never reached C
        oracle.handle(a).set_owner(group, b).unwrap();

        let c = &mut nodes[2];
        assert_eq!(c.host.cached_host(), Some(a));
        let tick = c.host.on_tick(start + Duration::from_secs(1), &c.oracle, &mut c.sessions);
        assert_eq!(tick.reconciled, None);
        let tick = c.host.on_tick(start + Duration::from_secs(2), &c.oracle, &mut c.sessions);
        assert_eq!(tick.reconciled, Some(ReconcileOutcome::Follower { host: b }));
        assert_eq!(c.host.cached_host(), Some(b));
    }

    #[test]
    fn test_cancel_drops_pending_handoff() {
        let (_oracle, _hub, _group, mut nodes) = group(2);
        let now = Instant::now();
        let a = &mut nodes[0];
        a.host.begin_voluntary_leave(now, &a.oracle, &mut a.sessions);
        assert!(a.host.handoff_pending());

        a.host.cancel();
        assert!(!a.host.handoff_pending());
        let tick = a.host.on_tick(now + Duration::from_secs(5), &a.oracle, &mut a.sessions);
        assert!(!tick.handoff_complete);
    }
}
