//! Party node
//!
//! Owns every service of one participant and advances them together in
//! [`Party::tick`]. Each tick runs, in order:
//!
//! 1. inbound session requests (accepted for current members only)
//! 2. membership events from the oracle
//! 3. the whole control channel, through the dispatcher
//! 4. host timers (handoff grace, periodic reconciliation)
//! 5. capture and voice broadcast
//! 6. the whole voice channel, into the jitter buffers
//! 7. paced playback

use serde::Serialize;
use std::time::Instant;

use crate::audio::{CaptureSource, SinkFactory};
use crate::chat::{ChatEntry, ChatSink};
use crate::config::AppConfig;
use crate::constants::HOST_KEY;
use crate::dispatch::{ControlDispatcher, Dispatch};
use crate::error::{Error, NetworkError, Result};
use crate::host::{HostAuthority, HostPhase, LeaveOutcome};
use crate::network::{ChannelMultiplexer, PeerSessionManager, Transport};
use crate::oracle::{MembershipEvent, MembershipOracle};
use crate::protocol::{Channel, ControlMessage, GroupId, PeerId};
use crate::voice::VoicePipeline;

const NAME_KEY: &str = "name";
const CODE_KEY: &str = "code";
const TYPE_KEY: &str = "type";

/// Lifecycle of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartyPhase {
    InGroup,
    /// Host handoff announced, waiting out the grace period
    Leaving,
    /// Terminal
    Left,
}

/// Group visibility stored in the `type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("private") => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

/// Local audio and chat endpoints of a node
pub struct PartyIo {
    pub capture: Box<dyn CaptureSource>,
    pub sinks: Box<dyn SinkFactory>,
    pub chat: Box<dyn ChatSink>,
}

/// Snapshot of a node for logs and the demo
#[derive(Debug, Clone, Serialize)]
pub struct PartyStatus {
    pub peer: PeerId,
    pub name: String,
    pub group: GroupId,
    pub join_code: String,
    pub phase: PartyPhase,
    pub is_host: bool,
    pub host: Option<PeerId>,
    pub peers: Vec<PeerId>,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub control_received: u64,
    pub control_malformed: u64,
    pub voice_frames_sent: u64,
    pub voice_frames_played: u64,
    pub voice_buffers_gated: u64,
    pub voice_decode_failures: u64,
    pub voice_untracked: u64,
    pub control_untracked: u64,
}

pub struct Party<T: Transport, O: MembershipOracle> {
    local: PeerId,
    group: GroupId,
    display_name: String,
    oracle: O,
    sessions: PeerSessionManager<T>,
    mux: ChannelMultiplexer,
    dispatcher: ControlDispatcher,
    host: HostAuthority,
    voice: VoicePipeline,
    chat: Box<dyn ChatSink>,
    phase: PartyPhase,
    /// Voice datagrams from peers without a tracked session
    voice_untracked: u64,
    /// Control datagrams from peers without a tracked session
    control_untracked: u64,
}

impl<T: Transport, O: MembershipOracle> Party<T, O> {
    /// Create a new group with this node as owner and host
    pub fn create(
        config: &AppConfig,
        transport: T,
        oracle: O,
        io: PartyIo,
        now: Instant,
    ) -> Result<Self> {
        let group = oracle.create_group(config.party.member_limit)?;
        let mut party = Self::assemble(config, transport, oracle, io, group);

        let lobby_name = format!("{}'s Lobby", party.display_name);
        let code = group.join_code();
        for (key, value) in [
            (NAME_KEY, lobby_name.as_str()),
            (CODE_KEY, code.as_str()),
            (TYPE_KEY, Visibility::Public.as_str()),
        ] {
            if let Err(e) = party.oracle.set_attribute(group, key, value) {
                tracing::warn!("Group metadata `{}` not written: {}", key, e);
            }
        }
        party.host.initialize(now, &party.oracle);

        tracing::info!(
            "Created group {} (code {}) as {}",
            group,
            code,
            party.local.short()
        );
        Ok(party)
    }

    /// Join an existing group and connect to everyone in it
    pub fn join(
        config: &AppConfig,
        transport: T,
        oracle: O,
        io: PartyIo,
        group: GroupId,
        now: Instant,
    ) -> Result<Self> {
        oracle.join_group(group)?;
        let members = oracle.list_members(group)?;
        let mut party = Self::assemble(config, transport, oracle, io, group);
        party.host.initialize(now, &party.oracle);
        party.sessions.connect_all(&members);

        tracing::info!(
            "Joined group {} with {} members",
            group,
            members.len()
        );
        Ok(party)
    }

    fn assemble(config: &AppConfig, transport: T, oracle: O, io: PartyIo, group: GroupId) -> Self {
        let sessions = PeerSessionManager::new(transport);
        let local = sessions.local_id();
        Self {
            local,
            group,
            display_name: config.party.display_name.clone(),
            oracle,
            sessions,
            mux: ChannelMultiplexer::new(),
            dispatcher: ControlDispatcher::new(),
            host: HostAuthority::new(local, group, &config.party),
            voice: VoicePipeline::new(&config.voice, io.capture, io.sinks),
            chat: io.chat,
            phase: PartyPhase::InGroup,
            voice_untracked: 0,
            control_untracked: 0,
        }
    }

    /// Advance every service by one step
    pub fn tick(&mut self, now: Instant) {
        if self.phase == PartyPhase::Left {
            return;
        }

        self.accept_session_requests();
        self.process_membership_events();

        if self.process_control() {
            tracing::info!("Removed from group {} by the host", self.group);
            self.finish_leave();
            return;
        }

        let host_tick = self.host.on_tick(now, &self.oracle, &mut self.sessions);
        if host_tick.handoff_complete {
            self.finish_leave();
            return;
        }

        if self.phase == PartyPhase::InGroup {
            for payload in self.voice.capture_tick() {
                self.sessions.broadcast(&payload, Channel::Voice);
            }
        }

        for datagram in self.mux.poll(self.sessions.transport_mut(), Channel::Voice) {
            if self.sessions.contains(&datagram.sender) {
                self.voice.receive(now, datagram.sender, &datagram.payload);
            } else {
                self.voice_untracked += 1;
            }
        }
        self.voice.playback_tick(now);
    }

    fn accept_session_requests(&mut self) {
        let requests = self.sessions.transport_mut().take_session_requests();
        if requests.is_empty() {
            return;
        }
        let members = match self.oracle.list_members(self.group) {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!("Cannot check session requests against membership: {}", e);
                return;
            }
        };
        for peer in requests {
            if members.contains(&peer) {
                self.sessions.accept_incoming(peer);
            } else {
                tracing::debug!("Ignoring session request from non-member {}", peer.short());
            }
        }
    }

    fn process_membership_events(&mut self) {
        let mut reconcile = false;
        for event in self.oracle.poll_events() {
            if event.group() != self.group {
                continue;
            }
            match event {
                MembershipEvent::Entered { peer, .. } => {
                    tracing::info!("{} joined", self.oracle.display_name(peer));
                    if self.host.is_self_host() {
                        match self.oracle.list_members(self.group) {
                            Ok(members) => {
                                self.sessions.connect_all(&members);
                            }
                            Err(e) => tracing::warn!("Cannot list members: {}", e),
                        }
                    }
                }
                MembershipEvent::Left { peer, .. } => {
                    tracing::info!("{} left", self.oracle.display_name(peer));
                    self.sessions.remove(peer);
                    self.voice.remove_peer(peer);
                    reconcile = true;
                }
                MembershipEvent::OwnerChanged { owner, .. } => {
                    tracing::debug!("Oracle reports owner {}", owner.short());
                    reconcile = true;
                }
            }
        }
        if reconcile && self.phase == PartyPhase::InGroup {
            self.host.reconcile(&self.oracle, &mut self.sessions);
        }
    }

    /// Dispatch everything queued on the control channel. Returns true when
    /// the host kicked us; later messages in the batch are ignored then.
    fn process_control(&mut self) -> bool {
        let inbound = self.mux.poll(self.sessions.transport_mut(), Channel::Control);
        for datagram in &inbound {
            if !self.sessions.contains(&datagram.sender) {
                self.control_untracked += 1;
                tracing::debug!("Ignoring control from untracked {}", datagram.sender.short());
                continue;
            }
            self.sessions.mark_active(datagram.sender);
            match self
                .dispatcher
                .dispatch(datagram, &mut self.host, self.chat.as_mut())
            {
                Dispatch::Reply { to, message } => {
                    self.sessions.send(to, &message.encode(), Channel::Control);
                }
                Dispatch::Kicked { .. } => return true,
                Dispatch::Handled | Dispatch::Dropped => {}
            }
        }
        false
    }

    /// Leave the group. A host with other members hands off first and
    /// disconnects once the grace period has passed.
    pub fn leave(&mut self, now: Instant) -> Result<LeaveOutcome> {
        match self.phase {
            PartyPhase::Left => return Err(Error::NotInGroup),
            PartyPhase::Leaving => return Ok(LeaveOutcome::AlreadyPending),
            PartyPhase::InGroup => {}
        }
        let outcome = self
            .host
            .begin_voluntary_leave(now, &self.oracle, &mut self.sessions);
        match outcome {
            LeaveOutcome::Immediate(reason) => {
                tracing::info!("Leaving group {} ({:?})", self.group, reason);
                self.finish_leave();
            }
            LeaveOutcome::Deferred { successor, .. } => {
                tracing::info!("Leaving after handing host to {}", successor.short());
                self.phase = PartyPhase::Leaving;
            }
            LeaveOutcome::AlreadyPending => {}
        }
        Ok(outcome)
    }

    /// Drop out at once, cancelling any pending handoff
    pub fn disconnect(&mut self) {
        if self.phase == PartyPhase::Left {
            return;
        }
        self.finish_leave();
    }

    fn finish_leave(&mut self) {
        self.host.cancel();
        self.oracle.leave_group(self.group);
        self.sessions.disconnect_all();
        self.voice.clear();
        self.phase = PartyPhase::Left;
        tracing::info!("Left group {}", self.group);
    }

    /// Show a chat line locally and send it to every peer.
    /// Returns false for blank input.
    pub fn send_chat(&mut self, text: &str) -> Result<bool> {
        self.ensure_in_group()?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        self.chat
            .deliver(ChatEntry::local(self.display_name.clone(), text.to_string()));
        let message = ControlMessage::Chat {
            sender: self.display_name.clone(),
            text: text.to_string(),
        };
        self.sessions.broadcast(&message.encode(), Channel::Control);
        Ok(true)
    }

    /// Host only: remove `peer` from the party
    pub fn kick(&mut self, peer: PeerId) -> Result<()> {
        self.ensure_in_group()?;
        if !self.host.is_self_host() {
            return Err(Error::NotHost);
        }
        if !self.sessions.contains(&peer) {
            return Err(NetworkError::UnknownPeer(peer).into());
        }
        tracing::info!("Kicking {}", self.oracle.display_name(peer));
        self.sessions
            .send(peer, &ControlMessage::Kick.encode(), Channel::Control);
        Ok(())
    }

    /// Host only: flip the group between public and private
    pub fn toggle_visibility(&mut self) -> Result<Visibility> {
        self.ensure_in_group()?;
        if !self.host.is_self_host() {
            return Err(Error::NotHost);
        }
        let current = self.oracle.get_attribute(self.group, TYPE_KEY)?;
        let next = match Visibility::parse(current.as_deref()) {
            Visibility::Public => Visibility::Private,
            Visibility::Private => Visibility::Public,
        };
        self.oracle.set_attribute(self.group, TYPE_KEY, next.as_str())?;
        tracing::info!("Group {} is now {}", self.group, next.as_str());
        Ok(next)
    }

    pub fn visibility(&self) -> Result<Visibility> {
        let current = self.oracle.get_attribute(self.group, TYPE_KEY)?;
        Ok(Visibility::parse(current.as_deref()))
    }

    fn ensure_in_group(&self) -> Result<()> {
        match self.phase {
            PartyPhase::InGroup => Ok(()),
            _ => Err(Error::NotInGroup),
        }
    }

    pub fn toggle_mute(&mut self, peer: PeerId) -> bool {
        self.voice.toggle_mute(peer)
    }

    pub fn set_muted(&mut self, peer: PeerId, muted: bool) {
        self.voice.set_muted(peer, muted);
    }

    pub fn is_muted(&self, peer: PeerId) -> bool {
        self.voice.is_muted(peer)
    }

    /// Returns the new microphone state
    pub fn toggle_microphone(&mut self) -> bool {
        let enabled = !self.voice.microphone_enabled();
        self.voice.set_microphone_enabled(enabled);
        enabled
    }

    pub fn set_microphone_enabled(&mut self, enabled: bool) {
        self.voice.set_microphone_enabled(enabled);
    }

    /// Returns the new playback state
    pub fn toggle_playback(&mut self) -> bool {
        let enabled = !self.voice.playback_enabled();
        self.voice.set_playback_enabled(enabled);
        enabled
    }

    pub fn set_playback_enabled(&mut self, enabled: bool) {
        self.voice.set_playback_enabled(enabled);
    }

    pub fn set_output_volume(&mut self, volume: f32) -> f32 {
        self.voice.set_output_volume(volume)
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn phase(&self) -> PartyPhase {
        self.phase
    }

    pub fn is_host(&self) -> bool {
        self.host.is_self_host()
    }

    pub fn cached_host(&self) -> Option<PeerId> {
        self.host.cached_host()
    }

    pub fn host_phase(&self) -> HostPhase {
        self.host.phase()
    }

    /// Tracked peers in connection order
    pub fn peers(&self) -> &[PeerId] {
        self.sessions.peers()
    }

    pub fn sessions(&self) -> &PeerSessionManager<T> {
        &self.sessions
    }

    pub fn voice(&self) -> &VoicePipeline {
        &self.voice
    }

    pub fn dispatcher(&self) -> &ControlDispatcher {
        &self.dispatcher
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// The `host` metadata currently stored for the group
    pub fn host_attribute(&self) -> Result<Option<String>> {
        Ok(self.oracle.get_attribute(self.group, HOST_KEY)?)
    }

    pub fn status(&self) -> PartyStatus {
        let sessions = self.sessions.stats();
        let dispatch = self.dispatcher.stats();
        let voice = self.voice.stats();
        PartyStatus {
            peer: self.local,
            name: self.display_name.clone(),
            group: self.group,
            join_code: self.group.join_code(),
            phase: self.phase,
            is_host: self.host.is_self_host(),
            host: self.host.cached_host(),
            peers: self.sessions.peers().to_vec(),
            datagrams_sent: sessions.datagrams_sent,
            send_failures: sessions.send_failures,
            control_received: dispatch.received,
            control_malformed: dispatch.malformed,
            voice_frames_sent: voice.frames_sent,
            voice_frames_played: voice.frames_played,
            voice_buffers_gated: voice.buffers_gated,
            voice_decode_failures: voice.decode_failures,
            voice_untracked: self.voice_untracked,
            control_untracked: self.control_untracked,
        }
    }
}
