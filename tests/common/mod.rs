//! Multi-node harness: several parties on one loopback hub and one oracle,
//! advanced in lockstep on virtual time.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use party_voice::audio::{RecordingSinks, RingCapture, SharedSampleRing};
use party_voice::chat::SharedChatLog;
use party_voice::config::AppConfig;
use party_voice::network::{LoopbackHub, LoopbackTransport};
use party_voice::oracle::{InMemoryOracle, OracleHandle};
use party_voice::party::{PartyIo, PartyPhase};
use party_voice::{GroupId, Party, PeerId};

pub type Node = Party<LoopbackTransport, OracleHandle>;

pub struct Member {
    pub name: String,
    pub party: Node,
    pub mic: SharedSampleRing,
    pub speakers: RecordingSinks,
    pub chat: SharedChatLog,
    pub crashed: bool,
}

impl Member {
    pub fn id(&self) -> PeerId {
        self.party.local_id()
    }

    /// Still ticking and not yet gone
    pub fn is_alive(&self) -> bool {
        !self.crashed && self.party.phase() != PartyPhase::Left
    }

    pub fn in_group(&self) -> bool {
        !self.crashed && self.party.phase() == PartyPhase::InGroup
    }
}

pub struct Cluster {
    pub oracle: Arc<InMemoryOracle>,
    pub hub: LoopbackHub,
    pub now: Instant,
    pub group: Option<GroupId>,
    pub members: Vec<Member>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            oracle: InMemoryOracle::shared(),
            hub: LoopbackHub::new(),
            now: Instant::now(),
            group: None,
            members: Vec::new(),
        }
    }

    fn config(name: &str, mic: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.party.display_name = name.to_string();
        config.voice.microphone_enabled = mic;
        config
    }

    fn io() -> (PartyIo, SharedSampleRing, RecordingSinks, SharedChatLog) {
        let capture = RingCapture::new(32 * 1024);
        let mic = capture.writer();
        let speakers = RecordingSinks::new();
        let chat = SharedChatLog::default();
        let io = PartyIo {
            capture: Box::new(capture),
            sinks: Box::new(speakers.clone()),
            chat: Box::new(chat.clone()),
        };
        (io, mic, speakers, chat)
    }

    /// First node: creates the group
    pub fn create(&mut self, name: &str, mic: bool) -> usize {
        let id = PeerId::random();
        self.oracle.register_name(id, name);
        let (io, mic_ring, speakers, chat) = Self::io();
        let party = Party::create(
            &Self::config(name, mic),
            self.hub.endpoint(id),
            self.oracle.handle(id),
            io,
            self.now,
        )
        .expect("create group");
        self.group = Some(party.group());
        self.push(name, party, mic_ring, speakers, chat)
    }

    /// Join the cluster's group; `None` if the oracle refused
    pub fn try_join(&mut self, name: &str, mic: bool) -> Option<usize> {
        let group = self.group?;
        let id = PeerId::random();
        self.oracle.register_name(id, name);
        let (io, mic_ring, speakers, chat) = Self::io();
        let party = Party::join(
            &Self::config(name, mic),
            self.hub.endpoint(id),
            self.oracle.handle(id),
            io,
            group,
            self.now,
        )
        .ok()?;
        Some(self.push(name, party, mic_ring, speakers, chat))
    }

    pub fn join(&mut self, name: &str, mic: bool) -> usize {
        self.try_join(name, mic).expect("join group")
    }

    fn push(
        &mut self,
        name: &str,
        party: Node,
        mic: SharedSampleRing,
        speakers: RecordingSinks,
        chat: SharedChatLog,
    ) -> usize {
        self.members.push(Member {
            name: name.to_string(),
            party,
            mic,
            speakers,
            chat,
            crashed: false,
        });
        self.members.len() - 1
    }

    pub fn group(&self) -> GroupId {
        self.group.expect("group created")
    }

    pub fn id(&self, index: usize) -> PeerId {
        self.members[index].id()
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.members[index].party
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.members[index].party
    }

    /// Advance virtual time and tick every live node in creation order
    pub fn step(&mut self, delta: Duration) {
        self.now += delta;
        let now = self.now;
        for member in self.members.iter_mut().filter(|m| !m.crashed) {
            member.party.tick(now);
        }
    }

    pub fn run(&mut self, rounds: usize, delta: Duration) {
        for _ in 0..rounds {
            self.step(delta);
        }
    }

    /// Kill a node without any goodbye: it stops ticking, its links go
    /// dead, and the oracle drops it as it would on a timeout
    pub fn crash(&mut self, index: usize) {
        let id = self.id(index);
        self.members[index].crashed = true;
        self.hub.disconnect(id);
        self.oracle.leave(self.group(), id);
    }

    pub fn in_group(&self) -> Vec<usize> {
        (0..self.members.len())
            .filter(|&i| self.members[i].in_group())
            .collect()
    }

    pub fn hosts(&self) -> Vec<usize> {
        self.in_group()
            .into_iter()
            .filter(|&i| self.members[i].party.is_host())
            .collect()
    }
}

/// Constant-amplitude frame, loud enough to pass the silence gate
pub fn tone_frame(level: f32, samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| if i % 2 == 0 { level } else { -level })
        .collect()
}
