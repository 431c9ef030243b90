//! Party demo
//!
//! Runs three participants in one process: Ayse creates a group, Bora and Cem
//! join, Ayse talks (a synthetic tone) and then leaves, handing the host role
//! to Bora. Uses UDP on localhost unless `--loopback` is given. With
//! `--devices` (feature `device-audio`) Ayse talks through the default
//! microphone and the others listen on the default output device.

use anyhow::Result;
use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use party_voice::{
    audio::{RecordingSinks, RingCapture, SharedSampleRing},
    chat::SharedChatLog,
    config::{AppConfig, NetworkConfig},
    constants::CAPTURE_RING_CAPACITY,
    network::{LoopbackHub, Transport, UdpTransport},
    oracle::{InMemoryOracle, OracleHandle},
    party::{PartyIo, PartyPhase},
    Party, PeerId,
};

const NAMES: [&str; 3] = ["Ayse", "Bora", "Cem"];
const TICK: Duration = Duration::from_millis(20);
const TONE_HZ: f32 = 440.0;

struct Node<T: Transport> {
    party: Party<T, OracleHandle>,
    /// `None` when playing on a real device
    speakers: Option<RecordingSinks>,
    chat: SharedChatLog,
}

/// Audio and chat endpoints of one demo participant
struct NodeIo {
    party: PartyIo,
    /// Ring the tone generator writes into, if this node talks synthetically
    tone: Option<SharedSampleRing>,
    speakers: Option<RecordingSinks>,
    chat: SharedChatLog,
}

fn synthetic_io(talker: bool) -> NodeIo {
    let capture = RingCapture::new(CAPTURE_RING_CAPACITY);
    let ring = capture.writer();
    let speakers = RecordingSinks::new();
    let chat = SharedChatLog::default();
    NodeIo {
        party: PartyIo {
            capture: Box::new(capture),
            sinks: Box::new(speakers.clone()),
            chat: Box::new(chat.clone()),
        },
        tone: talker.then_some(ring),
        speakers: Some(speakers),
        chat,
    }
}

#[cfg(feature = "device-audio")]
fn device_io(config: &AppConfig, talker: bool) -> Result<NodeIo> {
    use party_voice::audio::{CaptureSource, MicrophoneCapture, SinkFactory, SpeakerSinks};

    let chat = SharedChatLog::default();
    let (capture, sinks): (Box<dyn CaptureSource>, Box<dyn SinkFactory>) = if talker {
        let mut microphone =
            MicrophoneCapture::new(None, config.voice.sample_rate, CAPTURE_RING_CAPACITY);
        microphone.start()?;
        (Box::new(microphone), Box::new(RecordingSinks::new()))
    } else {
        (Box::new(RingCapture::new(CAPTURE_RING_CAPACITY)), Box::new(SpeakerSinks))
    };
    Ok(NodeIo {
        party: PartyIo {
            capture,
            sinks,
            chat: Box::new(chat.clone()),
        },
        tone: None,
        speakers: None,
        chat,
    })
}

#[cfg(not(feature = "device-audio"))]
fn device_io(_config: &AppConfig, _talker: bool) -> Result<NodeIo> {
    anyhow::bail!("--devices needs a build with the `device-audio` feature")
}

#[cfg(feature = "device-audio")]
fn log_devices() -> Result<()> {
    let devices = party_voice::audio::list_devices();
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

#[cfg(not(feature = "device-audio"))]
fn log_devices() -> Result<()> {
    Ok(())
}

/// Bind one UDP socket per participant on localhost and introduce them to
/// each other
fn udp_transports(ids: &[PeerId]) -> Result<Vec<UdpTransport>> {
    let network = NetworkConfig {
        bind_address: "127.0.0.1".to_string(),
        udp_port: 0,
        ..Default::default()
    };
    let mut transports = ids
        .iter()
        .map(|&id| UdpTransport::bind(id, &network))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let addrs: Vec<SocketAddr> = transports
        .iter()
        .map(|t| t.local_addr())
        .collect::<std::result::Result<_, _>>()?;

    for (i, transport) in transports.iter_mut().enumerate() {
        tracing::info!("{} listening on {}", NAMES[i], addrs[i]);
        for (j, &addr) in addrs.iter().enumerate() {
            if i != j {
                transport.register_peer(ids[j], addr);
            }
        }
    }
    Ok(transports)
}

async fn run<T: Transport>(
    config: AppConfig,
    ids: Vec<PeerId>,
    transports: Vec<T>,
    devices: bool,
) -> Result<()> {
    let oracle = InMemoryOracle::shared();
    for (id, name) in ids.iter().zip(NAMES) {
        oracle.register_name(*id, name);
    }

    let start = Instant::now();
    let mut transports = transports.into_iter();
    let mut nodes: Vec<Node<T>> = Vec::new();
    let mut mic: Option<SharedSampleRing> = None;

    for (i, &id) in ids.iter().enumerate() {
        let mut node_config = config.clone();
        node_config.party.display_name = NAMES[i].to_string();
        node_config.voice.microphone_enabled = i == 0;
        let node_io = if devices {
            device_io(&node_config, i == 0)?
        } else {
            synthetic_io(i == 0)
        };
        if node_io.tone.is_some() {
            mic = node_io.tone;
        }
        let transport = transports
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing transport for {}", NAMES[i]))?;

        let party = match nodes.first() {
            None => Party::create(&node_config, transport, oracle.handle(id), node_io.party, start)?,
            Some(host) => {
                let group = host.party.group();
                Party::join(&node_config, transport, oracle.handle(id), node_io.party, group, start)?
            }
        };
        nodes.push(Node {
            party,
            speakers: node_io.speakers,
            chat: node_io.chat,
        });
    }
    tracing::info!("Group join code: {}", nodes[0].party.group().join_code());

    let mut interval = tokio::time::interval(TICK);
    let mut phase = 0.0f32;
    let mut last = start;
    let (mut chatted, mut left) = (false, false);
    let mut next_report = start + Duration::from_secs(1);
    let sample_rate = config.voice.sample_rate as f32;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
        let now = Instant::now();
        let elapsed = now.duration_since(start);

        // Feed Ayse's microphone with whatever the tone produced since last tick
        let count = (now.duration_since(last).as_secs_f32() * sample_rate) as usize;
        last = now;
        if let Some(mic) = &mic {
            let tone: Vec<f32> = (0..count)
                .map(|_| {
                    phase = (phase + TAU * TONE_HZ / sample_rate) % TAU;
                    phase.sin() * 0.3
                })
                .collect();
            mic.push_slice(&tone);
        }

        if !chatted && elapsed >= Duration::from_secs(1) {
            nodes[1].party.send_chat("hi all")?;
            chatted = true;
        }
        if !left && elapsed >= Duration::from_secs(3) {
            let outcome = nodes[0].party.leave(now)?;
            tracing::info!("Ayse leaving: {:?}", outcome);
            left = true;
        }

        for node in nodes.iter_mut() {
            node.party.tick(now);
        }

        if now >= next_report {
            next_report += Duration::from_secs(1);
            for node in &nodes {
                let voice = node.party.voice().stats();
                tracing::info!(
                    "{}: host={} peers={} sent={} gated={} played={} decode_failures={}",
                    node.party.display_name(),
                    node.party.is_host(),
                    node.party.peers().len(),
                    voice.frames_sent,
                    voice.buffers_gated,
                    voice.frames_played,
                    voice.decode_failures
                );
            }
        }

        if elapsed >= Duration::from_secs(5) {
            break;
        }
    }

    for node in &nodes {
        let status = node.party.status();
        println!("{}", serde_json::to_string_pretty(&status)?);
        let speaker = nodes[0].party.local_id();
        if let Some(speakers) = &node.speakers {
            tracing::info!(
                "{} heard {} clips from Ayse",
                node.party.display_name(),
                speakers.clip_count(speaker)
            );
        }
        tracing::info!("{} has {} chat lines", node.party.display_name(), node.chat.len());
    }

    let hosts: Vec<&str> = nodes
        .iter()
        .filter(|n| n.party.phase() == PartyPhase::InGroup && n.party.is_host())
        .map(|n| n.party.display_name())
        .collect();
    tracing::info!("Host after handoff: {:?}", hosts);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting party demo");
    let config = AppConfig::load()?;
    let ids: Vec<PeerId> = NAMES.iter().map(|_| PeerId::random()).collect();
    let devices = std::env::args().any(|arg| arg == "--devices");
    if devices {
        log_devices()?;
    }

    if std::env::args().any(|arg| arg == "--loopback") {
        let hub = LoopbackHub::new();
        let transports: Vec<_> = ids.iter().map(|&id| hub.endpoint(id)).collect();
        run(config, ids, transports, devices).await
    } else {
        let transports = udp_transports(&ids)?;
        run(config, ids, transports, devices).await
    }
}
