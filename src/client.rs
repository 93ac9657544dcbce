use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use tokio::{
    net::TcpStream,
    select, signal,
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::codec::Framed;

use crate::{
    config::ClientConfig,
    entity::{Entity, EntityKind},
    model::Vec3d,
    net::{
        codec::{ProtocolCodec, Side},
        endpoint::Endpoint,
        inbound::{InboundGate, InboundQueue},
        proto::{Packet, PROTOCOL_VERSION},
    },
    world::{pos::ChunkPos, ChunkSource, World, WorldStats},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// The requested number of frames ran.
    Ok,
    /// The user asked to quit.
    Exit,
    ExitServerDisconnect,
    ExitServerTimeout,
    CouldNotConnect,
}

/// Sends chunk requests to the server over the outbound channel.
pub struct NetworkChunkSource {
    outbound: mpsc::UnboundedSender<Packet>,
}

impl NetworkChunkSource {
    pub fn new(outbound: mpsc::UnboundedSender<Packet>) -> NetworkChunkSource {
        NetworkChunkSource { outbound }
    }
}

impl ChunkSource for NetworkChunkSource {
    fn request(&mut self, pos: ChunkPos) {
        debug!("Requesting chunk {:?}", pos);
        if self.outbound.send(Packet::C02RequestChunk { pos }).is_err() {
            trace!("Outbound channel closed, dropping request for {:?}", pos);
        }
    }
}

/// Milliseconds since `start`, shared between the reader task and the frame loop.
struct LastHeard {
    start: Instant,
    millis: AtomicU64,
}

impl LastHeard {
    fn new() -> LastHeard {
        LastHeard {
            start: Instant::now(),
            millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let millis = self.start.elapsed().as_millis() as u64;
        self.millis.store(millis, Ordering::Relaxed);
    }

    fn silence(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.millis.load(Ordering::Relaxed)))
    }
}

/// Connects to the configured server and drives a `World` until the server
/// goes away, the user quits or `max_frames` frames have run.
pub async fn run_client(config: Arc<ClientConfig>, max_frames: Option<u64>) -> EngineStatus {
    run_session(config, max_frames).await.0
}

/// Same as `run_client`, but also reports what the world did.
pub async fn run_session(
    config: Arc<ClientConfig>,
    max_frames: Option<u64>,
) -> (EngineStatus, WorldStats) {
    let endpoint = match Endpoint::parse(&config.server_address, config.server_port) {
        Some(endpoint) => endpoint.dialable(),
        None => {
            error!("Invalid server address {}", config.server_address);
            return (EngineStatus::CouldNotConnect, WorldStats::default());
        }
    };

    let stream = match TcpStream::connect(endpoint.socket_addr()).await {
        Ok(stream) => stream,
        Err(err) => {
            error!("Could not connect to {}: {}", endpoint, err);
            return (EngineStatus::CouldNotConnect, WorldStats::default());
        }
    };
    let origin = stream
        .peer_addr()
        .map(Endpoint::from)
        .unwrap_or(endpoint);
    info!("{} connected to {}", config.username, origin);

    let (mut sink, mut packets) = Framed::new(stream, ProtocolCodec::new(Side::Client)).split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Packet>();

    let writer = tokio::spawn(async move {
        while let Some(packet) = outbound_rx.recv().await {
            if let Err(err) = sink.send(packet).await {
                error!("Client send failed: {}", err);
                break;
            }
        }
    });

    let queue = InboundQueue::new();
    let gate = InboundGate::new(endpoint, queue.sender());
    let last_heard = Arc::new(LastHeard::new());

    let reader_heard = last_heard.clone();
    let reader_outbound = outbound_tx.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(packet_in) = packets.next().await {
            let packet = match packet_in {
                Ok(packet) => packet,
                Err(err) => {
                    error!("Client receive failed: {}", err);
                    break;
                }
            };
            reader_heard.touch();

            match packet {
                Packet::S11KeepAlive { id } => {
                    let _ = reader_outbound.send(Packet::C01KeepAlive { id });
                }
                Packet::S16Disconnect { reason } => {
                    info!("Disconnected by server: {}", reason);
                    break;
                }
                packet => {
                    gate.forward(origin, packet);
                }
            }
        }
    });

    let _ = outbound_tx.send(Packet::C00Handshake {
        protocol_version: PROTOCOL_VERSION,
        username: config.username.clone(),
    });

    let mut world = World::new(
        &config,
        Box::new(NetworkChunkSource::new(outbound_tx.clone())),
        queue.receiver(),
    );
    let mut player = Entity::new(EntityKind::LocalPlayer, Vec3d::new(8.0, 0.0, 8.0));

    let fps = config.fps_limit.max(1);
    let mut frame_interval = time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stats_every = fps as u64 * 5;
    let timeout = Duration::from_secs(config.server_timeout_secs);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let status = loop {
        select! {
            _ = frame_interval.tick() => {
                if config.auto_walk != 0.0 {
                    player.velocity.x = config.auto_walk;
                }
                world.update(&mut player);

                let _ = outbound_tx.send(Packet::C03PlayerIntent {
                    position: player.position,
                    rotation: player.rotation,
                    velocity: player.velocity,
                });

                if world.frame() % stats_every == 0 {
                    debug!(
                        "[{}] {:?}, {} sections, {} meshes",
                        config.username,
                        world.stats(),
                        world.chunks().len(),
                        world.chunk_meshes().len()
                    );
                }

                if max_frames.map_or(false, |max| world.frame() >= max) {
                    break EngineStatus::Ok;
                }
                if last_heard.silence() > timeout {
                    error!("Server timed out after {:?}", timeout);
                    break EngineStatus::ExitServerTimeout;
                }
            }
            _ = &mut reader => {
                break EngineStatus::ExitServerDisconnect;
            }
            _ = &mut ctrl_c => {
                info!("Exit requested");
                break EngineStatus::Exit;
            }
        }
    };

    reader.abort();
    let stats = world.stats();
    drop(world);
    drop(outbound_tx);
    let _ = writer.await;

    (status, stats)
}
