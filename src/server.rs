use std::{
    ops::Add,
    sync::{
        atomic::{AtomicI32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use rand::Rng;
use tokio::{
    io,
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc::{self, error::TrySendError},
    time::{self, Instant},
};
use tokio_util::codec::Framed;

use crate::{
    block_state,
    config::ServerConfig,
    entity::EntityKind,
    model::Vec3d,
    net::{
        codec::{ProtocolCodec, Side},
        endpoint::Endpoint,
        proto::{BlockChange, Packet, PROTOCOL_VERSION},
        session::{Join, Session, SessionTable},
    },
    world::{
        pos::{BlockPos, ChunkPos, SECTION_SIZE},
        section::{block_idx, BlockGrid, ChunkSection, SECTION_VOLUME},
    },
};

const STONE: u16 = block_state!(1, 0);
const GRASS: u16 = block_state!(2, 0);
const DIRT: u16 = block_state!(3, 0);

/// Flat terrain: stone, three layers of dirt and a grass top at `ground_level`.
/// Chunks further than `world_size` from the origin are empty.
pub fn flat_section(pos: ChunkPos, ground_level: i32, world_size: i32) -> ChunkSection {
    let size = world_size.max(0).unsigned_abs();
    if pos.x.unsigned_abs() >= size || pos.z.unsigned_abs() >= size {
        return ChunkSection::new(pos);
    }

    let mut blocks = Box::new([0u16; SECTION_VOLUME]);
    for y in 0..SECTION_SIZE {
        let world_y = pos.y * SECTION_SIZE + y;
        let state = if world_y < ground_level - 4 {
            STONE
        } else if world_y < ground_level - 1 {
            DIRT
        } else if world_y == ground_level - 1 {
            GRASS
        } else {
            break;
        };

        for z in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                blocks[block_idx(x, y, z)] = state;
            }
        }
    }
    ChunkSection::from_blocks(pos, blocks)
}

pub struct ServerHandler {
    pub config: Arc<ServerConfig>,
    pub sessions: SessionTable,
    /// Sections that were edited since startup. Everything else is generated.
    edits: DashMap<ChunkPos, ChunkSection>,
    broadcast_tx: mpsc::Sender<Packet>,
    clients: DashMap<Endpoint, mpsc::Sender<Packet>>,
    peer_counter: AtomicUsize,
    keep_alive_counter: AtomicI32,
}

impl ServerHandler {
    pub fn start(config: Arc<ServerConfig>) -> Arc<ServerHandler> {
        let (broadcast_tx, broadcast_rx) = mpsc::channel::<Packet>(128);

        let handler = Arc::new(ServerHandler {
            sessions: SessionTable::new(config.max_connections),
            config,
            edits: DashMap::new(),
            broadcast_tx,
            clients: DashMap::new(),
            peer_counter: AtomicUsize::new(0),
            keep_alive_counter: AtomicI32::new(0),
        });

        let h = handler.clone();
        tokio::spawn(async move {
            h.run_broker_loop(broadcast_rx).await;
        });

        handler
    }

    pub fn add_client(&self, endpoint: Endpoint, tx: mpsc::Sender<Packet>) {
        self.clients.insert(endpoint, tx);
    }

    pub fn remove_client(&self, endpoint: &Endpoint) {
        self.clients.remove(endpoint);
    }

    pub fn change_num_peers(&self, joined: bool) {
        if joined {
            self.peer_counter.fetch_add(1, Ordering::SeqCst);
        } else {
            self.peer_counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn num_peers(&self) -> usize {
        self.peer_counter.load(Ordering::SeqCst)
    }

    pub fn next_keep_alive(&self) -> i32 {
        self.keep_alive_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn in_world(&self, pos: ChunkPos) -> bool {
        pos.y >= 0 && pos.y < self.config.world_height
    }

    pub fn chunk_blocks(&self, pos: ChunkPos) -> Box<BlockGrid> {
        match self.edits.get(&pos) {
            Some(section) => Box::new(*section.blocks()),
            None => Box::new(*self.generate(pos).blocks()),
        }
    }

    /// Returns whether the block actually changed.
    pub fn set_block(&self, location: BlockPos, block_state: u16) -> bool {
        let pos = location.chunk_pos();
        if !self.in_world(pos) {
            return false;
        }
        let (x, y, z) = location.local();
        self.edits
            .entry(pos)
            .or_insert_with(|| self.generate(pos))
            .set_block(x, y, z, block_state)
    }

    pub fn spawn_point(&self) -> Vec3d {
        let mut rng = rand::thread_rng();
        Vec3d::new(
            rng.gen_range(0.0..16.0),
            (self.config.ground_level + 2) as f64,
            rng.gen_range(0.0..16.0),
        )
    }

    pub async fn send_broadcast(&self, packet: Packet) -> io::Result<()> {
        match self.broadcast_tx.send(packet).await {
            Ok(_) => Ok(()),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    fn generate(&self, pos: ChunkPos) -> ChunkSection {
        flat_section(pos, self.config.ground_level, self.config.world_size)
    }

    async fn run_broker_loop(&self, mut rx: mpsc::Receiver<Packet>) {
        while let Some(packet) = rx.recv().await {
            let outputs: Vec<(Endpoint, mpsc::Sender<Packet>)> = self
                .clients
                .iter()
                .map(|c| (*c.key(), c.value().clone()))
                .collect();

            // A peer that stops draining its queue must not stall everyone else.
            for (endpoint, output) in outputs {
                match output.try_send(packet.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("{} is not keeping up, dropping broadcast", endpoint);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Broadcast to {} failed, peer is gone", endpoint);
                    }
                }
            }
        }
    }
}

fn entity_update(session: &Session) -> Packet {
    Packet::S14EntityUpdate {
        entity_id: session.entity_id,
        kind: EntityKind::Player,
        position: session.position,
        rotation: session.rotation,
        velocity: session.velocity,
    }
}

/// One connected peer, from accept to disconnect.
pub struct Connection {
    msg_stream: Framed<TcpStream, ProtocolCodec>,
    unicast_tx: mpsc::Sender<Packet>,
    unicast_rx: mpsc::Receiver<Packet>,
    server: Arc<ServerHandler>,
    endpoint: Endpoint,
    entity_id: Option<u32>,
}

impl Connection {
    pub fn new(stream: TcpStream, endpoint: Endpoint, server: Arc<ServerHandler>) -> Connection {
        let (unicast_tx, unicast_rx) = mpsc::channel::<Packet>(128);
        Connection {
            msg_stream: Framed::new(stream, ProtocolCodec::new(Side::Server)),
            unicast_tx,
            unicast_rx,
            server,
            endpoint,
            entity_id: None,
        }
    }

    pub async fn loop_until_disconnect(&mut self) {
        self.server.change_num_peers(true);
        let mut keep_alive_interval = time::interval_at(
            Instant::now().add(Duration::from_secs(2)),
            Duration::from_secs(4),
        );

        loop {
            select! {
                packet_in = self.msg_stream.next() => {
                    let packet = match packet_in {
                        Some(Ok(packet)) => packet,
                        Some(Err(err)) => {
                            error!("Receive from {} failed: {}", self.endpoint, err);
                            break;
                        }
                        None => break,
                    };

                    if let Err(err) = self.handle_packet(packet).await {
                        info!("Closing connection to {}: {}", self.endpoint, err);
                        break;
                    }
                },
                packet_out = self.unicast_rx.recv() => {
                    let packet = match packet_out {
                        Some(packet) => packet,
                        None => break,
                    };
                    if let Err(err) = self.msg_stream.send(packet).await {
                        error!("Send to {} failed: {}", self.endpoint, err);
                        break;
                    }
                }
                _ = keep_alive_interval.tick() => {
                    let id = self.server.next_keep_alive();
                    if let Err(err) = self.msg_stream.send(Packet::S11KeepAlive { id }).await {
                        error!("Keep-alive to {} failed: {}", self.endpoint, err);
                        break;
                    }
                }
            }
        }

        if let Err(err) = self.msg_stream.close().await {
            trace!("Close of {} failed: {}", self.endpoint, err);
        }
        self.unicast_rx.close();
        self.server.remove_client(&self.endpoint);
        if let Some(session) = self.server.sessions.leave(&self.endpoint) {
            info!("{} left the game", session.username);
            let _ = self
                .server
                .send_broadcast(Packet::S15EntityRemove {
                    entity_id: session.entity_id,
                })
                .await;
        }
        self.server.change_num_peers(false);
    }

    async fn handle_packet(&mut self, packet: Packet) -> io::Result<()> {
        trace!("Received {:?}", packet);

        match packet {
            Packet::C00Handshake {
                protocol_version,
                username,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    self.disconnect("Unsupported protocol version").await?;
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("protocol version {}", protocol_version),
                    ));
                }

                let spawn = self.server.spawn_point();
                let entity_id = match self.server.sessions.join(self.endpoint, &username, spawn) {
                    Join::New(entity_id) => {
                        info!("{} joined with entity id {}", username, entity_id);
                        entity_id
                    }
                    Join::Existing(entity_id) => {
                        warn!("{} sent a second handshake", self.endpoint);
                        entity_id
                    }
                    Join::Full => {
                        self.disconnect("Server is full").await?;
                        return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "server full"));
                    }
                };
                self.entity_id = Some(entity_id);

                let session = match self.server.sessions.get(&self.endpoint) {
                    Some(session) => session,
                    None => return Err(io::Error::new(io::ErrorKind::Other, "session vanished")),
                };
                self.send_packet(Packet::S10JoinGame {
                    entity_id,
                    uuid: session.uuid,
                    spawn: session.position,
                })
                .await?;

                // Show everyone who is already here
                for other in self.server.sessions.snapshot() {
                    if other.entity_id != entity_id {
                        self.send_packet(entity_update(&other)).await?;
                    }
                }

                self.server
                    .add_client(self.endpoint, self.unicast_tx.clone());
                self.server.send_broadcast(entity_update(&session)).await?;
            }
            Packet::C01KeepAlive { id } => {
                trace!("Keep-alive {} from {}", id, self.endpoint);
            }
            Packet::C02RequestChunk { pos } => {
                if self.entity_id.is_none() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "chunk request before handshake",
                    ));
                }
                if !self.server.in_world(pos) {
                    debug!("{} requested {:?} outside the world", self.endpoint, pos);
                    return Ok(());
                }
                let blocks = self.server.chunk_blocks(pos);
                self.send_packet(Packet::S12ChunkData { pos, blocks }).await?;
            }
            Packet::C03PlayerIntent {
                position,
                rotation,
                velocity,
            } => {
                let session = self.server.sessions.update(&self.endpoint, |s| {
                    s.position = position;
                    s.rotation = rotation;
                    s.velocity = velocity;
                });
                if let Some(session) = session {
                    self.server.send_broadcast(entity_update(&session)).await?;
                }
            }
            Packet::C04BlockEdit {
                location,
                block_state,
            } => {
                if self.entity_id.is_some() && self.server.set_block(location, block_state) {
                    self.server
                        .send_broadcast(Packet::S13BlockChanges {
                            changes: vec![BlockChange {
                                location,
                                block_state,
                            }],
                        })
                        .await?;
                }
            }
            _ => {
                trace!("Received unhandled packet: {:?}", packet);
            }
        }

        Ok(())
    }

    async fn disconnect(&mut self, reason: &str) -> io::Result<()> {
        self.send_packet(Packet::S16Disconnect {
            reason: reason.to_string(),
        })
        .await
    }

    async fn send_packet(&mut self, packet: Packet) -> io::Result<()> {
        self.msg_stream.send(packet).await
    }
}

pub async fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    TcpListener::bind((config.bind_address.as_str(), config.port)).await
}

/// Accepts peers until nobody has been connected for `timeout_secs`.
pub async fn serve(listener: TcpListener, config: Arc<ServerConfig>) -> io::Result<()> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let server = ServerHandler::start(config);
    info!("Server listening on {}", listener.local_addr()?);

    let mut idle_check = time::interval(Duration::from_millis(500));
    let mut idle_since = Some(Instant::now());

    loop {
        select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                debug!("Accepted connection from {}", addr);
                idle_since = None;

                let server = server.clone();
                tokio::spawn(async move {
                    Connection::new(stream, Endpoint::from(addr), server)
                        .loop_until_disconnect()
                        .await;
                });
            }
            _ = idle_check.tick() => {
                if server.num_peers() > 0 {
                    idle_since = None;
                    continue;
                }
                let since = *idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= timeout {
                    info!("No peers for {:?}, shutting down", timeout);
                    break;
                }
            }
        }
    }

    Ok(())
}
