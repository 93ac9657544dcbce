use uuid::Uuid;

use crate::{
    entity::EntityKind,
    model::{Vec2f, Vec3d},
    world::{
        pos::{BlockPos, ChunkPos},
        section::BlockGrid,
    },
};

pub const PROTOCOL_VERSION: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    pub location: BlockPos,
    pub block_state: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // Client -> Server
    C00Handshake {
        protocol_version: i32,
        username: String,
    },
    C01KeepAlive {
        id: i32,
    },
    C02RequestChunk {
        pos: ChunkPos,
    },
    C03PlayerIntent {
        position: Vec3d,
        rotation: Vec2f,
        velocity: Vec3d,
    },
    C04BlockEdit {
        location: BlockPos,
        block_state: u16,
    },

    // Server -> Client
    S10JoinGame {
        entity_id: u32,
        uuid: Uuid,
        spawn: Vec3d,
    },
    S11KeepAlive {
        id: i32,
    },
    S12ChunkData {
        pos: ChunkPos,
        blocks: Box<BlockGrid>,
    },
    S13BlockChanges {
        changes: Vec<BlockChange>,
    },
    S14EntityUpdate {
        entity_id: u32,
        kind: EntityKind,
        position: Vec3d,
        rotation: Vec2f,
        velocity: Vec3d,
    },
    S15EntityRemove {
        entity_id: u32,
    },
    S16Disconnect {
        reason: String,
    },
}

impl Packet {
    pub fn id(&self) -> i32 {
        match self {
            Packet::C00Handshake { .. } => 0x00,
            Packet::C01KeepAlive { .. } => 0x01,
            Packet::C02RequestChunk { .. } => 0x02,
            Packet::C03PlayerIntent { .. } => 0x03,
            Packet::C04BlockEdit { .. } => 0x04,

            Packet::S10JoinGame { .. } => 0x10,
            Packet::S11KeepAlive { .. } => 0x11,
            Packet::S12ChunkData { .. } => 0x12,
            Packet::S13BlockChanges { .. } => 0x13,
            Packet::S14EntityUpdate { .. } => 0x14,
            Packet::S15EntityRemove { .. } => 0x15,
            Packet::S16Disconnect { .. } => 0x16,
        }
    }

    pub fn is_serverbound(&self) -> bool {
        self.id() < 0x10
    }
}
