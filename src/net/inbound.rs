use flume::{Receiver, Sender};
use log::{trace, warn};

use crate::{
    entity::EntityKind,
    model::{Vec2f, Vec3d},
    net::{
        endpoint::Endpoint,
        proto::{BlockChange, Packet},
    },
    world::{pos::ChunkPos, section::BlockGrid},
};

/// An update the world applies at a fixed point of `World::update`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldMessage {
    JoinGame {
        entity_id: u32,
        spawn: Vec3d,
    },
    ChunkData {
        pos: ChunkPos,
        blocks: Box<BlockGrid>,
    },
    BlockChanges {
        changes: Vec<BlockChange>,
    },
    EntityUpdate {
        entity_id: u32,
        kind: EntityKind,
        position: Vec3d,
        rotation: Vec2f,
        velocity: Vec3d,
    },
    EntityRemove {
        entity_id: u32,
    },
}

impl WorldMessage {
    /// Packets without a world effect map to `None`.
    pub fn from_packet(packet: Packet) -> Option<WorldMessage> {
        match packet {
            Packet::S10JoinGame {
                entity_id, spawn, ..
            } => Some(WorldMessage::JoinGame { entity_id, spawn }),
            Packet::S12ChunkData { pos, blocks } => Some(WorldMessage::ChunkData { pos, blocks }),
            Packet::S13BlockChanges { changes } => Some(WorldMessage::BlockChanges { changes }),
            Packet::S14EntityUpdate {
                entity_id,
                kind,
                position,
                rotation,
                velocity,
            } => Some(WorldMessage::EntityUpdate {
                entity_id,
                kind,
                position,
                rotation,
                velocity,
            }),
            Packet::S15EntityRemove { entity_id } => Some(WorldMessage::EntityRemove { entity_id }),
            _ => None,
        }
    }
}

/// Thread-safe hand-off between network tasks and the update thread.
pub struct InboundQueue {
    tx: Sender<WorldMessage>,
    rx: Receiver<WorldMessage>,
}

impl InboundQueue {
    pub fn new() -> InboundQueue {
        let (tx, rx) = flume::unbounded();
        InboundQueue { tx, rx }
    }

    pub fn sender(&self) -> Sender<WorldMessage> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<WorldMessage> {
        self.rx.clone()
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards only messages coming from the authoritative server.
#[derive(Clone)]
pub struct InboundGate {
    authority: Endpoint,
    tx: Sender<WorldMessage>,
}

impl InboundGate {
    pub fn new(authority: Endpoint, tx: Sender<WorldMessage>) -> InboundGate {
        InboundGate { authority, tx }
    }

    pub fn authority(&self) -> Endpoint {
        self.authority
    }

    /// Returns whether the packet was queued.
    pub fn forward(&self, origin: Endpoint, packet: Packet) -> bool {
        if origin != self.authority {
            warn!(
                "Dropping packet {:#x} from non-authoritative peer {}",
                packet.id(),
                origin
            );
            return false;
        }

        match WorldMessage::from_packet(packet) {
            Some(message) => self.tx.send(message).is_ok(),
            None => {
                trace!("Packet from {} has no world effect", origin);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_accepts_authority_in_any_textual_form() {
        let queue = InboundQueue::new();
        let gate = InboundGate::new(Endpoint::parse("127.0.0.1", 7777).unwrap(), queue.sender());
        let rx = queue.receiver();

        let same = Endpoint::parse("::ffff:127.0.0.1", 7777).unwrap();
        assert!(gate.forward(same, Packet::S15EntityRemove { entity_id: 2 }));
        assert_eq!(rx.try_recv().ok(), Some(WorldMessage::EntityRemove { entity_id: 2 }));
    }

    #[test]
    fn gate_drops_other_peers() {
        let queue = InboundQueue::new();
        let gate = InboundGate::new(Endpoint::parse("127.0.0.1", 7777).unwrap(), queue.sender());

        let other = Endpoint::parse("127.0.0.1", 7778).unwrap();
        assert!(!gate.forward(other, Packet::S15EntityRemove { entity_id: 2 }));
        assert!(queue.receiver().try_recv().is_err());
    }

    #[test]
    fn keep_alive_has_no_world_effect() {
        assert!(WorldMessage::from_packet(Packet::S11KeepAlive { id: 1 }).is_none());
    }
}
