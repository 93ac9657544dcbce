use crate::{
    model::{Vec2f, Vec3d},
    world::pos::{BlockPos, ChunkPos},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    LocalPlayer,
    Player,
    Mob,
}

impl EntityKind {
    pub fn to_wire(self) -> u8 {
        match self {
            EntityKind::LocalPlayer | EntityKind::Player => 0,
            EntityKind::Mob => 1,
        }
    }

    pub fn from_wire(val: u8) -> Option<EntityKind> {
        match val {
            0 => Some(EntityKind::Player),
            1 => Some(EntityKind::Mob),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub position: Vec3d,
    pub rotation: Vec2f,
    /// Movement intent, applied once per world update.
    pub velocity: Vec3d,
}

impl Entity {
    pub fn new(kind: EntityKind, position: Vec3d) -> Entity {
        Entity {
            kind,
            position,
            rotation: Default::default(),
            velocity: Default::default(),
        }
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::from_pos(self.position.x, self.position.y, self.position.z)
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        ChunkPos::from_world(self.position)
    }

    pub fn step(&mut self) {
        self.position += self.velocity;
    }
}

/// Generation-tagged handle. Stays invalid once its entity is removed, even
/// if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

#[derive(Default)]
pub struct EntityArray {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl EntityArray {
    pub fn new() -> EntityArray {
        Default::default()
    }

    pub fn insert(&mut self, entity: Entity) -> EntityId {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entity = Some(entity);
                EntityId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entity: Some(entity),
                });
                EntityId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let entity = slot.entity.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_mut())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entity.as_ref().map(|entity| {
                (
                    EntityId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entity,
                )
            })
        })
    }

    pub fn step_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(entity) = slot.entity.as_mut() {
                entity.step();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mob_at(x: f64) -> Entity {
        Entity::new(EntityKind::Mob, Vec3d::new(x, 0.0, 0.0))
    }

    #[test]
    fn ids_survive_removal_of_others() {
        let mut entities = EntityArray::new();
        let a = entities.insert(mob_at(1.0));
        let b = entities.insert(mob_at(2.0));
        let c = entities.insert(mob_at(3.0));

        entities.remove(a);
        assert_eq!(entities.get(b).map(|e| e.position.x), Some(2.0));
        assert_eq!(entities.get(c).map(|e| e.position.x), Some(3.0));
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn stale_id_does_not_reach_reused_slot() {
        let mut entities = EntityArray::new();
        let old = entities.insert(mob_at(1.0));
        entities.remove(old);

        let new = entities.insert(mob_at(9.0));
        assert_ne!(old, new);
        assert!(entities.get(old).is_none());
        assert!(entities.remove(old).is_none());
        assert_eq!(entities.get(new).map(|e| e.position.x), Some(9.0));
    }

    #[test]
    fn iteration_skips_removed_slots() {
        let mut entities = EntityArray::new();
        let ids: Vec<_> = (0..4).map(|i| entities.insert(mob_at(i as f64))).collect();
        entities.remove(ids[1]);

        let seen: Vec<_> = entities.iter().map(|(id, _)| id).collect();
        assert_eq!(seen, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn step_applies_velocity() {
        let mut entities = EntityArray::new();
        let id = entities.insert(mob_at(0.0));
        if let Some(entity) = entities.get_mut(id) {
            entity.velocity = Vec3d::new(0.5, 0.0, -1.0);
        }

        entities.step_all();
        entities.step_all();
        let entity = entities.get(id).unwrap();
        assert_eq!(entity.position, Vec3d::new(1.0, 0.0, -2.0));
        assert_eq!(entity.chunk_pos(), ChunkPos::new(0, 0, -1));
    }
}
