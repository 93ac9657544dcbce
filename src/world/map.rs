use std::collections::{hash_map, HashMap};

use super::pos::ChunkPos;

/// Owning map from chunk position to per-chunk data. Only the `World` writes
/// to it, so a position never has more than one owner.
pub struct ChunkPositionMap<T> {
    entries: HashMap<ChunkPos, T>,
}

impl<T> ChunkPositionMap<T> {
    pub fn new() -> ChunkPositionMap<T> {
        ChunkPositionMap {
            entries: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> ChunkPositionMap<T> {
        ChunkPositionMap {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// `None` means the chunk is not loaded; that is an expected state.
    pub fn get(&self, pos: ChunkPos) -> Option<&T> {
        self.entries.get(&pos)
    }

    pub fn get_mut(&mut self, pos: ChunkPos) -> Option<&mut T> {
        self.entries.get_mut(&pos)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.entries.contains_key(&pos)
    }

    /// Inserts into a vacant position. Occupied positions are a caller bug:
    /// fatal in debug builds, overwritten in release builds.
    pub fn insert(&mut self, pos: ChunkPos, value: T) {
        let previous = self.entries.insert(pos, value);
        debug_assert!(
            previous.is_none(),
            "chunk {:?} inserted twice without replace",
            pos
        );
    }

    /// Fully replaces any existing entry and returns it.
    pub fn insert_or_replace(&mut self, pos: ChunkPos, value: T) -> Option<T> {
        self.entries.insert(pos, value)
    }

    /// Missing keys are a no-op.
    pub fn remove(&mut self, pos: ChunkPos) -> Option<T> {
        self.entries.remove(&pos)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.entries.keys().copied()
    }

    /// Unspecified order.
    pub fn iter(&self) -> hash_map::Iter<'_, ChunkPos, T> {
        self.entries.iter()
    }
}

impl<T> Default for ChunkPositionMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_latest_value() {
        let mut map = ChunkPositionMap::new();
        let pos = ChunkPos::new(1, 0, -1);
        assert!(map.get(pos).is_none());

        map.insert(pos, "first");
        assert_eq!(map.get(pos), Some(&"first"));

        assert_eq!(map.insert_or_replace(pos, "second"), Some("first"));
        assert_eq!(map.get(pos), Some(&"second"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut map = ChunkPositionMap::new();
        let pos = ChunkPos::new(0, 0, 0);
        map.insert(pos, 7);

        assert_eq!(map.remove(pos), Some(7));
        assert!(map.get(pos).is_none());
        assert_eq!(map.remove(pos), None);
        assert!(map.is_empty());
    }

    #[test]
    fn positions_are_distinct_by_every_axis() {
        let mut map = ChunkPositionMap::new();
        map.insert(ChunkPos::new(0, 0, 1), 'a');
        map.insert(ChunkPos::new(0, 1, 0), 'b');
        map.insert(ChunkPos::new(1, 0, 0), 'c');

        let mut values: Vec<char> = map.iter().map(|(_, v)| *v).collect();
        values.sort();
        assert_eq!(values, vec!['a', 'b', 'c']);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn duplicate_insert_panics_in_debug() {
        let mut map = ChunkPositionMap::new();
        map.insert(ChunkPos::new(0, 0, 0), 1);
        map.insert(ChunkPos::new(0, 0, 0), 2);
    }
}
