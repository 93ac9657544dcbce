use crate::model::Vec3d;

/// Edge length of a chunk section in blocks.
pub const SECTION_SIZE: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockFace {
    Bottom,
    Top,
    North,
    South,
    West,
    East,
}

impl BlockFace {
    pub const ALL: [BlockFace; 6] = [
        BlockFace::Bottom,
        BlockFace::Top,
        BlockFace::North,
        BlockFace::South,
        BlockFace::West,
        BlockFace::East,
    ];

    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            BlockFace::Bottom => (0, -1, 0),
            BlockFace::Top => (0, 1, 0),
            BlockFace::North => (0, 0, -1),
            BlockFace::South => (0, 0, 1),
            BlockFace::West => (-1, 0, 0),
            BlockFace::East => (1, 0, 0),
        }
    }

    pub fn opposite(self) -> BlockFace {
        match self {
            BlockFace::Bottom => BlockFace::Top,
            BlockFace::Top => BlockFace::Bottom,
            BlockFace::North => BlockFace::South,
            BlockFace::South => BlockFace::North,
            BlockFace::West => BlockFace::East,
            BlockFace::East => BlockFace::West,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos { x, y, z }
    }

    pub fn from_pos(x: f64, y: f64, z: f64) -> BlockPos {
        BlockPos::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    pub fn from_u64(serialized: u64) -> BlockPos {
        BlockPos {
            x: Self::to_signed(serialized >> 38, 26),
            y: Self::to_signed((serialized >> 26) & 0xFFF, 12),
            z: Self::to_signed(serialized << 38 >> 38, 26),
        }
    }

    pub fn to_u64(&self) -> u64 {
        let x = self.x as u64;
        let y = self.y as u64;
        let z = self.z as u64;
        ((x & 0x3FFFFFF) << 38) | ((y & 0xFFF) << 26) | (z & 0x3FFFFFF)
    }

    fn to_signed(val: u64, bits: u32) -> i32 {
        let mut val = val as i32;
        if val >= i32::pow(2, bits - 1) {
            val -= i32::pow(2, bits);
        }
        val
    }

    pub fn offset(&self, face: BlockFace) -> BlockPos {
        let (dx, dy, dz) = face.offset();
        BlockPos::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn chunk_pos(&self) -> ChunkPos {
        ChunkPos::from_block_pos(*self)
    }

    /// Coordinates inside the owning section, each in `0..16`.
    pub fn local(&self) -> (i32, i32, i32) {
        (self.x & 0x0f, self.y & 0x0f, self.z & 0x0f)
    }
}

/// Grid coordinate of a chunk section. Only ever used as a map key.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, y: i32, z: i32) -> ChunkPos {
        ChunkPos { x, y, z }
    }

    pub fn from_block_pos(pos: BlockPos) -> ChunkPos {
        ChunkPos::new(pos.x >> 4, pos.y >> 4, pos.z >> 4)
    }

    pub fn from_world(pos: Vec3d) -> ChunkPos {
        Self::from_block_pos(BlockPos::from_pos(pos.x, pos.y, pos.z))
    }

    pub fn offset(&self, face: BlockFace) -> ChunkPos {
        let (dx, dy, dz) = face.offset();
        ChunkPos::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn neighbors(&self) -> [(BlockFace, ChunkPos); 6] {
        BlockFace::ALL.map(|face| (face, self.offset(face)))
    }

    /// World position of the section's lowest corner block.
    pub fn block_origin(&self) -> BlockPos {
        BlockPos::new(
            self.x * SECTION_SIZE,
            self.y * SECTION_SIZE,
            self.z * SECTION_SIZE,
        )
    }

    /// Squared horizontal distance, the ordering used for load priority.
    pub fn horizontal_dist_sq(&self, other: &ChunkPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_pos_packing_keeps_negative_coordinates() {
        let pos = BlockPos::new(-1234, -7, 98765);
        assert_eq!(BlockPos::from_u64(pos.to_u64()), pos);
    }

    #[test]
    fn chunk_pos_floors_negative_blocks() {
        assert_eq!(
            ChunkPos::from_block_pos(BlockPos::new(-1, 0, 15)),
            ChunkPos::new(-1, 0, 0)
        );
        assert_eq!(
            ChunkPos::from_block_pos(BlockPos::new(-16, 31, -17)),
            ChunkPos::new(-1, 1, -2)
        );
        assert_eq!(
            ChunkPos::from_world(Vec3d::new(-0.5, 3.0, 16.0)),
            ChunkPos::new(-1, 0, 1)
        );
    }

    #[test]
    fn local_coordinates_wrap_into_section() {
        assert_eq!(BlockPos::new(-1, 17, 32).local(), (15, 1, 0));
    }

    #[test]
    fn faces_are_symmetric() {
        for face in BlockFace::ALL {
            let pos = ChunkPos::new(3, 1, -2);
            assert_eq!(pos.offset(face).offset(face.opposite()), pos);
        }
    }
}
