use std::sync::Arc;

use super::pos::{BlockFace, ChunkPos, SECTION_SIZE};

pub const SECTION_VOLUME: usize = 4096;
pub const SECTION_AREA: usize = 256;

pub type BlockGrid = [u16; SECTION_VOLUME];

#[macro_export]
macro_rules! block_state {
    ($id: expr, $data: expr) => {
        (($id as u16) << 4 | (($data as u16) & 0x0f))
    };
}

pub fn block_idx(x: i32, y: i32, z: i32) -> usize {
    (x + SECTION_SIZE * (z + SECTION_SIZE * y)) as usize
}

/// Index into a 16x16 boundary layer. The two coordinates that vary across a
/// face are used, so a section and its neighbour agree on the layout.
pub fn layer_idx(face: BlockFace, x: i32, y: i32, z: i32) -> usize {
    let (a, b) = match face {
        BlockFace::West | BlockFace::East => (z, y),
        BlockFace::Bottom | BlockFace::Top => (x, z),
        BlockFace::North | BlockFace::South => (x, y),
    };
    (a + SECTION_SIZE * b) as usize
}

/// Voxel payload of one chunk. The grid is shared copy-on-write so mesh jobs
/// can take a snapshot without copying the blocks.
#[derive(Clone, Debug)]
pub struct ChunkSection {
    pos: ChunkPos,
    blocks: Arc<BlockGrid>,
    non_air: u16,
    revision: u64,
    touched_frame: u64,
}

impl ChunkSection {
    pub fn new(pos: ChunkPos) -> ChunkSection {
        ChunkSection {
            pos,
            blocks: Arc::new([0; SECTION_VOLUME]),
            non_air: 0,
            revision: 0,
            touched_frame: 0,
        }
    }

    pub fn from_blocks(pos: ChunkPos, blocks: Box<BlockGrid>) -> ChunkSection {
        let non_air = blocks.iter().filter(|b| **b != 0).count() as u16;
        ChunkSection {
            pos,
            blocks: Arc::from(blocks),
            non_air,
            revision: 0,
            touched_frame: 0,
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn blocks(&self) -> &BlockGrid {
        &self.blocks
    }

    pub fn same_blocks(&self, other: &BlockGrid) -> bool {
        self.blocks[..] == other[..]
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> u16 {
        if x < 0 || y < 0 || z < 0 || x > 15 || y > 15 || z > 15 {
            return 0;
        }
        self.blocks[block_idx(x, y, z)]
    }

    pub fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        self.get_block(x, y, z) != 0
    }

    /// Returns whether the stored state actually changed.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block_state: u16) -> bool {
        let idx = block_idx(x, y, z);
        let previous = self.blocks[idx];
        if previous == block_state {
            return false;
        }

        Arc::make_mut(&mut self.blocks)[idx] = block_state;
        match (previous == 0, block_state == 0) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        true
    }

    pub fn non_air(&self) -> usize {
        self.non_air as usize
    }

    pub fn is_empty(&self) -> bool {
        self.non_air == 0
    }

    pub fn is_full(&self) -> bool {
        self.non_air as usize == SECTION_VOLUME
    }

    /// Solidity of the outermost block layer on `face`.
    pub fn boundary_layer(&self, face: BlockFace) -> Box<[bool; SECTION_AREA]> {
        let mut layer = Box::new([false; SECTION_AREA]);
        let fixed = match face {
            BlockFace::Bottom | BlockFace::North | BlockFace::West => 0,
            _ => SECTION_SIZE - 1,
        };

        for a in 0..SECTION_SIZE {
            for b in 0..SECTION_SIZE {
                let (x, y, z) = match face {
                    BlockFace::West | BlockFace::East => (fixed, b, a),
                    BlockFace::Bottom | BlockFace::Top => (a, fixed, b),
                    BlockFace::North | BlockFace::South => (a, b, fixed),
                };
                layer[layer_idx(face, x, y, z)] = self.is_solid(x, y, z);
            }
        }
        layer
    }

    /// Revision of the state the current mesh must be built from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Frame in which `revision` last changed.
    pub fn touched_frame(&self) -> u64 {
        self.touched_frame
    }

    pub(crate) fn touch(&mut self, revision: u64, frame: u64) {
        self.revision = revision;
        self.touched_frame = frame;
    }
}
