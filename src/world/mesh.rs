use serde_derive::Deserialize;

use super::{
    pos::{BlockFace, ChunkPos, SECTION_SIZE},
    section::{layer_idx, ChunkSection, SECTION_AREA},
};

/// What a boundary face assumes about a neighbour that is not loaded yet.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// No faces toward missing neighbours. Holes may show until the neighbour
    /// arrives, but no seam faces have to be removed afterwards.
    AssumeSolid,
    /// Faces toward missing neighbours are emitted.
    AssumeAir,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::AssumeSolid
    }
}

/// What lies across one face of a section at the time a mesh job is created.
#[derive(Debug, Clone)]
pub enum Boundary {
    Loaded(Box<[bool; SECTION_AREA]>),
    Unloaded,
    /// Outside the vertical world range. Always open.
    OutsideWorld,
}

/// Snapshot of the six adjacent boundary layers, indexed by `BlockFace`.
#[derive(Debug, Clone)]
pub struct Neighbors {
    boundaries: [Boundary; 6],
}

impl Neighbors {
    pub fn new(boundaries: [Boundary; 6]) -> Neighbors {
        Neighbors { boundaries }
    }

    pub fn unloaded() -> Neighbors {
        Neighbors::new([
            Boundary::Unloaded,
            Boundary::Unloaded,
            Boundary::Unloaded,
            Boundary::Unloaded,
            Boundary::Unloaded,
            Boundary::Unloaded,
        ])
    }

    pub fn set(&mut self, face: BlockFace, boundary: Boundary) {
        self.boundaries[face.index()] = boundary;
    }

    pub fn get(&self, face: BlockFace) -> &Boundary {
        &self.boundaries[face.index()]
    }

    /// Solidity of the neighbour block touching local position (x, y, z)
    /// across `face`.
    fn is_solid(&self, face: BlockFace, policy: BoundaryPolicy, x: i32, y: i32, z: i32) -> bool {
        match self.get(face) {
            Boundary::Loaded(layer) => {
                let (dx, dy, dz) = face.offset();
                let nx = (x + dx).rem_euclid(SECTION_SIZE);
                let ny = (y + dy).rem_euclid(SECTION_SIZE);
                let nz = (z + dz).rem_euclid(SECTION_SIZE);
                layer[layer_idx(face.opposite(), nx, ny, nz)]
            }
            Boundary::Unloaded => policy == BoundaryPolicy::AssumeSolid,
            Boundary::OutsideWorld => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Section-local position; the renderer offsets by `ChunkMesh::origin`.
    pub position: [f32; 3],
    pub face: BlockFace,
    pub block_state: u16,
}

/// Geometry derived from one section, ready for upload.
#[derive(Debug, Clone)]
pub struct ChunkMesh {
    pub pos: ChunkPos,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Section revision this mesh was built from.
    pub source_revision: u64,
}

impl ChunkMesh {
    pub fn empty(pos: ChunkPos, source_revision: u64) -> ChunkMesh {
        ChunkMesh {
            pos,
            vertices: Vec::new(),
            indices: Vec::new(),
            source_revision,
        }
    }

    pub fn origin(&self) -> [f32; 3] {
        let origin = self.pos.block_origin();
        [origin.x as f32, origin.y as f32, origin.z as f32]
    }

    pub fn face_count(&self) -> usize {
        self.vertices.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    fn push_face(&mut self, x: i32, y: i32, z: i32, face: BlockFace, block_state: u16) {
        let base = self.vertices.len() as u32;
        for (cx, cy, cz) in face_corners(face) {
            self.vertices.push(Vertex {
                position: [(x + cx) as f32, (y + cy) as f32, (z + cz) as f32],
                face,
                block_state,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Unit cube corners of a face, counter-clockwise seen from outside.
fn face_corners(face: BlockFace) -> [(i32, i32, i32); 4] {
    match face {
        BlockFace::East => [(1, 0, 0), (1, 1, 0), (1, 1, 1), (1, 0, 1)],
        BlockFace::West => [(0, 0, 1), (0, 1, 1), (0, 1, 0), (0, 0, 0)],
        BlockFace::Top => [(0, 1, 0), (0, 1, 1), (1, 1, 1), (1, 1, 0)],
        BlockFace::Bottom => [(0, 0, 0), (1, 0, 0), (1, 0, 1), (0, 0, 1)],
        BlockFace::South => [(0, 0, 1), (1, 0, 1), (1, 1, 1), (0, 1, 1)],
        BlockFace::North => [(1, 0, 0), (0, 0, 0), (0, 1, 0), (1, 1, 0)],
    }
}

/// Emits one quad per solid block face that touches air. Faces between two
/// solid blocks are culled, including across section borders.
pub fn build_mesh(
    section: &ChunkSection,
    neighbors: &Neighbors,
    policy: BoundaryPolicy,
) -> ChunkMesh {
    let mut mesh = ChunkMesh::empty(section.pos(), section.revision());
    if section.is_empty() {
        return mesh;
    }

    for y in 0..SECTION_SIZE {
        for z in 0..SECTION_SIZE {
            for x in 0..SECTION_SIZE {
                let block_state = section.get_block(x, y, z);
                if block_state == 0 {
                    continue;
                }

                for face in BlockFace::ALL {
                    let (dx, dy, dz) = face.offset();
                    let (nx, ny, nz) = (x + dx, y + dy, z + dz);
                    let inside = (0..SECTION_SIZE).contains(&nx)
                        && (0..SECTION_SIZE).contains(&ny)
                        && (0..SECTION_SIZE).contains(&nz);

                    let covered = if inside {
                        section.is_solid(nx, ny, nz)
                    } else {
                        neighbors.is_solid(face, policy, x, y, z)
                    };

                    if !covered {
                        mesh.push_face(x, y, z, face, block_state);
                    }
                }
            }
        }
    }
    mesh
}
