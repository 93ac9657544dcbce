pub mod map;
pub mod mesh;
pub mod pos;
pub mod sched;
pub mod section;

use std::collections::{HashMap, HashSet};

use flume::Receiver;
use log::{debug, trace};

use crate::{
    config::ClientConfig,
    entity::{Entity, EntityArray, EntityId, EntityKind},
    model::{Vec2f, Vec3d},
    net::{inbound::WorldMessage, proto::BlockChange},
};

use self::{
    map::ChunkPositionMap,
    mesh::{Boundary, ChunkMesh, Neighbors},
    pos::{BlockFace, BlockPos, ChunkPos, SECTION_SIZE},
    sched::MeshScheduler,
    section::{BlockGrid, ChunkSection},
};

/// Where chunk sections come from. Requests never block; the section shows
/// up later as a `WorldMessage::ChunkData` on the inbound queue.
pub trait ChunkSource {
    fn request(&mut self, pos: ChunkPos);
}

/// Chunks within `radius` on x and z (inclusive, square) and `0..height` on y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRegion {
    pub center_x: i32,
    pub center_z: i32,
    pub radius: i32,
    pub height: i32,
}

impl LoadRegion {
    pub fn around(center: ChunkPos, radius: i32, height: i32) -> LoadRegion {
        LoadRegion {
            center_x: center.x,
            center_z: center.z,
            radius,
            height,
        }
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        (pos.x - self.center_x).abs() <= self.radius
            && (pos.z - self.center_z).abs() <= self.radius
            && pos.y >= 0
            && pos.y < self.height
    }

    pub fn center(&self) -> ChunkPos {
        ChunkPos::new(self.center_x, 0, self.center_z)
    }

    /// Every position in the region, nearest first.
    pub fn positions(&self) -> Vec<ChunkPos> {
        self.nearest(usize::MAX)
    }

    /// The `limit` nearest positions, ordered by squared horizontal distance,
    /// then y. Square rings are generated outward and generation stops once
    /// `limit` positions are closer than anything a further ring can hold.
    pub fn nearest(&self, limit: usize) -> Vec<ChunkPos> {
        let radius = self.radius.max(0);
        let height = self.height.max(0);
        let side = 2 * radius as usize + 1;
        let capacity = side
            .saturating_mul(side)
            .saturating_mul(height as usize)
            .min(limit);

        let center = self.center();
        let mut positions = Vec::with_capacity(capacity);
        for d in 0..=radius {
            for (x, z) in ring(d) {
                for y in 0..height {
                    positions.push(ChunkPos::new(self.center_x + x, y, self.center_z + z));
                }
            }

            let bound = (d as i64 + 1).pow(2);
            let settled = positions
                .iter()
                .filter(|pos| pos.horizontal_dist_sq(&center) < bound)
                .count();
            if settled >= limit {
                break;
            }
        }

        positions.sort_by_key(|pos| (pos.horizontal_dist_sq(&center), pos.y, pos.x, pos.z));
        positions.truncate(limit);
        positions
    }
}

/// Offsets with a Chebyshev distance of exactly `d`.
fn ring(d: i32) -> Vec<(i32, i32)> {
    if d == 0 {
        return vec![(0, 0)];
    }
    let mut offsets = Vec::with_capacity(8 * d as usize);
    for i in -d..=d {
        offsets.push((i, -d));
        offsets.push((i, d));
    }
    for i in -d + 1..d {
        offsets.push((-d, i));
        offsets.push((d, i));
    }
    offsets
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorldStats {
    pub frames: u64,
    pub sections_loaded: u64,
    pub sections_evicted: u64,
    pub requests_sent: u64,
    pub meshes_built: u64,
    pub meshes_discarded: u64,
    pub late_chunks_dropped: u64,
}

pub struct World {
    entities: EntityArray,
    chunks: ChunkPositionMap<ChunkSection>,
    chunk_meshes: ChunkPositionMap<ChunkMesh>,
    /// Positions whose section changed since their mesh was committed.
    dirty: HashSet<ChunkPos>,
    /// Outstanding requests and the frame they were sent in.
    requested: HashMap<ChunkPos, u64>,
    remote_entities: HashMap<u32, EntityId>,
    local_entity_id: Option<u32>,
    region: Option<LoadRegion>,
    wanted: Vec<ChunkPos>,
    wanted_set: HashSet<ChunkPos>,
    frame: u64,
    next_revision: u64,
    inbound: Receiver<WorldMessage>,
    source: Box<dyn ChunkSource + Send>,
    scheduler: MeshScheduler,
    view_radius: i32,
    world_height: i32,
    max_loaded_chunks: usize,
    max_requests_per_frame: usize,
    request_retry_frames: u64,
    stats: WorldStats,
}

impl World {
    pub fn new(
        config: &ClientConfig,
        source: Box<dyn ChunkSource + Send>,
        inbound: Receiver<WorldMessage>,
    ) -> World {
        World {
            entities: EntityArray::new(),
            chunks: ChunkPositionMap::with_capacity(config.max_loaded_chunks),
            chunk_meshes: ChunkPositionMap::with_capacity(config.max_loaded_chunks),
            dirty: HashSet::new(),
            requested: HashMap::new(),
            remote_entities: HashMap::new(),
            local_entity_id: None,
            region: None,
            wanted: Vec::new(),
            wanted_set: HashSet::new(),
            frame: 0,
            next_revision: 0,
            inbound,
            source,
            scheduler: MeshScheduler::new(config.mesh_workers, config.boundary_policy),
            view_radius: config.view_radius.max(0),
            world_height: config.world_height.max(1),
            max_loaded_chunks: config.max_loaded_chunks,
            max_requests_per_frame: config.max_requests_per_frame,
            request_retry_frames: config.request_retry_frames,
            stats: Default::default(),
        }
    }

    /// Runs one frame: applies queued network updates, moves every entity
    /// and the player, loads and evicts chunks around the player, and
    /// rebuilds the meshes of dirty sections.
    pub fn update(&mut self, player: &mut Entity) {
        self.frame += 1;
        self.stats.frames += 1;

        self.drain_inbound(player);

        self.entities.step_all();
        player.step();

        self.refresh_region(player.chunk_pos());
        self.evict_out_of_range();
        self.request_missing();
        self.dispatch_dirty();
        self.commit_finished();

        #[cfg(debug_assertions)]
        self.check_invariants();
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    pub fn region(&self) -> Option<LoadRegion> {
        self.region
    }

    pub fn chunks(&self) -> &ChunkPositionMap<ChunkSection> {
        &self.chunks
    }

    /// Every committed mesh, including ones that are too stale to draw.
    /// Renderers should go through `mesh_at` or `visible_meshes`.
    pub fn chunk_meshes(&self) -> &ChunkPositionMap<ChunkMesh> {
        &self.chunk_meshes
    }

    pub fn entities(&self) -> &EntityArray {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityArray {
        &mut self.entities
    }

    pub fn remote_entity(&self, entity_id: u32) -> Option<EntityId> {
        self.remote_entities.get(&entity_id).copied()
    }

    pub fn local_entity_id(&self) -> Option<u32> {
        self.local_entity_id
    }

    pub fn is_dirty(&self, pos: ChunkPos) -> bool {
        self.dirty.contains(&pos)
    }

    pub fn pending_meshes(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// The mesh to draw at `pos`, if any. A mesh older than its section is
    /// still shown during the frame boundary after the change, then hidden
    /// until the rebuild lands.
    pub fn mesh_at(&self, pos: ChunkPos) -> Option<&ChunkMesh> {
        let section = self.chunks.get(pos)?;
        let mesh = self.chunk_meshes.get(pos)?;
        if mesh.source_revision == section.revision() || self.frame <= section.touched_frame() + 1 {
            Some(mesh)
        } else {
            None
        }
    }

    pub fn visible_meshes(&self) -> impl Iterator<Item = &ChunkMesh> + '_ {
        self.chunk_meshes
            .positions()
            .filter_map(move |pos| self.mesh_at(pos))
    }

    pub fn get_block(&self, pos: BlockPos) -> Option<u16> {
        let (x, y, z) = pos.local();
        self.chunks
            .get(pos.chunk_pos())
            .map(|section| section.get_block(x, y, z))
    }

    /// Local edit. Returns false if the chunk is not loaded or nothing changed.
    pub fn set_block(&mut self, pos: BlockPos, block_state: u16) -> bool {
        let chunk_pos = pos.chunk_pos();
        let (x, y, z) = pos.local();
        let changed = match self.chunks.get_mut(chunk_pos) {
            Some(section) => section.set_block(x, y, z, block_state),
            None => return false,
        };

        if changed {
            self.mark_dirty(chunk_pos);
            for face in touching_faces(x, y, z) {
                self.mark_dirty(chunk_pos.offset(face));
            }
        }
        changed
    }

    fn drain_inbound(&mut self, player: &mut Entity) {
        let messages: Vec<WorldMessage> = self.inbound.try_iter().collect();
        for message in messages {
            self.apply_message(message, player);
        }
    }

    fn apply_message(&mut self, message: WorldMessage, player: &mut Entity) {
        match message {
            WorldMessage::JoinGame { entity_id, spawn } => {
                debug!("Joined as entity {} at {:?}", entity_id, spawn);
                self.local_entity_id = Some(entity_id);
                if let Some(id) = self.remote_entities.remove(&entity_id) {
                    self.entities.remove(id);
                }
                player.position = spawn;
                player.velocity = Vec3d::default();
            }
            WorldMessage::ChunkData { pos, blocks } => self.apply_chunk_data(pos, blocks),
            WorldMessage::BlockChanges { changes } => self.apply_block_changes(&changes),
            WorldMessage::EntityUpdate {
                entity_id,
                kind,
                position,
                rotation,
                velocity,
            } => self.apply_entity_update(entity_id, kind, position, rotation, velocity),
            WorldMessage::EntityRemove { entity_id } => {
                if let Some(id) = self.remote_entities.remove(&entity_id) {
                    self.entities.remove(id);
                }
            }
        }
    }

    fn apply_chunk_data(&mut self, pos: ChunkPos, blocks: Box<BlockGrid>) {
        if self.region.is_some() && !self.wanted_set.contains(&pos) {
            debug!("Dropping chunk {:?} outside the load region", pos);
            self.requested.remove(&pos);
            self.stats.late_chunks_dropped += 1;
            return;
        }
        self.requested.remove(&pos);

        if let Some(existing) = self.chunks.get(pos) {
            if existing.same_blocks(&blocks) {
                trace!("Chunk {:?} resent without changes", pos);
                return;
            }
        }

        if self
            .chunks
            .insert_or_replace(pos, ChunkSection::from_blocks(pos, blocks))
            .is_none()
        {
            self.stats.sections_loaded += 1;
        }
        self.mark_dirty(pos);
        for (_, neighbor) in pos.neighbors() {
            self.mark_dirty(neighbor);
        }
    }

    fn apply_block_changes(&mut self, changes: &[BlockChange]) {
        for change in changes {
            if !self.set_block(change.location, change.block_state) {
                trace!("Block change at {:?} had no effect", change.location);
            }
        }
    }

    fn apply_entity_update(
        &mut self,
        entity_id: u32,
        kind: EntityKind,
        position: Vec3d,
        rotation: Vec2f,
        velocity: Vec3d,
    ) {
        if self.local_entity_id == Some(entity_id) {
            return;
        }

        let existing = self.remote_entities.get(&entity_id).copied();
        match existing.and_then(|id| self.entities.get_mut(id)) {
            Some(entity) => {
                entity.kind = kind;
                entity.position = position;
                entity.rotation = rotation;
                entity.velocity = velocity;
            }
            None => {
                let id = self.entities.insert(Entity {
                    kind,
                    position,
                    rotation,
                    velocity,
                });
                self.remote_entities.insert(entity_id, id);
            }
        }
    }

    /// Bumps the section's revision so the committed mesh counts as stale.
    fn mark_dirty(&mut self, pos: ChunkPos) {
        if let Some(section) = self.chunks.get_mut(pos) {
            self.next_revision += 1;
            section.touch(self.next_revision, self.frame);
            self.dirty.insert(pos);
        }
    }

    fn refresh_region(&mut self, center: ChunkPos) {
        let region = LoadRegion::around(center, self.view_radius, self.world_height);
        if self.region == Some(region) {
            return;
        }

        debug!(
            "Load region moved to ({}, {})",
            region.center_x, region.center_z
        );
        let wanted = region.nearest(self.max_loaded_chunks);
        self.wanted_set = wanted.iter().copied().collect();
        self.wanted = wanted;
        self.region = Some(region);
    }

    fn evict_out_of_range(&mut self) {
        let mut evicted: Vec<ChunkPos> = self
            .chunks
            .positions()
            .filter(|pos| !self.wanted_set.contains(pos))
            .collect();

        if let Some(region) = self.region {
            let center = region.center();
            evicted.sort_by_key(|pos| std::cmp::Reverse(pos.horizontal_dist_sq(&center)));
        }

        for pos in evicted {
            trace!("Evicting chunk {:?}", pos);
            self.chunks.remove(pos);
            self.chunk_meshes.remove(pos);
            self.dirty.remove(&pos);
            self.scheduler.cancel(pos);
            self.stats.sections_evicted += 1;
        }

        let wanted_set = &self.wanted_set;
        self.requested.retain(|pos, _| wanted_set.contains(pos));
    }

    fn request_missing(&mut self) {
        let mut sent = 0;
        for pos in &self.wanted {
            if sent >= self.max_requests_per_frame {
                break;
            }
            if self.chunks.contains(*pos) {
                continue;
            }
            if let Some(at) = self.requested.get(pos) {
                if self.frame - at < self.request_retry_frames {
                    continue;
                }
                debug!("Re-requesting chunk {:?}", pos);
            }

            self.source.request(*pos);
            self.requested.insert(*pos, self.frame);
            sent += 1;
        }
        self.stats.requests_sent += sent as u64;
    }

    fn neighbors_of(&self, pos: ChunkPos) -> Neighbors {
        let mut neighbors = Neighbors::unloaded();
        for (face, neighbor) in pos.neighbors() {
            let boundary = if neighbor.y < 0 || neighbor.y >= self.world_height {
                Boundary::OutsideWorld
            } else {
                match self.chunks.get(neighbor) {
                    Some(section) => Boundary::Loaded(section.boundary_layer(face.opposite())),
                    None => Boundary::Unloaded,
                }
            };
            neighbors.set(face, boundary);
        }
        neighbors
    }

    fn dispatch_dirty(&mut self) {
        let mut dirty: Vec<ChunkPos> = self.dirty.iter().copied().collect();
        if let Some(region) = self.region {
            let center = region.center();
            dirty.sort_by_key(|pos| (pos.horizontal_dist_sq(&center), pos.y));
        }

        for pos in dirty {
            let snapshot = match self.chunks.get(pos) {
                Some(section) if self.scheduler.is_pending(pos, section.revision()) => continue,
                Some(section) => section.clone(),
                None => {
                    self.dirty.remove(&pos);
                    continue;
                }
            };
            let neighbors = self.neighbors_of(pos);
            self.scheduler.submit(snapshot, neighbors);
        }
    }

    /// Commits finished meshes. A result only lands if its section is still
    /// loaded and unchanged since the job was created.
    fn commit_finished(&mut self) {
        let (finished, cancelled) = self.scheduler.completed();
        self.stats.meshes_discarded += cancelled as u64;

        for result in finished {
            match self.chunks.get(result.pos) {
                Some(section) if section.revision() == result.revision => {
                    self.chunk_meshes.insert_or_replace(result.pos, result.mesh);
                    self.dirty.remove(&result.pos);
                    self.stats.meshes_built += 1;
                }
                Some(_) => {
                    trace!("Discarding stale mesh for {:?}", result.pos);
                    self.stats.meshes_discarded += 1;
                }
                None => {
                    trace!("Discarding mesh for unloaded chunk {:?}", result.pos);
                    self.stats.meshes_discarded += 1;
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for pos in self.chunk_meshes.positions() {
            debug_assert!(
                self.chunks.contains(pos),
                "mesh at {:?} outlived its section",
                pos
            );
        }
    }
}

/// Faces of the section that a block at local (x, y, z) touches.
fn touching_faces(x: i32, y: i32, z: i32) -> Vec<BlockFace> {
    let last = SECTION_SIZE - 1;
    let mut faces = Vec::new();
    if x == 0 {
        faces.push(BlockFace::West);
    }
    if x == last {
        faces.push(BlockFace::East);
    }
    if y == 0 {
        faces.push(BlockFace::Bottom);
    }
    if y == last {
        faces.push(BlockFace::Top);
    }
    if z == 0 {
        faces.push(BlockFace::North);
    }
    if z == last {
        faces.push(BlockFace::South);
    }
    faces
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use flume::Sender;

    use super::*;
    use crate::{
        net::inbound::InboundQueue,
        world::section::{block_idx, SECTION_VOLUME},
    };

    #[derive(Clone, Default)]
    struct RecordingSource(Arc<Mutex<Vec<ChunkPos>>>);

    impl RecordingSource {
        fn take(&self) -> Vec<ChunkPos> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl ChunkSource for RecordingSource {
        fn request(&mut self, pos: ChunkPos) {
            self.0.lock().unwrap().push(pos);
        }
    }

    struct Harness {
        world: World,
        source: RecordingSource,
        tx: Sender<WorldMessage>,
        player: Entity,
    }

    impl Harness {
        fn new(config: ClientConfig) -> Harness {
            let queue = InboundQueue::new();
            let source = RecordingSource::default();
            Harness {
                world: World::new(&config, Box::new(source.clone()), queue.receiver()),
                source,
                tx: queue.sender(),
                player: Entity::new(EntityKind::LocalPlayer, Vec3d::new(8.0, 8.0, 8.0)),
            }
        }

        fn with_radius(radius: i32) -> Harness {
            Harness::new(ClientConfig {
                view_radius: radius,
                world_height: 1,
                mesh_workers: 0,
                ..Default::default()
            })
        }

        fn update(&mut self) {
            self.world.update(&mut self.player);
        }

        fn deliver(&self, pos: ChunkPos, blocks: Box<BlockGrid>) {
            self.tx
                .send(WorldMessage::ChunkData { pos, blocks })
                .unwrap();
        }

        /// Answers every outstanding request with a one-block-thick floor.
        fn deliver_requested(&self) -> Vec<ChunkPos> {
            let requested = self.source.take();
            for pos in &requested {
                self.deliver(*pos, floor());
            }
            requested
        }
    }

    fn floor() -> Box<BlockGrid> {
        let mut blocks = Box::new([0u16; SECTION_VOLUME]);
        for x in 0..16 {
            for z in 0..16 {
                blocks[block_idx(x, 0, z)] = 1;
            }
        }
        blocks
    }

    fn xs(positions: &[ChunkPos]) -> Vec<i32> {
        let mut xs: Vec<i32> = positions.iter().map(|p| p.x).collect();
        xs.sort();
        xs.dedup();
        xs
    }

    #[test]
    fn walking_one_chunk_swaps_a_column() {
        let mut h = Harness::with_radius(1);
        h.update();
        assert_eq!(h.deliver_requested().len(), 9);

        h.update();
        assert_eq!(h.world.chunks().len(), 9);
        assert_eq!(h.world.chunk_meshes().len(), 9);
        for x in -1..=1 {
            for z in -1..=1 {
                assert!(h.world.mesh_at(ChunkPos::new(x, 0, z)).is_some());
            }
        }

        h.player.position.x = 24.0;
        h.update();
        let requested = h.source.take();
        assert_eq!(requested.len(), 3);
        assert_eq!(xs(&requested), vec![2]);

        let stats = h.world.stats();
        assert_eq!(stats.sections_evicted, 3);
        assert_eq!(h.world.chunks().len(), 6);
        assert_eq!(h.world.chunk_meshes().len(), 6);
        assert_eq!(xs(&h.world.chunks().positions().collect::<Vec<_>>()), vec![0, 1]);

        for pos in &requested {
            h.deliver(*pos, floor());
        }
        h.update();
        assert_eq!(h.world.chunks().len(), 9);
        assert_eq!(h.world.chunk_meshes().len(), 9);
        assert!(h.world.mesh_at(ChunkPos::new(2, 0, 1)).is_some());
    }

    #[test]
    fn radius_edge_is_inclusive() {
        let region = LoadRegion::around(ChunkPos::new(0, 0, 0), 2, 1);
        assert!(region.contains(ChunkPos::new(2, 0, 2)));
        assert!(region.contains(ChunkPos::new(-2, 0, 0)));
        assert!(!region.contains(ChunkPos::new(3, 0, 0)));
        assert!(!region.contains(ChunkPos::new(0, 0, -3)));
        assert!(!region.contains(ChunkPos::new(0, 1, 0)));
        assert_eq!(region.positions().len(), 25);
    }

    #[test]
    fn nearest_matches_full_ordering() {
        let region = LoadRegion::around(ChunkPos::new(3, 0, -2), 5, 2);
        let all = region.positions();
        assert_eq!(all.len(), 11 * 11 * 2);
        for limit in [0, 1, 2, 9, 10, 57, 200, all.len(), all.len() + 5] {
            let nearest = region.nearest(limit);
            assert_eq!(nearest[..], all[..limit.min(all.len())]);
        }
    }

    #[test]
    fn huge_radius_with_small_budget_stops_early() {
        let region = LoadRegion::around(ChunkPos::new(0, 0, 0), 1_000_000, 4);
        let nearest = region.nearest(9);
        assert_eq!(nearest.len(), 9);
        assert!(nearest.iter().all(|p| p.x.abs() <= 1 && p.z.abs() <= 1));

        let mut h = Harness::new(ClientConfig {
            view_radius: 100_000,
            world_height: 1,
            max_loaded_chunks: 25,
            mesh_workers: 0,
            ..Default::default()
        });
        h.update();
        assert_eq!(h.source.take().len(), 25);
    }

    #[test]
    fn stationary_player_requests_each_chunk_once() {
        let mut h = Harness::with_radius(2);
        h.player.position = Vec3d::new(15.999, 3.0, 0.001);
        h.update();
        assert_eq!(h.source.take().len(), 25);

        for _ in 0..10 {
            h.update();
        }
        assert!(h.source.take().is_empty());
        assert_eq!(h.world.region().map(|r| (r.center_x, r.center_z)), Some((0, 0)));
    }

    #[test]
    fn requests_go_out_nearest_first() {
        let mut h = Harness::with_radius(2);
        h.update();
        let requested = h.source.take();
        assert_eq!(requested[0], ChunkPos::new(0, 0, 0));

        let center = ChunkPos::new(0, 0, 0);
        let dists: Vec<i64> = requested.iter().map(|p| p.horizontal_dist_sq(&center)).collect();
        let mut sorted = dists.clone();
        sorted.sort();
        assert_eq!(dists, sorted);
    }

    #[test]
    fn unchanged_world_is_not_remeshed() {
        let mut h = Harness::with_radius(1);
        h.update();
        h.deliver_requested();
        h.update();
        let built = h.world.stats().meshes_built;
        assert!(built >= 9);

        for _ in 0..5 {
            h.update();
        }
        assert_eq!(h.world.stats().meshes_built, built);
        assert!(!h.world.is_dirty(ChunkPos::new(0, 0, 0)));
    }

    #[test]
    fn resent_chunk_replaces_and_rebuilds_once_per_change() {
        let mut h = Harness::with_radius(0);
        let pos = ChunkPos::new(0, 0, 0);
        h.update();
        h.deliver_requested();
        h.update();
        assert_eq!(h.world.stats().meshes_built, 1);

        // Identical payload: nothing to do.
        h.deliver(pos, floor());
        h.update();
        assert_eq!(h.world.stats().meshes_built, 1);

        let mut changed = floor();
        changed[block_idx(3, 5, 3)] = 7;
        h.deliver(pos, changed);
        h.update();
        assert_eq!(h.world.stats().meshes_built, 2);
        assert_eq!(h.world.get_block(BlockPos::new(3, 5, 3)), Some(7));

        // Two different payloads within one frame: the last one wins, one build.
        let mut first = floor();
        first[block_idx(1, 1, 1)] = 2;
        let mut second = floor();
        second[block_idx(2, 2, 2)] = 3;
        h.deliver(pos, first);
        h.deliver(pos, second);
        h.update();
        assert_eq!(h.world.stats().meshes_built, 3);
        assert_eq!(h.world.get_block(BlockPos::new(1, 1, 1)), Some(0));
        assert_eq!(h.world.get_block(BlockPos::new(2, 2, 2)), Some(3));
        assert_eq!(h.world.chunks().len(), 1);
    }

    #[test]
    fn missing_neighbor_faces_appear_once_neighbor_loads() {
        let mut h = Harness::with_radius(1);
        let center = ChunkPos::new(0, 0, 0);
        h.update();
        h.source.take();

        let mut block = Box::new([0u16; SECTION_VOLUME]);
        block[block_idx(15, 4, 4)] = 1;
        h.deliver(center, block);
        h.update();
        let faces = h.world.mesh_at(center).map(|m| m.face_count());
        assert_eq!(faces, Some(5));

        h.deliver(ChunkPos::new(1, 0, 0), Box::new([0u16; SECTION_VOLUME]));
        h.update();
        let faces = h.world.mesh_at(center).map(|m| m.face_count());
        assert_eq!(faces, Some(6));
    }

    #[test]
    fn top_and_bottom_of_world_are_open() {
        let mut h = Harness::with_radius(0);
        h.update();
        let mut block = Box::new([0u16; SECTION_VOLUME]);
        block[block_idx(4, 0, 4)] = 1;
        block[block_idx(8, 15, 8)] = 1;
        h.deliver(ChunkPos::new(0, 0, 0), block);
        h.update();

        let mesh = h.world.mesh_at(ChunkPos::new(0, 0, 0)).unwrap();
        assert!(mesh.vertices.iter().any(|v| v.face == BlockFace::Top));
        assert!(mesh.vertices.iter().any(|v| v.face == BlockFace::Bottom));
        assert_eq!(mesh.face_count(), 6 + 6);
    }

    #[test]
    fn local_edit_on_border_dirties_neighbor() {
        let mut h = Harness::with_radius(1);
        h.update();
        h.deliver_requested();
        h.update();
        let built = h.world.stats().meshes_built;

        assert!(h.world.set_block(BlockPos::new(15, 3, 8), 5));
        assert!(h.world.is_dirty(ChunkPos::new(0, 0, 0)));
        assert!(h.world.is_dirty(ChunkPos::new(1, 0, 0)));
        assert!(!h.world.is_dirty(ChunkPos::new(-1, 0, 0)));
        assert!(!h.world.set_block(BlockPos::new(15, 3, 8), 5));

        h.update();
        assert_eq!(h.world.stats().meshes_built, built + 2);
    }

    #[test]
    fn edits_to_unloaded_chunks_are_dropped() {
        let mut h = Harness::with_radius(0);
        h.update();
        assert!(!h.world.set_block(BlockPos::new(100, 0, 100), 1));
        h.tx
            .send(WorldMessage::BlockChanges {
                changes: vec![BlockChange {
                    location: BlockPos::new(-50, 0, 0),
                    block_state: 1,
                }],
            })
            .unwrap();
        h.update();
        assert!(h.world.chunks().is_empty());
    }

    #[test]
    fn late_chunk_outside_region_is_dropped() {
        let mut h = Harness::with_radius(1);
        h.update();
        h.deliver(ChunkPos::new(5, 0, 5), floor());
        h.update();
        assert!(h.world.chunks().get(ChunkPos::new(5, 0, 5)).is_none());
        assert_eq!(h.world.stats().late_chunks_dropped, 1);
    }

    #[test]
    fn budget_keeps_nearest_chunks() {
        let mut h = Harness::new(ClientConfig {
            view_radius: 2,
            world_height: 1,
            max_loaded_chunks: 9,
            mesh_workers: 0,
            ..Default::default()
        });
        h.update();
        let requested = h.source.take();
        assert_eq!(requested.len(), 9);
        assert!(requested.iter().all(|p| p.x.abs() <= 1 && p.z.abs() <= 1));
    }

    #[test]
    fn requests_are_throttled_and_retried() {
        let mut h = Harness::new(ClientConfig {
            view_radius: 1,
            world_height: 1,
            max_requests_per_frame: 4,
            request_retry_frames: 3,
            mesh_workers: 0,
            ..Default::default()
        });
        h.update();
        assert_eq!(h.source.take().len(), 4);
        h.update();
        assert_eq!(h.source.take().len(), 4);
        h.update();
        assert_eq!(h.source.take().len(), 1);

        // Frame 4: the first batch is three frames old and goes out again.
        h.update();
        assert_eq!(h.source.take().len(), 4);
    }

    #[test]
    fn stale_mesh_is_hidden_after_one_frame() {
        let mut h = Harness::with_radius(0);
        let pos = ChunkPos::new(0, 0, 0);
        h.update();
        h.deliver_requested();
        h.update();

        h.world.set_block(BlockPos::new(2, 2, 2), 1);
        assert!(h.world.mesh_at(pos).is_some());

        h.world.frame += 2;
        assert!(h.world.mesh_at(pos).is_none());
        assert_eq!(h.world.visible_meshes().count(), 0);

        h.update();
        assert!(h.world.mesh_at(pos).is_some());
    }

    #[test]
    fn meshes_never_outlive_sections_with_workers() {
        let mut h = Harness::new(ClientConfig {
            view_radius: 0,
            world_height: 1,
            mesh_workers: 1,
            ..Default::default()
        });
        let origin = ChunkPos::new(0, 0, 0);
        h.update();
        h.deliver_requested();
        h.update();

        // Leave before the build can be committed.
        h.player.position.x = 200.0;
        for _ in 0..20 {
            h.update();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(h.world.chunks().get(origin).is_none());
        assert!(h.world.chunk_meshes().get(origin).is_none());
        assert_eq!(h.world.pending_meshes(), 0);
    }

    #[test]
    fn worker_meshes_eventually_land() {
        let mut h = Harness::new(ClientConfig {
            view_radius: 1,
            world_height: 1,
            mesh_workers: 2,
            ..Default::default()
        });
        h.update();
        h.deliver_requested();
        for _ in 0..500 {
            h.update();
            if h.world.chunk_meshes().len() == 9 && h.world.pending_meshes() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(h.world.chunk_meshes().len(), 9);
        assert!(h.world.visible_meshes().count() == 9);
    }

    #[test]
    fn remote_entities_keep_identity() {
        let mut h = Harness::with_radius(0);
        let update = |id: u32, x: f64| WorldMessage::EntityUpdate {
            entity_id: id,
            kind: EntityKind::Player,
            position: Vec3d::new(x, 0.0, 0.0),
            rotation: Vec2f::default(),
            velocity: Vec3d::default(),
        };

        h.tx.send(update(10, 1.0)).unwrap();
        h.tx.send(update(11, 2.0)).unwrap();
        h.update();
        let ten = h.world.remote_entity(10).unwrap();
        let eleven = h.world.remote_entity(11).unwrap();

        h.tx.send(WorldMessage::EntityRemove { entity_id: 10 }).unwrap();
        h.tx.send(update(12, 3.0)).unwrap();
        h.tx.send(update(11, 5.0)).unwrap();
        h.update();

        assert!(h.world.entities().get(ten).is_none());
        assert_eq!(h.world.remote_entity(11), Some(eleven));
        assert_eq!(h.world.entities().get(eleven).map(|e| e.position.x), Some(5.0));
        assert_eq!(h.world.entities().len(), 2);
    }

    #[test]
    fn join_teleports_player_and_hides_own_echo() {
        let mut h = Harness::with_radius(0);
        h.tx.send(WorldMessage::JoinGame {
            entity_id: 4,
            spawn: Vec3d::new(40.0, 20.0, -8.0),
        })
        .unwrap();
        h.tx.send(WorldMessage::EntityUpdate {
            entity_id: 4,
            kind: EntityKind::Player,
            position: Vec3d::default(),
            rotation: Vec2f::default(),
            velocity: Vec3d::default(),
        })
        .unwrap();
        h.update();

        assert_eq!(h.world.local_entity_id(), Some(4));
        assert_eq!(h.player.position, Vec3d::new(40.0, 20.0, -8.0));
        assert!(h.world.entities().is_empty());
        assert_eq!(h.source.take(), vec![ChunkPos::new(2, 0, -1)]);
    }

    #[test]
    fn player_motion_is_applied_each_update() {
        let mut h = Harness::with_radius(0);
        h.player.velocity = Vec3d::new(1.0, 0.0, 0.0);
        h.update();
        h.update();
        assert_eq!(h.player.position.x, 10.0);
    }
}
