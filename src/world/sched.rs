use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use flume::{Receiver, Sender};
use log::{debug, trace};
use stopwatch::Stopwatch;

use super::{
    mesh::{build_mesh, BoundaryPolicy, ChunkMesh, Neighbors},
    pos::ChunkPos,
    section::ChunkSection,
};

/// Set when the result of a build must not be committed.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct MeshJob {
    pub section: ChunkSection,
    pub neighbors: Neighbors,
    pub token: CancelToken,
}

pub struct MeshResult {
    pub pos: ChunkPos,
    pub revision: u64,
    pub mesh: ChunkMesh,
}

struct PendingBuild {
    revision: u64,
    token: CancelToken,
}

/// Builds meshes off the update thread. Finished meshes are only handed back
/// through `completed`, which the update thread polls.
pub struct MeshScheduler {
    policy: BoundaryPolicy,
    job_tx: Option<Sender<MeshJob>>,
    result_tx: Sender<(MeshResult, CancelToken)>,
    result_rx: Receiver<(MeshResult, CancelToken)>,
    pending: HashMap<ChunkPos, PendingBuild>,
    workers: Vec<JoinHandle<()>>,
}

impl MeshScheduler {
    /// With zero threads every job is built inline during `submit`.
    pub fn new(num_threads: u32, policy: BoundaryPolicy) -> MeshScheduler {
        let (result_tx, result_rx) = flume::unbounded();
        let mut scheduler = MeshScheduler {
            policy,
            job_tx: None,
            result_tx,
            result_rx,
            pending: HashMap::new(),
            workers: Vec::new(),
        };
        if num_threads > 0 {
            scheduler.start(num_threads);
        }
        scheduler
    }

    fn start(&mut self, num_threads: u32) {
        let (job_tx, job_rx) = flume::unbounded::<MeshJob>();
        for i in 0..num_threads {
            let rx = job_rx.clone();
            let tx = self.result_tx.clone();
            let policy = self.policy;

            let handle = std::thread::Builder::new()
                .name(format!("mesher-{}", i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if job.token.is_cancelled() {
                            continue;
                        }
                        let result = Self::build(&job, policy);
                        if tx.send((result, job.token)).is_err() {
                            break;
                        }
                    }
                });

            match handle {
                Ok(handle) => self.workers.push(handle),
                Err(e) => debug!("Failed to spawn mesh worker {}: {}", i, e),
            }
        }

        if self.workers.is_empty() {
            debug!("No mesh workers running, building inline");
        } else {
            self.job_tx = Some(job_tx);
        }
    }

    fn build(job: &MeshJob, policy: BoundaryPolicy) -> MeshResult {
        let sw = Stopwatch::start_new();
        let mesh = build_mesh(&job.section, &job.neighbors, policy);
        trace!(
            "Meshed {:?} ({} faces) in {}ms",
            job.section.pos(),
            mesh.face_count(),
            sw.elapsed_ms()
        );
        MeshResult {
            pos: job.section.pos(),
            revision: job.section.revision(),
            mesh,
        }
    }

    pub fn is_pending(&self, pos: ChunkPos, revision: u64) -> bool {
        self.pending
            .get(&pos)
            .map_or(false, |p| p.revision == revision)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queues a build. An older build still in flight for the same position
    /// is cancelled.
    pub fn submit(&mut self, section: ChunkSection, neighbors: Neighbors) {
        let pos = section.pos();
        let token = CancelToken::default();
        if let Some(previous) = self.pending.insert(
            pos,
            PendingBuild {
                revision: section.revision(),
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let job = MeshJob {
            section,
            neighbors,
            token,
        };

        let job = match &self.job_tx {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(flume::SendError(job)) => job,
            },
            None => job,
        };

        let result = Self::build(&job, self.policy);
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.result_tx.send((result, job.token));
    }

    /// Called when a chunk leaves the view radius.
    pub fn cancel(&mut self, pos: ChunkPos) {
        if let Some(pending) = self.pending.remove(&pos) {
            pending.token.cancel();
        }
    }

    /// Drains finished builds without blocking. Cancelled results are
    /// returned in the second list so they can be counted.
    pub fn completed(&mut self) -> (Vec<MeshResult>, usize) {
        let mut finished = Vec::new();
        let mut cancelled = 0;

        for (result, token) in self.result_rx.try_iter() {
            if token.is_cancelled() {
                cancelled += 1;
                continue;
            }
            if self.is_pending(result.pos, result.revision) {
                self.pending.remove(&result.pos);
            }
            finished.push(result);
        }

        (finished, cancelled)
    }
}

impl Drop for MeshScheduler {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.token.cancel();
        }
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
