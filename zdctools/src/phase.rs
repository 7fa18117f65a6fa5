//! Worker pool for track finding over read-out frames
//!
//! Frames are split in contiguous groups, one per worker. Each worker owns
//! its tracker state and runs three phases over its frames: initial track
//! finding, combinatorial extension and fit. A phase starts only when every
//! worker has finished the previous one.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::{Result, ZdcError};

pub trait PhasedWorker: Send {
    type Frame: Send;

    fn find_ltf(&mut self, frame: &mut Self::Frame);
    fn find_ca(&mut self, frame: &mut Self::Frame);
    fn fit(&mut self, frame: &mut Self::Frame);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Ltf,
    Ca,
    Fit,
}

pub const PHASES: [Phase; 3] = [Phase::Ltf, Phase::Ca, Phase::Fit];

/// Worker of frame `i` out of `n_frames`: the last worker takes the remainder.
/// No workers counts as one.
pub fn worker_of(i: usize, n_frames: usize, n_workers: usize) -> usize {
    let n_workers = n_workers.max(1);
    let per_worker = (n_frames / n_workers).max(1);
    (i / per_worker).min(n_workers - 1)
}

/// Split frames in `n_workers` contiguous groups, some possibly empty
pub fn partition<T>(frames: Vec<T>, n_workers: usize) -> Vec<Vec<T>> {
    let n_workers = n_workers.max(1);
    let n_frames = frames.len();
    let mut parts: Vec<Vec<T>> = (0..n_workers).map(|_| Vec::new()).collect();
    for (i, f) in frames.into_iter().enumerate() {
        parts[worker_of(i, n_frames, n_workers)].push(f);
    }
    parts
}

pub struct PhasedPool<W: PhasedWorker> {
    pool: ThreadPool,
    workers: Vec<W>,
}

impl<W: PhasedWorker> PhasedPool<W> {
    /// One thread per worker
    pub fn new(workers: Vec<W>) -> Result<Self> {
        if workers.is_empty() {
            return Err(ZdcError::NoWorkers);
        }
        let pool = ThreadPoolBuilder::new().num_threads(workers.len()).build()?;
        Ok(PhasedPool { pool, workers })
    }

    pub fn workers(&self) -> &[W] {
        &self.workers
    }

    /// Run all phases over `frames`, returned in their original order
    pub fn process(&mut self, frames: Vec<W::Frame>) -> Vec<W::Frame> {
        let mut parts = partition(frames, self.workers.len());
        let workers = &mut self.workers;
        self.pool.install(|| {
            for phase in PHASES {
                workers
                    .par_iter_mut()
                    .zip(parts.par_iter_mut())
                    .for_each(|(w, frames)| {
                        for f in frames.iter_mut() {
                            match phase {
                                Phase::Ltf => w.find_ltf(f),
                                Phase::Ca => w.find_ca(f),
                                Phase::Fit => w.fit(f),
                            }
                        }
                    });
                debug!("{:?} phase done", phase);
            }
        });
        parts.into_iter().flatten().collect()
    }
}
