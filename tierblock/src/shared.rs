//! State shared between the coordinator and its search workers.
//!
//! The best assignment and objective are written only by the coordinator.
//! Workers see them through [`SharedView`], which can copy the best state
//! out and clear the worker's own resync flag but never write the
//! assignment.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// The authoritative best state.
#[derive(Debug, Clone)]
pub struct BestState {
    /// Tier of every node
    pub assignment: Vec<usize>,
    /// Objective of `assignment`; +∞ before the first improvement
    pub objective: f64,
    /// Number of improvements applied so far
    pub generation: u64,
}

/// Best state plus the per-worker coordination flags.
#[derive(Debug)]
pub struct SharedState {
    best: RwLock<BestState>,
    resync: Vec<AtomicBool>,
    finished: Vec<AtomicBool>,
    stop: AtomicBool,
}

impl SharedState {
    /// Seed the shared state; the objective starts at +∞.
    pub fn new(assignment: Vec<usize>, num_workers: usize) -> Self {
        SharedState {
            best: RwLock::new(BestState {
                assignment,
                objective: f64::INFINITY,
                generation: 0,
            }),
            resync: (0..num_workers).map(|_| AtomicBool::new(false)).collect(),
            finished: (0..num_workers).map(|_| AtomicBool::new(false)).collect(),
            stop: AtomicBool::new(false),
        }
    }

    /// Number of workers with flags.
    pub fn num_workers(&self) -> usize {
        self.resync.len()
    }

    /// A worker's read-only handle.
    pub fn view(&self) -> SharedView<'_> {
        SharedView { shared: self }
    }

    /// Current best objective.
    pub fn objective(&self) -> f64 {
        self.best.read().objective
    }

    /// Copy of the current best state.
    pub fn snapshot(&self) -> BestState {
        self.best.read().clone()
    }

    /// Move `node` to `tier` and record the new objective. Returns the new
    /// generation.
    pub fn apply(&self, node: usize, tier: usize, objective: f64) -> u64 {
        let mut best = self.best.write();
        best.assignment[node] = tier;
        best.objective = objective;
        best.generation += 1;
        best.generation
    }

    /// Final best state.
    pub fn into_best(self) -> BestState {
        self.best.into_inner()
    }

    /// Ask `worker` to reload; finished workers are skipped.
    pub fn request_resync(&self, worker: usize) {
        if !self.is_finished(worker) {
            self.resync[worker].store(true, Ordering::Release);
        }
    }

    /// Ask every live worker to reload.
    pub fn request_resync_all(&self) {
        for w in 0..self.num_workers() {
            self.request_resync(w);
        }
    }

    /// Every worker has either reloaded since the last request or exited.
    pub fn resync_settled(&self) -> bool {
        (0..self.num_workers())
            .all(|w| !self.resync[w].load(Ordering::Acquire) || self.is_finished(w))
    }

    /// `worker` has exited.
    pub fn is_finished(&self, worker: usize) -> bool {
        self.finished[worker].load(Ordering::Acquire)
    }

    /// Every worker has exited.
    pub fn all_finished(&self) -> bool {
        (0..self.num_workers()).all(|w| self.is_finished(w))
    }

    /// Ask every worker to stop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// A stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Marks `worker` finished when dropped, including on unwind.
    pub fn finish_guard(&self, worker: usize) -> FinishGuard<'_> {
        FinishGuard {
            shared: self,
            worker,
        }
    }
}

/// Drop guard returned by [`SharedState::finish_guard`].
pub struct FinishGuard<'a> {
    shared: &'a SharedState,
    worker: usize,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.shared.finished[self.worker].store(true, Ordering::Release);
    }
}

/// A worker's read-only window on the shared state.
#[derive(Debug, Clone, Copy)]
pub struct SharedView<'a> {
    shared: &'a SharedState,
}

impl SharedView<'_> {
    /// The coordinator asked `worker` to reload.
    pub fn resync_requested(&self, worker: usize) -> bool {
        self.shared.resync[worker].load(Ordering::Acquire)
    }

    /// Copy the best assignment into `local`, then clear the worker's
    /// resync flag. Returns `(objective, generation)` of the copy.
    pub fn resync_into(&self, worker: usize, local: &mut Vec<usize>) -> (f64, u64) {
        let (objective, generation) = {
            let best = self.shared.best.read();
            local.clear();
            local.extend_from_slice(&best.assignment);
            (best.objective, best.generation)
        };
        self.shared.resync[worker].store(false, Ordering::Release);
        (objective, generation)
    }

    /// A stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }
}
