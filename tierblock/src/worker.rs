//! Search worker: random single-node hill climbing on a private copy.
//!
//! Random proposals only target nodes in the worker's own contiguous slice
//! of the assignable range, so no two workers draw the same node.
//! A strict improvement is reported on a capacity-1 channel and the worker
//! waits until the coordinator has consumed it and asked for a resync.
//!
//! Every `sweep_interval` consecutive failures the worker tries every
//! single-node move over all assignable nodes. If none beats the worker's
//! cached best objective, the worker has converged and exits. Otherwise the
//! first improving move is reported like any other improvement, since it
//! may lie in the slice of a worker that has already exited. The sweep
//! compares against the cached value even if the coordinator published a
//! better state mid-sweep; the flag is only honoured between proposals.

use crate::block_stats::CountMatrix;
use crate::error::{FitError, Result};
use crate::layout::TierLayout;
use crate::objective::ObjectiveEvaluator;
use crate::shared::SharedView;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;

/// One accepted move, sent from a worker to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Improvement {
    /// Reporting worker
    pub worker: usize,
    /// Moved node
    pub node: usize,
    /// New 1-based tier of `node`
    pub tier: usize,
    /// Objective after the move
    pub objective: f64,
    /// Generation of the shared state the move was evaluated against
    pub generation: u64,
}

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Proposing random moves
    Searching,
    /// A report is out; waiting for the coordinator
    AwaitingAck,
    /// No single-node move improves the cached best
    Converged,
    /// Proposal or wall-clock budget exhausted
    Stopped,
    /// Aborted on an error or panic
    Failed,
}

impl WorkerState {
    /// Converged, stopped or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Converged | WorkerState::Stopped | WorkerState::Failed
        )
    }
}

/// Work done by one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounters {
    /// Random moves evaluated
    pub proposals: usize,
    /// Improvements sent to the coordinator
    pub reported: usize,
    /// Exhaustive sweeps started
    pub sweeps: usize,
    /// Reloads of the shared best state
    pub resyncs: usize,
}

/// Terminal report of one worker.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// Worker id
    pub worker: usize,
    /// Terminal state
    pub state: WorkerState,
    /// Work done before exiting
    pub counters: WorkerCounters,
    /// Why the worker failed, if it did
    pub error: Option<String>,
}

impl WorkerOutcome {
    /// Outcome of a worker that died with `message`.
    pub fn failed(worker: usize, message: String) -> Self {
        WorkerOutcome {
            worker,
            state: WorkerState::Failed,
            counters: WorkerCounters::default(),
            error: Some(message),
        }
    }
}

enum SweepResult {
    /// First improving move found: `(node, tier, objective)`
    Improvable(usize, usize, f64),
    Converged,
    Interrupted,
}

/// Per-worker RNG seed.
pub fn worker_seed(seed: u64, worker: usize) -> u64 {
    seed ^ (worker as u64 + 1).wrapping_mul(2654435761)
}

/// One hill-climbing worker over a slice of the assignable nodes.
pub struct SearchWorker<'a> {
    id: usize,
    range: Range<usize>,
    layout: TierLayout,
    counts: &'a CountMatrix,
    shared: SharedView<'a>,
    tx: Sender<Improvement>,
    rng: SmallRng,
    evaluator: ObjectiveEvaluator,
    local: Vec<usize>,
    local_best: f64,
    generation: u64,
    no_improve: usize,
    sweep_interval: usize,
    max_proposals: Option<usize>,
    counters: WorkerCounters,
}

/// Construction arguments for [`SearchWorker`].
pub struct WorkerArgs<'a> {
    /// Worker id
    pub id: usize,
    /// Nodes this worker draws random proposals from
    pub range: Range<usize>,
    /// Sizes of the fit
    pub layout: TierLayout,
    /// N x M count matrix
    pub counts: &'a CountMatrix,
    /// Read-only view of the shared best state
    pub shared: SharedView<'a>,
    /// Capacity-1 report channel
    pub tx: Sender<Improvement>,
    /// Run seed; mixed with `id`
    pub seed: u64,
    /// Failures before a sweep
    pub sweep_interval: usize,
    /// Proposal budget
    pub max_proposals: Option<usize>,
    /// Prune hopeless candidates
    pub early_abort: bool,
}

impl<'a> SearchWorker<'a> {
    /// Worker with an empty private copy; it loads the shared state on start.
    pub fn new(args: WorkerArgs<'a>) -> Self {
        let k = args.layout.num_tiers;
        SearchWorker {
            id: args.id,
            range: args.range,
            layout: args.layout,
            counts: args.counts,
            shared: args.shared,
            tx: args.tx,
            rng: SmallRng::seed_from_u64(worker_seed(args.seed, args.id)),
            evaluator: ObjectiveEvaluator::new(k).with_early_abort(args.early_abort),
            local: Vec::with_capacity(args.layout.num_nodes),
            local_best: f64::INFINITY,
            generation: 0,
            no_improve: 0,
            sweep_interval: args.sweep_interval.max(1),
            max_proposals: args.max_proposals,
            counters: WorkerCounters::default(),
        }
    }

    /// Search until a terminal state. Errors end in `Failed` rather than
    /// propagating.
    pub fn run(mut self) -> WorkerOutcome {
        let (state, error) = match self.search() {
            Ok(state) => (state, None),
            Err(e) => {
                warn!("worker {}: {}", self.id, e);
                (WorkerState::Failed, Some(e.to_string()))
            }
        };

        debug!(
            "worker {} finished {:?}: {} proposals, {} reported, {} sweeps, {} resyncs",
            self.id,
            state,
            self.counters.proposals,
            self.counters.reported,
            self.counters.sweeps,
            self.counters.resyncs
        );

        WorkerOutcome {
            worker: self.id,
            state,
            counters: self.counters,
            error,
        }
    }

    fn search(&mut self) -> Result<WorkerState> {
        self.resync();

        if self.range.is_empty() || self.layout.num_tiers < 2 {
            return Ok(WorkerState::Converged);
        }

        let mut state = WorkerState::Searching;
        loop {
            state = match state {
                WorkerState::Searching => self.step()?,
                WorkerState::AwaitingAck => self.await_ack(),
                terminal => {
                    debug_assert!(terminal.is_terminal());
                    return Ok(terminal);
                }
            };
        }
    }

    fn resync(&mut self) {
        let (objective, generation) = self.shared.resync_into(self.id, &mut self.local);
        self.local_best = objective;
        self.generation = generation;
        self.no_improve = 0;
        self.counters.resyncs += 1;
    }

    /// A uniformly random tier in `1..=K` other than `current`.
    fn propose_tier(&mut self, current: usize) -> usize {
        let t = self.rng.random_range(1..self.layout.num_tiers);
        if t >= current {
            t + 1
        } else {
            t
        }
    }

    fn step(&mut self) -> Result<WorkerState> {
        if self.shared.stop_requested() {
            return Ok(WorkerState::Stopped);
        }

        if self.shared.resync_requested(self.id) {
            self.resync();
        }

        if let Some(max) = self.max_proposals {
            if self.counters.proposals >= max {
                return Ok(WorkerState::Stopped);
            }
        }

        if self.no_improve >= self.sweep_interval {
            self.counters.sweeps += 1;
            return match self.sweep() {
                SweepResult::Converged => Ok(WorkerState::Converged),
                SweepResult::Interrupted => Ok(WorkerState::Stopped),
                SweepResult::Improvable(node, tier, value) => {
                    self.report(node, tier, value)?;
                    Ok(WorkerState::AwaitingAck)
                }
            };
        }

        let node = self.rng.random_range(self.range.clone());
        let old = self.local[node];
        let tier = self.propose_tier(old);

        self.local[node] = tier;
        self.counters.proposals += 1;

        let value = self.evaluator.evaluate(&self.local, self.counts, self.local_best);

        if value < self.local_best {
            self.report(node, tier, value)?;
            Ok(WorkerState::AwaitingAck)
        } else {
            self.local[node] = old;
            self.no_improve += 1;
            Ok(WorkerState::Searching)
        }
    }

    /// Try every single-node move, leaving the private copy unchanged.
    fn sweep(&mut self) -> SweepResult {
        let k = self.layout.num_tiers;
        for node in 0..self.layout.num_assignable {
            if self.shared.stop_requested() {
                return SweepResult::Interrupted;
            }
            let old = self.local[node];
            for tier in (1..=k).filter(|&t| t != old) {
                self.local[node] = tier;
                let value = self.evaluator.evaluate(&self.local, self.counts, self.local_best);
                self.local[node] = old;
                if value < self.local_best {
                    return SweepResult::Improvable(node, tier, value);
                }
            }
        }
        SweepResult::Converged
    }

    fn report(&mut self, node: usize, tier: usize, objective: f64) -> Result<()> {
        let msg = Improvement {
            worker: self.id,
            node,
            tier,
            objective,
            generation: self.generation,
        };
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.counters.reported += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(FitError::WorkerFault {
                worker: self.id,
                message: "improvement channel already holds an unconsumed report".into(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(FitError::WorkerFault {
                worker: self.id,
                message: "coordinator dropped the improvement channel".into(),
            }),
        }
    }

    /// Yield until the coordinator asks for a resync. A resync requested
    /// for someone else's improvement is honoured, but the worker keeps
    /// waiting while its own report is still queued.
    fn await_ack(&mut self) -> WorkerState {
        loop {
            if self.shared.stop_requested() {
                return WorkerState::Stopped;
            }
            if self.shared.resync_requested(self.id) {
                self.resync();
                if self.tx.is_empty() {
                    return WorkerState::Searching;
                }
            }
            std::thread::yield_now();
        }
    }
}
