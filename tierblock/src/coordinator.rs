//! Coordinator: owns the best assignment and serializes improvements.
//!
//! 1. Seed the shared state (assignable nodes in tier 1, sinks in K+1,
//!    objective +∞) and spawn one worker per partition of `0..M`.
//! 2. Poll every worker channel in turn. Each report is checked against
//!    the current shared state, applied if it still strictly improves the
//!    objective, and followed by a resync request to every live worker.
//!    The coordinator then yields until each worker has reloaded or exited.
//! 3. Stop once every worker is terminal and the channels are drained.
//!
//! A report computed against an older generation is re-evaluated on the
//! current shared assignment before it is applied, so the shared objective
//! is always the exact objective of the shared assignment.

use crate::block_stats::CountMatrix;
use crate::error::{FitError, Result};
use crate::layout::TierLayout;
use crate::objective::ObjectiveEvaluator;
use crate::options::FitOptions;
use crate::shared::SharedState;
use crate::worker::{Improvement, SearchWorker, WorkerArgs, WorkerOutcome, WorkerState};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// An improvement accepted into the shared state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedImprovement {
    /// Reporting worker
    pub worker: usize,
    /// Moved node
    pub node: usize,
    /// New tier of `node`
    pub tier: usize,
    /// Shared objective after the move
    pub objective: f64,
    /// Generation created by the move
    pub generation: u64,
}

/// Result of a tier fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Exact objective of `assignment`
    pub objective: f64,
    /// Tier labels for all N nodes; sinks carry K + 1
    pub assignment: Vec<usize>,
    /// K
    pub num_tiers: usize,
    /// Applied improvements in the order they were applied
    pub history: Vec<AppliedImprovement>,
    /// Improvements rejected because they no longer improved the objective
    pub rejected: usize,
    /// Terminal report of every worker, by id
    pub outcomes: Vec<WorkerOutcome>,
    /// Fewer than K tiers in use among assignable nodes
    pub degenerate: bool,
    /// Wall-clock time of the fit
    pub elapsed: Duration,
}

impl FitResult {
    /// Every worker converged; none failed or ran out of budget.
    pub fn converged(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.state == WorkerState::Converged)
    }

    /// Workers that ended in `Failed`.
    pub fn failed_workers(&self) -> Vec<&WorkerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == WorkerState::Failed)
            .collect()
    }
}

/// Parallel local-search fit of the tier block model.
///
/// # Usage
///
/// ```ignore
/// use tierblock::{FitOptions, TierFit};
///
/// let fit = TierFit::new(FitOptions::default().with_workers(4));
/// let result = fit.fit(&counts, num_assignable, 3)?;
/// println!("{} {:?}", result.objective, result.assignment);
/// ```
pub struct TierFit {
    options: FitOptions,
}

impl TierFit {
    /// A fit with the given options.
    pub fn new(options: FitOptions) -> Self {
        TierFit { options }
    }

    /// Fit `num_tiers` tiers to an N × M count matrix whose first
    /// `num_assignable` nodes are assignable.
    pub fn fit(
        &self,
        counts: &CountMatrix,
        num_assignable: usize,
        num_tiers: usize,
    ) -> Result<FitResult> {
        let layout = TierLayout::new(counts.nrows(), num_assignable, num_tiers)?;
        layout.check_counts(counts)?;

        let started = Instant::now();
        let num_workers = self
            .options
            .num_workers
            .max(1)
            .min(layout.num_assignable.max(1));

        info!(
            "tier fit: N={} ({} sinks), M={}, K={}, workers={}, sweep interval={}",
            layout.num_nodes,
            layout.num_sinks(),
            layout.num_assignable,
            layout.num_tiers,
            num_workers,
            self.options.sweep_interval
        );

        let shared = SharedState::new(layout.initial_assignment(), num_workers);

        let (history, rejected, outcomes) = if layout.num_assignable == 0 {
            (vec![], 0, vec![])
        } else {
            self.run_workers(counts, layout, &shared, started)?
        };

        let mut best = shared.into_best();

        // +inf only means nothing was accepted; report the seed's value
        if history.is_empty() {
            best.objective = ObjectiveEvaluator::new(layout.num_tiers)
                .evaluate_exact(&best.assignment, counts);
        }

        debug_assert!(layout.check_assignment(&best.assignment).is_ok());

        let degenerate = layout.is_degenerate(&best.assignment);
        if degenerate {
            warn!(
                "degenerate fit: {} of {} tiers in use",
                layout.distinct_tiers(&best.assignment),
                layout.num_tiers
            );
        }

        for o in outcomes.iter().filter(|o| o.state == WorkerState::Failed) {
            warn!(
                "worker {} failed: {}",
                o.worker,
                o.error.as_deref().unwrap_or("unknown error")
            );
        }

        let elapsed = started.elapsed();
        info!(
            "tier fit done: objective={:.4}, {} improvements, {} rejected, {:.2?}",
            best.objective,
            history.len(),
            rejected,
            elapsed
        );

        Ok(FitResult {
            objective: best.objective,
            assignment: best.assignment,
            num_tiers: layout.num_tiers,
            history,
            rejected,
            outcomes,
            degenerate,
            elapsed,
        })
    }

    fn run_workers(
        &self,
        counts: &CountMatrix,
        layout: TierLayout,
        shared: &SharedState,
        started: Instant,
    ) -> Result<(Vec<AppliedImprovement>, usize, Vec<WorkerOutcome>)> {
        let ranges = layout.partition(shared.num_workers());

        thread::scope(|scope| {
            let mut receivers = Vec::with_capacity(ranges.len());
            let mut handles = Vec::with_capacity(ranges.len());

            for (id, range) in ranges.into_iter().enumerate() {
                let (tx, rx) = bounded::<Improvement>(1);
                receivers.push(rx);

                let worker = SearchWorker::new(WorkerArgs {
                    id,
                    range,
                    layout,
                    counts,
                    shared: shared.view(),
                    tx,
                    seed: self.options.seed,
                    sweep_interval: self.options.sweep_interval,
                    max_proposals: self.options.max_proposals,
                    early_abort: self.options.early_abort,
                });

                match spawn_worker(scope, shared, id, worker) {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        shared.request_stop();
                        return Err(FitError::Spawn { worker: id, source });
                    }
                }
            }

            let mut drain = Drain::new(counts, layout, shared, self.options.early_abort);
            let polled = drain.poll(&receivers, self.options.max_duration, started);
            if polled.is_err() {
                shared.request_stop();
            }

            let outcomes: Vec<WorkerOutcome> = handles
                .into_iter()
                .enumerate()
                .map(|(id, handle)| join_worker(id, handle))
                .collect();

            polled?;
            Ok((drain.history, drain.rejected, outcomes))
        })
    }
}

/// Run `worker` on its own named thread; `finished` is set on exit or unwind.
fn spawn_worker<'scope, 'env>(
    scope: &'scope thread::Scope<'scope, 'env>,
    shared: &'env SharedState,
    id: usize,
    worker: SearchWorker<'env>,
) -> std::io::Result<thread::ScopedJoinHandle<'scope, WorkerOutcome>> {
    thread::Builder::new()
        .name(format!("tierblock-worker-{}", id))
        .spawn_scoped(scope, move || {
            let _finish = shared.finish_guard(id);
            worker.run()
        })
}

/// A panicked worker becomes a `Failed` outcome.
fn join_worker(id: usize, handle: thread::ScopedJoinHandle<'_, WorkerOutcome>) -> WorkerOutcome {
    match handle.join() {
        Ok(outcome) => outcome,
        Err(payload) => WorkerOutcome::failed(id, panic_message(payload.as_ref())),
    }
}

/// The coordinator's single-threaded drain loop.
struct Drain<'a> {
    counts: &'a CountMatrix,
    layout: TierLayout,
    shared: &'a SharedState,
    evaluator: ObjectiveEvaluator,
    candidate: Vec<usize>,
    history: Vec<AppliedImprovement>,
    rejected: usize,
}

impl<'a> Drain<'a> {
    fn new(
        counts: &'a CountMatrix,
        layout: TierLayout,
        shared: &'a SharedState,
        early_abort: bool,
    ) -> Self {
        Drain {
            counts,
            layout,
            shared,
            evaluator: ObjectiveEvaluator::new(layout.num_tiers).with_early_abort(early_abort),
            candidate: Vec::with_capacity(layout.num_nodes),
            history: vec![],
            rejected: 0,
        }
    }

    fn poll(
        &mut self,
        receivers: &[Receiver<Improvement>],
        max_duration: Option<Duration>,
        started: Instant,
    ) -> Result<()> {
        loop {
            for rx in receivers {
                thread::yield_now();
                match rx.try_recv() {
                    Ok(improvement) => self.consider(improvement)?,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
                }
            }

            if self.shared.all_finished() {
                // reports left behind by stopped or failed workers
                for rx in receivers {
                    while let Ok(improvement) = rx.try_recv() {
                        self.consider(improvement)?;
                    }
                }
                return Ok(());
            }

            if let Some(limit) = max_duration {
                if !self.shared.stop_requested() && started.elapsed() >= limit {
                    info!("time budget of {:.2?} exhausted, stopping workers", limit);
                    self.shared.request_stop();
                }
            }
        }
    }

    fn consider(&mut self, improvement: Improvement) -> Result<()> {
        let Improvement {
            worker,
            node,
            tier,
            ..
        } = improvement;

        if worker >= self.shared.num_workers() {
            return Err(FitError::CoordinatorFault(format!(
                "report from unknown worker {}",
                worker
            )));
        }

        if !self.layout.is_assignable(node) || !(1..=self.layout.num_tiers).contains(&tier) {
            warn!(
                "worker {} reported an invalid move: node {} -> tier {}",
                worker, node, tier
            );
            self.reject(worker);
            return Ok(());
        }

        let current = self.shared.snapshot();
        let objective = if improvement.generation == current.generation {
            improvement.objective
        } else {
            // evaluated against an older state; check it on the current one
            self.candidate.clear();
            self.candidate.extend_from_slice(&current.assignment);
            self.candidate[node] = tier;
            self.evaluator
                .evaluate(&self.candidate, self.counts, current.objective)
        };

        let improves = objective < current.objective;
        if !improves {
            debug!(
                "rejected node {} -> tier {} from worker {}: {:.4} does not improve {:.4}",
                node, tier, worker, objective, current.objective
            );
            self.reject(worker);
            return Ok(());
        }

        let generation = self.shared.apply(node, tier, objective);
        self.history.push(AppliedImprovement {
            worker,
            node,
            tier,
            objective,
            generation,
        });
        debug!(
            "generation {}: node {} -> tier {} (worker {}), objective {:.4}",
            generation, node, tier, worker, objective
        );

        self.shared.request_resync_all();
        self.wait_for_resync();
        Ok(())
    }

    /// Release a waiting worker without touching the shared state.
    fn reject(&mut self, worker: usize) {
        self.rejected += 1;
        self.shared.request_resync(worker);
        self.wait_for_resync();
    }

    fn wait_for_resync(&self) {
        while !self.shared.resync_settled() {
            thread::yield_now();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Fit a tier block model with default options and `num_workers` workers.
///
/// * `counts` - N × M destination × source count matrix
/// * `num_assignable` - M, the number of nodes eligible for reassignment
/// * `num_nodes` - N, including the fixed sinks that follow the assignable nodes
/// * `num_tiers` - K
/// * `num_workers` - number of concurrent search workers (>= 1)
///
/// Returns the final objective and the tier of every node.
pub fn fit_block_model(
    counts: &CountMatrix,
    num_assignable: usize,
    num_nodes: usize,
    num_tiers: usize,
    num_workers: usize,
) -> Result<(f64, Vec<usize>)> {
    if num_nodes != counts.nrows() {
        return Err(FitError::InvalidInput(format!(
            "{} nodes declared but the count matrix has {} rows",
            num_nodes,
            counts.nrows()
        )));
    }
    if num_workers == 0 {
        return Err(FitError::InvalidInput(
            "at least one worker is required".into(),
        ));
    }
    let options = FitOptions::default().with_workers(num_workers);
    let result = TierFit::new(options).fit(counts, num_assignable, num_tiers)?;
    Ok((result.objective, result.assignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Sender;
    use nalgebra::DMatrix;
    use std::ops::Range;

    /// Groups {0, 1} and {2, 3}, sinks {4, 5}.
    fn six_node_counts() -> CountMatrix {
        DMatrix::from_row_slice(
            6,
            4,
            &[
                9, 8, 1, 0, //
                8, 9, 0, 1, //
                1, 0, 9, 8, //
                0, 1, 8, 9, //
                2, 2, 1, 1, //
                1, 1, 2, 2, //
            ],
        )
    }

    fn exact(assignment: &[usize], counts: &CountMatrix) -> f64 {
        ObjectiveEvaluator::new(2).evaluate_exact(assignment, counts)
    }

    fn report(node: usize, tier: usize, objective: f64, generation: u64) -> Improvement {
        Improvement {
            worker: 0,
            node,
            tier,
            objective,
            generation,
        }
    }

    /// Feed one report to the drain while a helper thread plays worker 0,
    /// reloading once its resync flag is raised. Returns what it reloaded.
    fn consider_with_ack(
        drain: &mut Drain,
        shared: &SharedState,
        improvement: Improvement,
    ) -> Vec<usize> {
        thread::scope(|scope| {
            let ack = scope.spawn(|| {
                let view = shared.view();
                while !view.resync_requested(0) {
                    thread::yield_now();
                }
                let mut local = vec![];
                view.resync_into(0, &mut local);
                local
            });
            drain.consider(improvement).unwrap();
            ack.join().unwrap()
        })
    }

    #[test]
    fn test_stale_report_without_gain_is_rejected() {
        let counts = six_node_counts();
        let layout = TierLayout::new(6, 4, 2).unwrap();
        let shared = SharedState::new(layout.initial_assignment(), 1);

        let planted = vec![1, 1, 2, 2, 3, 3];
        shared.apply(2, 2, exact(&[1, 1, 2, 1, 3, 3], &counts));
        shared.apply(3, 2, exact(&planted, &counts));
        let before = shared.snapshot();

        // computed against the seed, where moving node 0 helped
        let mut drain = Drain::new(&counts, layout, &shared, true);
        let reloaded = consider_with_ack(&mut drain, &shared, report(0, 2, -1e9, 0));

        assert_eq!(drain.rejected, 1);
        assert!(drain.history.is_empty());
        assert_eq!(reloaded, planted);

        let after = shared.snapshot();
        assert_eq!(after.assignment, before.assignment);
        assert_eq!(after.generation, 2);
        assert_eq!(after.objective.to_bits(), before.objective.to_bits());
    }

    #[test]
    fn test_stale_report_is_reevaluated() {
        let counts = six_node_counts();
        let layout = TierLayout::new(6, 4, 2).unwrap();
        let shared = SharedState::new(layout.initial_assignment(), 1);
        shared.apply(2, 2, exact(&[1, 1, 2, 1, 3, 3], &counts));

        let mut drain = Drain::new(&counts, layout, &shared, true);
        let reloaded = consider_with_ack(&mut drain, &shared, report(3, 2, 0.0, 0));

        let planted = vec![1, 1, 2, 2, 3, 3];
        assert_eq!(drain.rejected, 0);
        assert_eq!(reloaded, planted);
        assert_eq!(drain.history.len(), 1);
        assert_eq!(drain.history[0].generation, 2);

        // the claimed value is replaced by the value on the current state
        approx::assert_abs_diff_eq!(
            drain.history[0].objective,
            exact(&planted, &counts),
            epsilon = 1e-9
        );
        assert_eq!(shared.objective(), drain.history[0].objective);
    }

    #[test]
    fn test_current_report_without_gain_is_rejected() {
        let counts = six_node_counts();
        let layout = TierLayout::new(6, 4, 2).unwrap();
        let shared = SharedState::new(layout.initial_assignment(), 1);
        let value = exact(&[1, 1, 2, 1, 3, 3], &counts);
        shared.apply(2, 2, value);

        let mut drain = Drain::new(&counts, layout, &shared, true);
        consider_with_ack(&mut drain, &shared, report(0, 2, value, 1));

        assert_eq!(drain.rejected, 1);
        assert_eq!(shared.snapshot().assignment, vec![1, 1, 2, 1, 3, 3]);
        assert_eq!(shared.snapshot().generation, 1);
    }

    #[test]
    fn test_unknown_worker_is_a_coordinator_fault() {
        let counts = six_node_counts();
        let layout = TierLayout::new(6, 4, 2).unwrap();
        let shared = SharedState::new(layout.initial_assignment(), 1);
        let mut drain = Drain::new(&counts, layout, &shared, true);

        let mut improvement = report(0, 2, -1.0, 0);
        improvement.worker = 5;
        assert!(matches!(
            drain.consider(improvement),
            Err(FitError::CoordinatorFault(_))
        ));
    }

    fn search_worker<'a>(
        id: usize,
        range: Range<usize>,
        layout: TierLayout,
        counts: &'a CountMatrix,
        shared: &'a SharedState,
        tx: Sender<Improvement>,
    ) -> SearchWorker<'a> {
        SearchWorker::new(WorkerArgs {
            id,
            range,
            layout,
            counts,
            shared: shared.view(),
            tx,
            seed: 3,
            sweep_interval: 50,
            max_proposals: None,
            early_abort: true,
        })
    }

    #[test]
    fn test_failed_worker_leaves_fit_running() {
        let counts = six_node_counts();
        let layout = TierLayout::new(6, 4, 2).unwrap();
        let shared = SharedState::new(layout.initial_assignment(), 2);
        let ranges = layout.partition(2);

        let (history, rejected, outcomes) = thread::scope(|scope| {
            // worker 1 loses its channel and fails on its first report
            let (tx, rx) = bounded(1);
            drop(rx);
            let worker = search_worker(1, ranges[1].clone(), layout, &counts, &shared, tx);
            let failed = join_worker(1, spawn_worker(scope, &shared, 1, worker).unwrap());

            let (tx, rx) = bounded(1);
            let worker = search_worker(0, ranges[0].clone(), layout, &counts, &shared, tx);
            let live = spawn_worker(scope, &shared, 0, worker).unwrap();

            let mut drain = Drain::new(&counts, layout, &shared, true);
            drain.poll(&[rx], None, Instant::now()).unwrap();
            let live = join_worker(0, live);

            (drain.history, drain.rejected, vec![live, failed])
        });

        let best = shared.into_best();
        let result = FitResult {
            objective: best.objective,
            assignment: best.assignment,
            num_tiers: 2,
            history,
            rejected,
            outcomes,
            degenerate: false,
            elapsed: Duration::ZERO,
        };

        assert!(!result.converged());
        let failed = result.failed_workers();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].worker, 1);
        assert!(failed[0].error.is_some());
        assert_eq!(result.outcomes[0].state, WorkerState::Converged);

        // the surviving worker still reaches the planted split
        let a = &result.assignment;
        assert!(a[0] == a[1] && a[2] == a[3] && a[0] != a[2]);
        assert_eq!(&a[4..], &[3, 3]);
        assert!(!result.history.is_empty());
        for w in result.history.windows(2) {
            assert!(w[1].objective < w[0].objective);
        }
        approx::assert_abs_diff_eq!(result.objective, exact(a, &counts), epsilon = 1e-9);
    }
}
