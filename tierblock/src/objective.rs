//! Block log-likelihood objective with branch pruning.
//!
//! # Objective (negative log-likelihood, up to a constant)
//!
//! ```text
//! objective(z) = - sum_{r,c : W[r,c] > 0} W[r,c] * ln( W[r,c] / N[r,c] )
//! ```
//!
//! `W` is the block weight and `N` the block cell count from
//! [`BlockStats`]. Lower is better.
//!
//! # Pruning
//!
//! Terms are summed one source-tier column at a time. A column `c` with
//! total weight `W_c` over `S_c` source nodes satisfies
//!
//! ```text
//! sum_r W[r,c] * ln(N[r,c] / W[r,c]) >= W_c * ln(S_c / W_c)
//! ```
//!
//! because `N[r,c] >= S_c` whenever `W[r,c] > 0` and each `W[r,c] <= W_c`.
//! Once the running sum plus this bound over the unvisited columns exceeds
//! the best known objective, the candidate cannot improve on it and the
//! evaluation stops early.

use crate::block_stats::{BlockStats, CountMatrix};

/// Returned when a candidate is pruned.
pub const PRUNED: f64 = f64::INFINITY;

/// Relative slack on the pruning test, absorbs rounding in the bound.
const PRUNE_SLACK: f64 = 1e-9;

/// Contribution of one tier pair: `-w * ln(w / n)`.
#[inline]
pub fn block_term(w: f64, n: f64) -> f64 {
    if w > 0.0 {
        w * (n / w).ln()
    } else {
        0.0
    }
}

/// Lower bound of one column's total contribution.
#[inline]
fn column_lower_bound(col_weight: f64, col_size: f64) -> f64 {
    if col_weight > 0.0 && col_size > 0.0 {
        col_weight * (col_size / col_weight).ln()
    } else {
        0.0
    }
}

/// Objective evaluator with reusable scratch buffers.
///
/// One per search thread; no shared state.
#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    stats: BlockStats,
    /// `tail[c]` bounds the contribution of columns `c..K` from below
    tail: Vec<f64>,
    early_abort: bool,
}

impl ObjectiveEvaluator {
    /// Evaluator for `k` tiers, pruning enabled.
    pub fn new(k: usize) -> Self {
        ObjectiveEvaluator {
            stats: BlockStats::new(k),
            tail: vec![0.0; k + 1],
            early_abort: true,
        }
    }

    /// Turn pruning on or off.
    pub fn with_early_abort(mut self, early_abort: bool) -> Self {
        self.early_abort = early_abort;
        self
    }

    /// Objective of `assignment`, or [`PRUNED`] when it provably exceeds
    /// `current_best`.
    ///
    /// A returned finite value is always the exact objective. Whenever the
    /// exact objective does not exceed `current_best`, the exact value is
    /// returned.
    pub fn evaluate(&mut self, assignment: &[usize], counts: &CountMatrix, current_best: f64) -> f64 {
        self.stats.accumulate(assignment, counts);

        let k = self.stats.k;
        let rows = k + 1;
        let prune = self.early_abort && current_best.is_finite();

        if prune {
            self.tail[k] = 0.0;
            for c in (0..k).rev() {
                self.tail[c] = self.tail[c + 1]
                    + column_lower_bound(self.stats.src_weight[c], self.stats.src_size[c]);
            }
        }

        let threshold = current_best + PRUNE_SLACK * current_best.abs().max(1.0);

        let mut running = 0.0;
        for c in 0..k {
            let offset = c * rows;
            for r in 0..rows {
                running += block_term(self.stats.weight[offset + r], self.stats.cells[offset + r]);
            }
            if prune && running + self.tail[c + 1] > threshold {
                return PRUNED;
            }
        }
        running
    }

    /// Objective of `assignment` with pruning disabled.
    pub fn evaluate_exact(&mut self, assignment: &[usize], counts: &CountMatrix) -> f64 {
        self.evaluate(assignment, counts, f64::INFINITY)
    }
}
