//! Block sufficient statistics for the tier model.
//!
//! Tracks the (K+1)×K edge weight matrix `W[dst_tier, src_tier]` and the
//! number of (destination node, source node) cells mapped to each tier
//! pair. Rows range over all tiers including the sink tier K+1; columns
//! over the K assignable tiers, since only assignable nodes are sources.
//!
//! Statistics are rebuilt from scratch for every candidate. A single move
//! relocates a whole row and a whole column of the count matrix, so there
//! is no cheap delta to apply.

use crate::error::Result;
use crate::layout::TierLayout;
use nalgebra::DMatrix;

/// Destination × source edge counts. Rows are all N nodes, columns the
/// M assignable nodes, in the same global node ordering.
pub type CountMatrix = DMatrix<u64>;

/// Sufficient statistics for one assignment.
///
/// Flattened column-major: pair `(r, c)` lives at `c * (k + 1) + r`,
/// with `r` and `c` the 0-based tier indices (`tier - 1`).
#[derive(Debug, Clone)]
pub struct BlockStats {
    /// Number of assignable tiers K
    pub k: usize,
    /// Summed edge weight per (destination tier, source tier)
    pub weight: Vec<f64>,
    /// Number of node cells per (destination tier, source tier)
    pub cells: Vec<f64>,
    /// Nodes per destination tier (K + 1 entries)
    pub dst_size: Vec<f64>,
    /// Assignable nodes per source tier (K entries)
    pub src_size: Vec<f64>,
    /// Total edge weight sent by each source tier
    pub src_weight: Vec<f64>,
}

impl BlockStats {
    /// Zeroed statistics for `k` tiers.
    pub fn new(k: usize) -> Self {
        BlockStats {
            k,
            weight: vec![0.0; (k + 1) * k],
            cells: vec![0.0; (k + 1) * k],
            dst_size: vec![0.0; k + 1],
            src_size: vec![0.0; k],
            src_weight: vec![0.0; k],
        }
    }

    /// Build statistics for `assignment` in a fresh buffer.
    pub fn from_assignment(assignment: &[usize], counts: &CountMatrix, k: usize) -> Self {
        let mut stats = Self::new(k);
        stats.accumulate(assignment, counts);
        stats
    }

    #[inline]
    fn index(&self, r: usize, c: usize) -> usize {
        c * (self.k + 1) + r
    }

    /// Summed weight between 0-based destination tier `r` and source tier `c`.
    #[inline]
    pub fn weight_stat(&self, r: usize, c: usize) -> f64 {
        self.weight[self.index(r, c)]
    }

    /// Number of (destination, source) node cells in the pair `(r, c)`.
    #[inline]
    pub fn cell_stat(&self, r: usize, c: usize) -> f64 {
        self.cells[self.index(r, c)]
    }

    /// Recompute every statistic in place, reusing the existing buffers.
    ///
    /// * `assignment` - tier labels for all N nodes (1-based)
    /// * `counts` - N × M count matrix
    pub fn accumulate(&mut self, assignment: &[usize], counts: &CountMatrix) {
        let k = self.k;
        let rows = k + 1;

        self.weight.iter_mut().for_each(|x| *x = 0.0);
        self.dst_size.iter_mut().for_each(|x| *x = 0.0);
        self.src_size.iter_mut().for_each(|x| *x = 0.0);
        self.src_weight.iter_mut().for_each(|x| *x = 0.0);

        debug_assert_eq!(assignment.len(), counts.nrows());

        for &t in assignment {
            self.dst_size[t - 1] += 1.0;
        }

        // nalgebra stores column-major, so walk one source column at a time
        for (s, column) in counts.column_iter().enumerate() {
            let c = assignment[s] - 1;
            self.src_size[c] += 1.0;
            let offset = c * rows;
            let mut sent = 0.0;
            for (d, &w) in column.iter().enumerate() {
                if w > 0 {
                    let w = w as f64;
                    self.weight[offset + assignment[d] - 1] += w;
                    sent += w;
                }
            }
            self.src_weight[c] += sent;
        }

        // every (destination, source) cell counts, observed weight or not
        for c in 0..k {
            for r in 0..rows {
                self.cells[c * rows + r] = self.dst_size[r] * self.src_size[c];
            }
        }
    }

    /// Total edge weight over all tier pairs.
    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }

    /// The weight statistic as an integer (K+1)×K matrix.
    pub fn to_block_matrix(&self) -> DMatrix<u64> {
        let rows = self.k + 1;
        DMatrix::from_fn(rows, self.k, |r, c| self.weight[c * rows + r].round() as u64)
    }
}

/// Sum edge weights by (destination tier, source tier).
///
/// Returns a (K+1)×K matrix; row `K` holds the weight received by the
/// sink tier. The assignment must label every node, with assignable nodes
/// in `1..=K` and sinks at `K + 1`.
pub fn extract_block_matrix(
    assignment: &[usize],
    counts: &CountMatrix,
    k: usize,
) -> Result<DMatrix<u64>> {
    let layout = TierLayout::new(counts.nrows(), counts.ncols(), k)?;
    layout.check_assignment(assignment)?;

    let mut block = DMatrix::<u64>::zeros(k + 1, k);
    for (s, column) in counts.column_iter().enumerate() {
        let c = assignment[s] - 1;
        for (d, &w) in column.iter().enumerate() {
            block[(assignment[d] - 1, c)] += w;
        }
    }
    Ok(block)
}
