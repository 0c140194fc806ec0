//! Node layout: which nodes are assignable, which are pinned sinks,
//! and how the assignable index space is split across search workers.
//!
//! Tier labels are 1-based. Assignable nodes carry a label in `1..=K`
//! and every fixed-sink node carries `K + 1`.

use crate::block_stats::CountMatrix;
use crate::error::{FitError, Result};
use log::warn;
use std::ops::Range;

/// Sizes N, M and K of one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLayout {
    /// Total number of nodes N (rows of the count matrix)
    pub num_nodes: usize,
    /// Number of assignable nodes M (columns of the count matrix)
    pub num_assignable: usize,
    /// Number of latent tiers K
    pub num_tiers: usize,
}

impl TierLayout {
    /// Validated layout; K >= 1 and M <= N.
    pub fn new(num_nodes: usize, num_assignable: usize, num_tiers: usize) -> Result<Self> {
        if num_tiers == 0 {
            return Err(FitError::InvalidInput(
                "number of tiers must be at least 1".into(),
            ));
        }
        if num_assignable > num_nodes {
            return Err(FitError::InvalidInput(format!(
                "{} assignable nodes exceed {} total nodes",
                num_assignable, num_nodes
            )));
        }
        Ok(TierLayout {
            num_nodes,
            num_assignable,
            num_tiers,
        })
    }

    /// The reserved label of every fixed-sink node.
    #[inline]
    pub fn sink_tier(&self) -> usize {
        self.num_tiers + 1
    }

    /// N - M
    #[inline]
    pub fn num_sinks(&self) -> usize {
        self.num_nodes - self.num_assignable
    }

    /// Nodes `0..M` are assignable.
    #[inline]
    pub fn is_assignable(&self, node: usize) -> bool {
        node < self.num_assignable
    }

    /// The count matrix must be N x M in this layout's node ordering.
    pub fn check_counts(&self, counts: &CountMatrix) -> Result<()> {
        if counts.nrows() != self.num_nodes || counts.ncols() != self.num_assignable {
            return Err(FitError::InvalidInput(format!(
                "count matrix is {} x {}, expected {} x {} (destination x source)",
                counts.nrows(),
                counts.ncols(),
                self.num_nodes,
                self.num_assignable
            )));
        }
        Ok(())
    }

    /// Keep the first M source columns of a wider count matrix.
    ///
    /// A square N x N matrix lists every node as a source. Sinks never
    /// send, so their columns are dropped; any weight found there is
    /// reported and discarded.
    pub fn source_columns(&self, counts: &CountMatrix) -> Result<CountMatrix> {
        if counts.nrows() != self.num_nodes || counts.ncols() < self.num_assignable {
            return Err(FitError::InvalidInput(format!(
                "count matrix is {} x {}, expected {} rows and at least {} columns",
                counts.nrows(),
                counts.ncols(),
                self.num_nodes,
                self.num_assignable
            )));
        }

        let dropped = counts.ncols() - self.num_assignable;
        if dropped > 0 {
            let lost: u64 = counts.columns(self.num_assignable, dropped).iter().sum();
            if lost > 0 {
                warn!(
                    "ignoring {} edge weight sent by {} sink columns",
                    lost, dropped
                );
            }
        }

        Ok(counts.columns(0, self.num_assignable).into_owned())
    }

    /// Starting point of every fit: assignable nodes in tier 1, sinks in K + 1.
    pub fn initial_assignment(&self) -> Vec<usize> {
        let sink = self.sink_tier();
        (0..self.num_nodes)
            .map(|v| if self.is_assignable(v) { 1 } else { sink })
            .collect()
    }

    /// Every label in range and every sink pinned.
    pub fn check_assignment(&self, assignment: &[usize]) -> Result<()> {
        if assignment.len() != self.num_nodes {
            return Err(FitError::InvalidInput(format!(
                "assignment has {} labels for {} nodes",
                assignment.len(),
                self.num_nodes
            )));
        }
        let sink = self.sink_tier();
        for (v, &t) in assignment.iter().enumerate() {
            let ok = if self.is_assignable(v) {
                (1..=self.num_tiers).contains(&t)
            } else {
                t == sink
            };
            if !ok {
                return Err(FitError::InvalidInput(format!(
                    "node {} has tier {} (K = {})",
                    v, t, self.num_tiers
                )));
            }
        }
        Ok(())
    }

    /// Split `0..M` into `num_parts` contiguous, non-overlapping ranges
    /// whose sizes differ by at most one.
    pub fn partition(&self, num_parts: usize) -> Vec<Range<usize>> {
        let num_parts = num_parts.max(1);
        let m = self.num_assignable;
        let base = m / num_parts;
        let extra = m % num_parts;

        let mut ranges = Vec::with_capacity(num_parts);
        let mut lb = 0;
        for p in 0..num_parts {
            let len = base + usize::from(p < extra);
            ranges.push(lb..(lb + len));
            lb += len;
        }
        ranges
    }

    /// Number of assignable nodes in each tier `1..=K` (index `t - 1`).
    pub fn tier_sizes(&self, assignment: &[usize]) -> Vec<usize> {
        let mut sizes = vec![0; self.num_tiers];
        for &t in &assignment[..self.num_assignable] {
            if (1..=self.num_tiers).contains(&t) {
                sizes[t - 1] += 1;
            }
        }
        sizes
    }

    /// Number of non-empty tiers among the assignable nodes.
    pub fn distinct_tiers(&self, assignment: &[usize]) -> usize {
        self.tier_sizes(assignment)
            .iter()
            .filter(|&&s| s > 0)
            .count()
    }

    /// Fewer than K tiers in use among the assignable nodes.
    pub fn is_degenerate(&self, assignment: &[usize]) -> bool {
        self.distinct_tiers(assignment) < self.num_tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_assignment_pins_sinks() {
        let layout = TierLayout::new(6, 4, 2).unwrap();
        assert_eq!(layout.initial_assignment(), vec![1, 1, 1, 1, 3, 3]);
        assert!(layout.check_assignment(&layout.initial_assignment()).is_ok());
    }

    #[test]
    fn test_partition_covers_range() {
        let layout = TierLayout::new(12, 10, 3).unwrap();
        let ranges = layout.partition(3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);

        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10);
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn test_partition_more_parts_than_nodes() {
        let layout = TierLayout::new(3, 2, 2).unwrap();
        let ranges = layout.partition(4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges.iter().filter(|r| !r.is_empty()).count(), 2);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(TierLayout::new(3, 4, 2).is_err());
        assert!(TierLayout::new(3, 2, 0).is_err());

        let layout = TierLayout::new(4, 2, 2).unwrap();
        assert!(layout.check_assignment(&[1, 2, 3]).is_err());
        assert!(layout.check_assignment(&[1, 3, 3, 3]).is_err());
        assert!(layout.check_assignment(&[1, 2, 3, 2]).is_err());
        assert!(layout.check_assignment(&[1, 2, 3, 3]).is_ok());
    }

    #[test]
    fn test_source_columns_of_square_matrix() {
        let counts = nalgebra::DMatrix::from_row_slice(
            4,
            4,
            &[
                1u64, 2, 0, 0, //
                3, 4, 0, 0, //
                5, 6, 0, 1, //
                7, 8, 0, 0, //
            ],
        );
        let layout = TierLayout::new(4, 2, 2).unwrap();
        let sources = layout.source_columns(&counts).unwrap();

        assert_eq!(sources.nrows(), 4);
        assert_eq!(sources.ncols(), 2);
        assert_eq!(sources[(3, 1)], 8);
        assert!(layout.check_counts(&sources).is_ok());

        // already N x M
        assert_eq!(layout.source_columns(&sources).unwrap(), sources);

        // too few columns or wrong row count
        let narrow = TierLayout::new(4, 3, 2).unwrap();
        assert!(narrow.source_columns(&sources).is_err());
        let tall = TierLayout::new(5, 2, 2).unwrap();
        assert!(tall.source_columns(&counts).is_err());
    }

    #[test]
    fn test_degenerate() {
        let layout = TierLayout::new(5, 4, 2).unwrap();
        assert!(layout.is_degenerate(&[1, 1, 1, 1, 3]));
        assert!(!layout.is_degenerate(&[1, 2, 1, 1, 3]));
        assert_eq!(layout.tier_sizes(&[1, 2, 1, 1, 3]), vec![3, 1]);
    }
}
