//! Human-readable post-processing of a fitted assignment.

use crate::block_stats::CountMatrix;

/// Renumber tiers so that tier 1 sends the most edge weight.
///
/// Tiers are ranked by aggregate out-degree, i.e. the total weight in the
/// count-matrix columns of their source nodes; ties keep the original
/// order. Sinks stay at K + 1. Returns the relabelled assignment and the
/// map `old tier -> new tier` (index `old - 1`).
pub fn relabel_by_out_degree(
    assignment: &[usize],
    counts: &CountMatrix,
    k: usize,
) -> (Vec<usize>, Vec<usize>) {
    let out_degree = tier_out_degree(assignment, counts, k);

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| out_degree[b].cmp(&out_degree[a]).then(a.cmp(&b)));

    let mut new_label = vec![0; k];
    for (rank, &old) in order.iter().enumerate() {
        new_label[old] = rank + 1;
    }

    let relabeled = assignment
        .iter()
        .map(|&t| if (1..=k).contains(&t) { new_label[t - 1] } else { t })
        .collect();

    (relabeled, new_label)
}

/// Total weight sent by each tier's source nodes (index `tier - 1`).
pub fn tier_out_degree(assignment: &[usize], counts: &CountMatrix, k: usize) -> Vec<u64> {
    let mut out = vec![0u64; k];
    for (s, column) in counts.column_iter().enumerate() {
        out[assignment[s] - 1] += column.iter().sum::<u64>();
    }
    out
}

/// One line per tier: `tier, size, out-degree`.
pub fn tier_summary(assignment: &[usize], counts: &CountMatrix, k: usize) -> Vec<Box<str>> {
    let out_degree = tier_out_degree(assignment, counts, k);
    let mut sizes = vec![0usize; k];
    for &t in &assignment[..counts.ncols()] {
        sizes[t - 1] += 1;
    }
    (0..k)
        .map(|c| format!("{}\t{}\t{}", c + 1, sizes[c], out_degree[c]).into_boxed_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_stats::extract_block_matrix;
    use nalgebra::DMatrix;

    fn counts() -> CountMatrix {
        // node 0 sends little, node 2 sends a lot
        DMatrix::from_row_slice(4, 3, &[1u64, 0, 5, 0, 1, 5, 1, 2, 5, 0, 0, 5])
    }

    #[test]
    fn test_relabel_orders_by_out_degree() {
        let labels = vec![1, 2, 3, 4];
        let (relabeled, map) = relabel_by_out_degree(&labels, &counts(), 3);

        assert_eq!(map, vec![3, 2, 1]);
        assert_eq!(relabeled, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_relabel_preserves_block_totals() {
        let c = counts();
        let labels = vec![2, 2, 1, 3];
        let (relabeled, _) = relabel_by_out_degree(&labels, &c, 2);

        assert_eq!(relabeled, vec![2, 2, 1, 3]);
        let before = extract_block_matrix(&labels, &c, 2).unwrap();
        let after = extract_block_matrix(&relabeled, &c, 2).unwrap();
        assert_eq!(before.sum(), after.sum());
    }

    #[test]
    fn test_tier_summary() {
        let lines = tier_summary(&[1, 1, 2, 3], &counts(), 2);
        assert_eq!(lines.len(), 2);
        assert_eq!(&*lines[0], "1\t2\t5");
        assert_eq!(&*lines[1], "2\t1\t20");
    }
}
