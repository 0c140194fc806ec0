use nalgebra::DMatrix;
use std::io::Write;
use tempfile::tempdir;
use tierblock::io::*;
use tierblock::{AppliedImprovement, CountMatrix};

fn read_lines(path: &str) -> anyhow::Result<Vec<String>> {
    let buf = open_buf_reader(path)?;
    Ok(std::io::BufRead::lines(buf).collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn count_matrix_round_trip_gz() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("counts.tsv.gz");
    let file = file.to_str().unwrap();

    let xx: CountMatrix = DMatrix::from_fn(7, 5, |i, j| (i * 5 + j) as u64 % 4);
    write_matrix_tsv(&xx, file)?;

    let yy = read_count_matrix(file)?;
    assert_eq!(xx, yy);
    Ok(())
}

#[test]
fn count_matrix_skips_comments_and_mixed_separators() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("counts.txt");
    {
        let mut f = std::fs::File::create(&path)?;
        writeln!(f, "# destination x source")?;
        writeln!(f, "1\t2,3")?;
        writeln!(f)?;
        writeln!(f, "% sinks below")?;
        writeln!(f, "4 5  6")?;
    }

    let yy = read_count_matrix(path.to_str().unwrap())?;
    assert_eq!(yy.nrows(), 2);
    assert_eq!(yy.ncols(), 3);
    assert_eq!(yy[(0, 2)], 3);
    assert_eq!(yy[(1, 0)], 4);
    Ok(())
}

#[test]
fn count_matrix_rejects_bad_input() -> anyhow::Result<()> {
    let dir = tempdir()?;

    let ragged = dir.path().join("ragged.txt");
    std::fs::write(&ragged, "1 2 3\n4 5\n")?;
    assert!(read_count_matrix(ragged.to_str().unwrap()).is_err());

    let negative = dir.path().join("negative.txt");
    std::fs::write(&negative, "1 -2\n")?;
    assert!(read_count_matrix(negative.to_str().unwrap()).is_err());

    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, "# nothing\n")?;
    assert!(read_count_matrix(empty.to_str().unwrap()).is_err());
    Ok(())
}

#[test]
fn assignment_and_trace_tables() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let assign_file = dir.path().join("out.assignment.tsv");
    let assign_file = assign_file.to_str().unwrap();
    let trace_file = dir.path().join("out.trace.tsv.gz");
    let trace_file = trace_file.to_str().unwrap();

    write_assignment(&[2, 1, 3], 2, assign_file)?;
    assert_eq!(
        read_lines(assign_file)?,
        vec!["0\t2\tassignable", "1\t1\tassignable", "2\t3\tsink"]
    );

    let history = vec![
        AppliedImprovement {
            worker: 0,
            node: 1,
            tier: 2,
            objective: -1.5,
            generation: 1,
        },
        AppliedImprovement {
            worker: 1,
            node: 0,
            tier: 1,
            objective: -2.25,
            generation: 2,
        },
    ];
    write_trace(&history, trace_file)?;

    let lines = read_lines(trace_file)?;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "generation\tworker\tnode\ttier\tobjective");
    assert_eq!(lines[2], "2\t1\t0\t1\t-2.25");
    Ok(())
}
