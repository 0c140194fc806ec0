//! Plain-text matrix and table I/O, gzipped or not.

use crate::block_stats::CountMatrix;
use crate::coordinator::AppliedImprovement;
use flate2::read::GzDecoder;
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not; `stdout` writes to stdout
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Write every line into the output_file
///
/// * `lines` - anything displayable, one per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_types<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(anyhow::anyhow!("unexpected error: {}", e));
        }
    }
    buf.flush()?;
    Ok(())
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%')
}

///
/// Read a dense non-negative integer matrix, one row per line.
///
/// Fields may be separated by tabs, commas or spaces. Blank lines and
/// lines starting with `#` or `%` are skipped.
///
/// * `input_file` - destination x source counts, gzipped or not
///
pub fn read_count_matrix(input_file: &str) -> anyhow::Result<CountMatrix> {
    let buf = open_buf_reader(input_file)?;

    let mut values: Vec<u64> = vec![];
    let mut nrows = 0;
    let mut ncols: Option<usize> = None;

    for (lineno, line) in buf.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        let before = values.len();
        for word in line
            .split(|c: char| c == '\t' || c == ',' || c == ' ')
            .filter(|w| !w.is_empty())
        {
            let x: u64 = word.parse().map_err(|_| {
                anyhow::anyhow!(
                    "{}:{}: `{}` is not a non-negative integer",
                    input_file,
                    lineno + 1,
                    word
                )
            })?;
            values.push(x);
        }

        let width = values.len() - before;
        match ncols {
            None => ncols = Some(width),
            Some(n) if n != width => {
                return Err(anyhow::anyhow!(
                    "{}:{}: expected {} columns, found {}",
                    input_file,
                    lineno + 1,
                    n,
                    width
                ));
            }
            _ => {}
        }
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| anyhow::anyhow!("{}: no data", input_file))?;
    Ok(DMatrix::from_row_slice(nrows, ncols, &values))
}

/// Write a matrix as tab-separated rows.
pub fn write_matrix_tsv<T>(matrix: &DMatrix<T>, output_file: &str) -> anyhow::Result<()>
where
    T: nalgebra::Scalar + std::fmt::Display,
{
    let lines: Vec<Box<str>> = matrix
        .row_iter()
        .map(|row| {
            row.iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join("\t")
                .into_boxed_str()
        })
        .collect();
    write_types(&lines, output_file)
}

/// Write `node <tab> tier <tab> kind` for every node.
pub fn write_assignment(
    assignment: &[usize],
    num_assignable: usize,
    output_file: &str,
) -> anyhow::Result<()> {
    let lines: Vec<Box<str>> = assignment
        .iter()
        .enumerate()
        .map(|(v, &t)| {
            let kind = if v < num_assignable { "assignable" } else { "sink" };
            format!("{}\t{}\t{}", v, t, kind).into_boxed_str()
        })
        .collect();
    write_types(&lines, output_file)
}

/// Write the applied improvements, one per line, in application order.
pub fn write_trace(history: &[AppliedImprovement], output_file: &str) -> anyhow::Result<()> {
    let mut lines: Vec<Box<str>> = vec!["generation\tworker\tnode\ttier\tobjective".into()];
    lines.extend(history.iter().map(|h| {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            h.generation, h.worker, h.node, h.tier, h.objective
        )
        .into_boxed_str()
    }));
    write_types(&lines, output_file)
}
