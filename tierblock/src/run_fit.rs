use clap::Args;
use indicatif::ProgressBar;
use log::{info, warn};
use std::time::Duration;

use tierblock::io::*;
use tierblock::report::{relabel_by_out_degree, tier_summary};
use tierblock::{extract_block_matrix, FitOptions, TierFit, TierLayout};

#[derive(Args, Debug)]
pub struct FitArgs {
    /// Count matrix (destination x source), `.gz` or plain text
    #[arg(required = true)]
    counts_file: Box<str>,

    /// number of latent tiers (K)
    #[arg(long, short = 'k', default_value_t = 3)]
    tiers: usize,

    /// number of assignable nodes, the first rows and columns; defaults
    /// to the number of columns. Columns past this are sinks and ignored.
    #[arg(long, short = 'm')]
    n_assignable: Option<usize>,

    /// number of search workers; defaults to #cpus - 1
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// failed proposals before an exhaustive sweep
    #[arg(long, default_value_t = 500)]
    sweep_interval: usize,

    /// stop after this many seconds
    #[arg(long)]
    max_seconds: Option<f64>,

    /// stop each worker after this many proposals
    #[arg(long)]
    max_proposals: Option<usize>,

    /// always evaluate the full objective
    #[arg(long, default_value_t = false)]
    no_early_abort: bool,

    /// keep the tier labels found by the search
    #[arg(long, default_value_t = false)]
    keep_labels: bool,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let counts = read_count_matrix(&args.counts_file)?;
    let num_assignable = args.n_assignable.unwrap_or(counts.ncols());
    let k = args.tiers;

    // a square matrix lists sinks as sources too; keep the assignable columns
    let counts = TierLayout::new(counts.nrows(), num_assignable, k)?.source_columns(&counts)?;

    info!(
        "read {} nodes x {} sources from {}",
        counts.nrows(),
        counts.ncols(),
        args.counts_file
    );

    let mut options = FitOptions::default()
        .with_seed(args.seed)
        .with_sweep_interval(args.sweep_interval)
        .with_max_proposals(args.max_proposals)
        .with_max_duration(args.max_seconds.map(Duration::from_secs_f64));
    if let Some(workers) = args.workers {
        options = options.with_workers(workers);
    }
    options.early_abort = !args.no_early_abort;

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("fitting {} tiers", k));
    pb.enable_steady_tick(Duration::from_millis(100));

    let fitted = TierFit::new(options).fit(&counts, num_assignable, k);
    pb.finish_and_clear();
    let result = fitted?;

    if !result.failed_workers().is_empty() {
        warn!(
            "{} of {} workers failed",
            result.failed_workers().len(),
            result.outcomes.len()
        );
    } else if !result.converged() {
        warn!("search stopped before every worker converged");
    }

    let assignment = if args.keep_labels {
        result.assignment.clone()
    } else {
        relabel_by_out_degree(&result.assignment, &counts, k).0
    };

    let out = &args.out;
    write_assignment(
        &assignment,
        num_assignable,
        &format!("{}.assignment.tsv", out),
    )?;
    write_matrix_tsv(
        &extract_block_matrix(&assignment, &counts, k)?,
        &format!("{}.blocks.tsv", out),
    )?;
    write_types(
        &tier_summary(&assignment, &counts, k),
        &format!("{}.tiers.tsv", out),
    )?;
    write_trace(&result.history, &format!("{}.trace.tsv", out))?;

    info!("wrote {}.{{assignment,blocks,tiers,trace}}.tsv", out);
    Ok(())
}
