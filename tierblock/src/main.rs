mod run_fit;

use clap::{Parser, Subcommand};
use log::info;
use run_fit::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "TIERBLOCK",
    long_about = "Tiered stochastic block model for directed placement networks\n\
		  Input is a dense destination x source count matrix, one row per line,\n\
		  either plain or gzipped. Rows beyond the number of columns are sinks."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit tier assignments by parallel hill climbing",
        long_about = "Assign every source node to one of K tiers in three stages: \n\
		      (1) Read the count matrix and pin sink rows to tier K+1\n\
		      (2) Run parallel random-move search until no single move helps\n\
		      (3) Relabel tiers by out-degree and write the block matrix.\n"
    )]
    Fit(FitArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args)?;
        }
    }

    info!("Done");
    Ok(())
}
