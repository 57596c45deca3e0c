mod cli;
mod config;
mod outcome;
mod report;
mod results;
mod run;
mod task;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

const DEFAULT_RESULTS_DIR: &str = "eval/results";

#[derive(Parser)]
#[command(name = "eval", version, about = "Batch driver for coder sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every instance in a tasks file.
    Run {
        #[arg(long)]
        tasks: PathBuf,
        /// Predictions JSONL, appended to.
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Agent config shared by all instances.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results: PathBuf,
    },
    Report {
        batch_id: String,
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results: PathBuf,
    },
    Clean {
        batch_id: String,
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results: PathBuf,
    },
}

fn main() -> Result<()> {
    coder::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            tasks,
            predictions,
            workers,
            config,
            results,
        } => cli::run_tasks(&cli::RunArgs {
            tasks: &tasks,
            predictions: &predictions,
            workers,
            config: config.as_deref(),
            results_dir: &results,
        }),
        Command::Report { batch_id, results } => cli::report_batch(&results, &batch_id),
        Command::Clean { batch_id, results } => cli::clean_batch(&results, &batch_id),
    }
}
