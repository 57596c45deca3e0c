//! CLI command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info};

use coder::io::config::{AgentConfig, load_config};
use coder::io::predictions::PredictionWriter;

use crate::report::aggregate;
use crate::results::batch_dir;
use crate::run::{BatchOptions, ConfiguredBackends, run_batch};
use crate::task::load_tasks;

pub struct RunArgs<'a> {
    pub tasks: &'a Path,
    pub predictions: &'a Path,
    pub workers: usize,
    pub config: Option<&'a Path>,
    pub results_dir: &'a Path,
}

/// Run every instance in a tasks file and append their predictions.
pub fn run_tasks(args: &RunArgs<'_>) -> Result<()> {
    let tasks = load_tasks(args.tasks).context("load tasks")?;
    if tasks.is_empty() {
        bail!("no task instances in {}", args.tasks.display());
    }
    let cfg = match args.config {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };
    cfg.validate()?;
    debug!(tasks = tasks.len(), "tasks loaded");

    let batch_id = unique_batch_id(args.results_dir);
    let writer = PredictionWriter::open(args.predictions)?;
    let opts = BatchOptions {
        batch_id: batch_id.clone(),
        results_dir: args.results_dir.to_path_buf(),
        workers: args.workers,
    };
    info!(batch_id = %batch_id, workers = args.workers, "starting batch");

    let runs = run_batch(&tasks, &cfg, &writer, &ConfiguredBackends, &opts);
    for run in &runs {
        println!(
            "run: instance={} outcome={:?} results={}",
            run.instance_id,
            run.outcome,
            run.results_dir.display()
        );
    }
    println!(
        "batch: id={} instances={} predictions={}",
        batch_id,
        runs.len(),
        args.predictions.display()
    );
    Ok(())
}

/// Show aggregated results for a batch.
pub fn report_batch(results_dir: &Path, batch_id: &str) -> Result<()> {
    let dir = batch_dir(results_dir, batch_id);
    if !dir.exists() {
        bail!("batch {} not found at {}", batch_id, dir.display());
    }
    let (summary, warnings) = aggregate(&dir)?;
    println!("report: batch={} instances={}", batch_id, summary.instances);
    for (outcome, count) in &summary.outcomes {
        println!("report: {outcome:?}={count}");
    }
    if let Some(rate) = summary.resolved_rate() {
        println!("report: submitted_rate={:.2}", rate);
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    if let Some(avg) = summary.avg_steps {
        println!("report: avg_steps={:.1}", avg);
    }
    for (reason, count) in summary.failure_reasons {
        println!("report: failure {count}x {reason}");
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove a batch's results.
pub fn clean_batch(results_dir: &Path, batch_id: &str) -> Result<()> {
    let dir = batch_dir(results_dir, batch_id);
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    println!("clean: batch={} results={}", batch_id, dir.display());
    Ok(())
}

fn unique_batch_id(results_dir: &Path) -> String {
    let base = format!("batch-{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let mut id = base.clone();
    let mut suffix = 2u32;
    while batch_dir(results_dir, &id).exists() {
        id = format!("{base}-{suffix}");
        suffix += 1;
    }
    id
}
