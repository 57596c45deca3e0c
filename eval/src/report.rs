use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::{InstanceResult, load_result};

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub instances: usize,
    pub outcomes: BTreeMap<Outcome, usize>,
    pub avg_duration_secs: Option<f64>,
    pub avg_steps: Option<f64>,
    /// Early-exit and error messages with how often each occurred.
    pub failure_reasons: BTreeMap<String, usize>,
}

impl ReportSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Share of instances that submitted a non-empty diff.
    pub fn resolved_rate(&self) -> Option<f64> {
        (self.instances > 0)
            .then(|| self.count(Outcome::Submitted) as f64 / self.instances as f64)
    }
}

pub fn load_instance_dirs(batch_dir: &Path) -> Result<Vec<PathBuf>> {
    if !batch_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(batch_dir).with_context(|| format!("read {}", batch_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(batch_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut total_duration = 0.0;
    let mut total_steps = 0usize;

    for dir in load_instance_dirs(batch_dir)? {
        let result = match load_result(&dir) {
            Ok(result) => result,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", dir.display()));
                continue;
            }
        };

        summary.instances += 1;
        *summary.outcomes.entry(result.outcome).or_insert(0) += 1;
        total_duration += result.duration_secs;
        total_steps += result.steps;
        if let Some(reason) = failure_reason(&result) {
            *summary.failure_reasons.entry(reason).or_insert(0) += 1;
        }
    }

    if summary.instances > 0 {
        let n = summary.instances as f64;
        summary.avg_duration_secs = Some(total_duration / n);
        summary.avg_steps = Some(total_steps as f64 / n);
    }
    Ok((summary, warnings))
}

fn failure_reason(result: &InstanceResult) -> Option<String> {
    match result.outcome {
        Outcome::EarlyExit => match &result.stop {
            Some(coder::core::types::StopReason::EarlyExit { error }) => Some(error.clone()),
            _ => None,
        },
        Outcome::Error => result.errors.first().cloned(),
        _ => None,
    }
}
