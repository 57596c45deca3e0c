//! Per-instance result persistence.
//!
//! Each instance of a batch gets `<results>/<batch-id>/<instance-id>/` holding
//! the session's event log and a `result.json` summary for later reports.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coder::core::types::StopReason;
use coder::io::event_log::RunPaths;

use crate::outcome::Outcome;

pub const RESULT_FILE: &str = "result.json";

/// Summary of one instance, persisted to `result.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstanceResult {
    pub instance_id: String,
    pub batch_id: String,
    pub model: String,
    pub outcome: Outcome,
    pub stop: Option<StopReason>,
    pub steps: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Bytes of the submitted diff, when there is one.
    pub prediction_bytes: Option<usize>,
    /// Setup or persistence errors; the session's own stop reason is in `stop`.
    pub errors: Vec<String>,
}

impl InstanceResult {
    pub fn timed(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> (String, String, f64) {
        let duration = finished_at - started_at;
        (
            started_at.to_rfc3339(),
            finished_at.to_rfc3339(),
            duration.num_milliseconds() as f64 / 1000.0,
        )
    }
}

pub fn batch_dir(base_dir: &Path, batch_id: &str) -> PathBuf {
    base_dir.join(batch_id)
}

pub fn instance_dir(base_dir: &Path, batch_id: &str, instance_id: &str) -> PathBuf {
    batch_dir(base_dir, batch_id).join(instance_id)
}

/// Event log and meta paths for an instance, laid out like a `coder run`.
pub fn instance_run_paths(dir: &Path) -> RunPaths {
    RunPaths {
        dir: dir.to_path_buf(),
        events_path: dir.join("events.jsonl"),
        meta_path: dir.join("meta.json"),
    }
}

pub fn write_result(dir: &Path, result: &InstanceResult) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create results dir {}", dir.display()))?;
    let path = dir.join(RESULT_FILE);
    let contents = serde_json::to_string_pretty(result).context("serialize result")?;
    fs::write(&path, format!("{contents}\n"))
        .with_context(|| format!("write result {}", path.display()))?;
    Ok(())
}

pub fn load_result(dir: &Path) -> Result<InstanceResult> {
    let path = dir.join(RESULT_FILE);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
