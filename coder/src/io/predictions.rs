//! Predictions file: one JSON line per completed task.
//!
//! Several sessions may finish at once in a batch run, so the writer is shared
//! behind a mutex and only ever appends whole lines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub model: String,
    pub instance_id: String,
    /// Staged diff of a submitted task; `None` when the task did not submit.
    pub prediction: Option<String>,
}

#[derive(Debug)]
pub struct PredictionWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl PredictionWriter {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create predictions dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open predictions {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, prediction: &Prediction) -> Result<()> {
        let mut line = serde_json::to_string(prediction).context("serialize prediction")?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("predictions writer poisoned"))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("append to {}", self.path.display()))?;
        debug!(instance_id = %prediction.instance_id, "prediction written");
        Ok(())
    }
}

pub fn load_predictions(path: &Path) -> Result<Vec<Prediction>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(
            serde_json::from_str(&line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))?,
        );
    }
    Ok(out)
}
