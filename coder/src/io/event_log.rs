//! Persisted event logs under `.coder/runs/<run-id>/`.
//!
//! The JSONL log is a product artifact: it is written as events are appended,
//! independent of `RUST_LOG`, and is the input to `coder replay`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::event::Event;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub meta_path: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(".coder").join("runs").join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Facts about a run needed to re-check its log later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMeta {
    pub run_id: String,
    pub model: String,
    pub max_steps: usize,
    pub task: String,
}

/// Pick an unused `run-<unix-secs>[-N]` id under `root`.
pub fn generate_run_id(root: &Path) -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    let base = format!("run-{secs}");
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        if !RunPaths::new(root, &id).dir.exists() {
            return Ok(id);
        }
    }
    Err(anyhow!("unable to generate unique run id from base '{base}'"))
}

pub fn write_meta(paths: &RunPaths, meta: &RunMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create run dir {}", paths.dir.display()))?;
    let mut buf = serde_json::to_string_pretty(meta)?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))
}

pub fn load_meta(path: &Path) -> Result<RunMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Appends events to a JSONL file, one line per event, flushed immediately.
#[derive(Debug)]
pub struct EventSink {
    path: PathBuf,
    file: File,
}

impl EventSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create event log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("append to {}", self.path.display()))
    }
}

pub fn load_event_log(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .with_context(|| format!("parse {} line {}", path.display(), idx + 1))?;
        events.push(event);
    }
    debug!(path = %path.display(), events = events.len(), "loaded event log");
    Ok(events)
}
