//! Task instance files.
//!
//! A tasks file is JSONL, one instance per line:
//!
//! ```json
//! {"instance_id": "demo-1", "problem_statement": "Fix the parser", "repo": "repos/demo"}
//! ```
//!
//! Relative `repo` paths resolve against the tasks file's directory. Setting
//! `container` runs the instance inside that Docker container instead of on
//! the host.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TaskInstance {
    /// Unique identifier (slug format: `[A-Za-z0-9_.-]+`).
    pub instance_id: String,
    /// Task text handed to the session.
    pub problem_statement: String,
    /// Repository checkout the session works in.
    pub repo: PathBuf,
    #[serde(default)]
    pub container: Option<String>,
    /// Workdir inside the container.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Per-instance override of `max_steps`.
    #[serde(default)]
    pub max_steps: Option<usize>,
}

impl TaskInstance {
    fn validate(&self) -> Result<()> {
        if !is_valid_id(&self.instance_id) {
            bail!("invalid instance_id '{}'", self.instance_id);
        }
        if self.problem_statement.trim().is_empty() {
            bail!("instance {} has an empty problem_statement", self.instance_id);
        }
        if let Some(container) = &self.container
            && container.trim().is_empty()
        {
            bail!("instance {} has an empty container", self.instance_id);
        }
        Ok(())
    }
}

/// Load and validate every instance in a tasks file.
pub fn load_tasks(path: &Path) -> Result<Vec<TaskInstance>> {
    let file = File::open(path).with_context(|| format!("open tasks {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut tasks = Vec::new();
    let mut seen = BTreeSet::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut task: TaskInstance = serde_json::from_str(&line)
            .with_context(|| format!("parse {} line {}", path.display(), idx + 1))?;
        task.validate()
            .with_context(|| format!("{} line {}", path.display(), idx + 1))?;
        if !seen.insert(task.instance_id.clone()) {
            bail!("duplicate instance_id '{}'", task.instance_id);
        }
        if task.repo.is_relative() {
            task.repo = base.join(&task.repo);
        }
        tasks.push(task);
    }
    Ok(tasks)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !id.starts_with('.')
}
