//! Agent configuration, usually `.coder/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::diff_engine::RecoveryBounds;

/// Agent configuration (TOML).
///
/// Missing fields default to values that work for a local run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on model requests per session.
    pub max_steps: usize,

    /// Timeout for one environment command.
    pub command_timeout_secs: u64,

    /// Timeout for one model invocation.
    pub model_timeout_secs: u64,

    /// Tool output beyond this many bytes is cut before the model sees it.
    pub tool_output_limit_bytes: usize,

    /// Lines per editor page.
    pub editor_page_size: usize,

    /// Re-prompts allowed after a failed `edit_file` diff.
    pub max_edit_recoveries: usize,

    pub recovery: RecoveryBounds,
    pub model: ModelConfig,
    pub environment: EnvironmentConfig,
    pub lint: LintConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Name recorded in predictions.
    pub name: String,

    /// Command receiving the conversation as JSON on stdin (e.g. `["llm-bridge"]`).
    pub command: Vec<String>,

    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            command: vec!["coder-model".to_string()],
            max_retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    #[default]
    Local,
    Docker,
}

pub const DEFAULT_CONTAINER_WORKDIR: &str = "/repo";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub kind: EnvironmentKind,
    /// Container id or name, required for `docker`.
    pub container: Option<String>,
    /// Repository path inside the container; `/repo` when unset.
    pub workdir: Option<String>,
}

impl EnvironmentConfig {
    pub fn container_workdir(&self) -> &str {
        self.workdir.as_deref().unwrap_or(DEFAULT_CONTAINER_WORKDIR)
    }
}

/// Optional lint and syntax checks run after an edit. `{path}` is replaced
/// with the edited file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LintConfig {
    pub command: Option<String>,
    pub syntax_command: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            command_timeout_secs: 60,
            model_timeout_secs: 5 * 60,
            tool_output_limit_bytes: 100_000,
            editor_page_size: 200,
            max_edit_recoveries: 3,
            recovery: RecoveryBounds::default(),
            model: ModelConfig::default(),
            environment: EnvironmentConfig::default(),
            lint: LintConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.model_timeout_secs == 0 {
            return Err(anyhow!("model_timeout_secs must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        if self.editor_page_size == 0 {
            return Err(anyhow!("editor_page_size must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.environment.kind == EnvironmentKind::Docker
            && self
                .environment
                .container
                .as_deref()
                .is_none_or(|c| c.trim().is_empty())
        {
            return Err(anyhow!("environment.container is required for docker"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
