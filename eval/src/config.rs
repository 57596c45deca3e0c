//! Agent configuration merging.
//!
//! Applies per-instance overrides to the batch's base agent configuration.

use anyhow::Result;
use coder::io::config::{AgentConfig, EnvironmentKind};

use crate::task::TaskInstance;

/// Apply instance overrides to the base agent config.
///
/// An instance with a container always runs in Docker; one without runs
/// locally in its repo checkout.
pub fn apply_task_config(mut base: AgentConfig, task: &TaskInstance) -> Result<AgentConfig> {
    if let Some(max_steps) = task.max_steps {
        base.max_steps = max_steps;
    }
    match &task.container {
        Some(container) => {
            base.environment.kind = EnvironmentKind::Docker;
            base.environment.container = Some(container.clone());
            if let Some(workdir) = &task.workdir {
                base.environment.workdir = Some(workdir.clone());
            }
        }
        None => {
            base.environment.kind = EnvironmentKind::Local;
            base.environment.container = None;
        }
    }
    base.validate()?;
    Ok(base)
}
