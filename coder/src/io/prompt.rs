//! Prompt rendering from embedded templates.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TURN_TEMPLATE: &str = include_str!("prompts/turn.md");
const EDIT_RECOVERY_TEMPLATE: &str = include_str!("prompts/edit_recovery.md");

/// One open editor buffer as shown to the model.
#[derive(Debug, Clone, Serialize)]
pub struct BufferView {
    pub path: String,
    /// 1-based page number.
    pub page: usize,
    pub pages: usize,
    /// Page content with line numbers.
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct TurnInputs<'a> {
    pub task: &'a str,
    pub buffers: Vec<BufferView>,
    pub observation: &'a str,
}

#[derive(Debug, Clone)]
pub struct RecoveryInputs<'a> {
    pub path: &'a str,
    pub error: &'a str,
    pub original_diff: &'a str,
    pub latest_diff: &'a str,
    /// Numbered excerpt of the file around the failed hunk.
    pub source: &'a str,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("system template")?;
        env.add_template("turn", TURN_TEMPLATE)
            .context("turn template")?;
        env.add_template("edit_recovery", EDIT_RECOVERY_TEMPLATE)
            .context("edit recovery template")?;
        Ok(Self { env })
    }

    /// System prompt listing every command's documentation.
    pub fn render_system(&self, workdir: &str, tools: &[String]) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            workdir => workdir,
            tools => tools,
        })?;
        debug!(bytes = rendered.len(), tools = tools.len(), "rendered system prompt");
        Ok(rendered)
    }

    pub fn render_turn(&self, input: &TurnInputs<'_>) -> Result<String> {
        let template = self.env.get_template("turn")?;
        let rendered = template.render(context! {
            task => input.task.trim(),
            buffers => input.buffers,
            observation => input.observation.trim_end(),
        })?;
        Ok(rendered)
    }

    pub fn render_edit_recovery(&self, input: &RecoveryInputs<'_>) -> Result<String> {
        let template = self.env.get_template("edit_recovery")?;
        let rendered = template.render(context! {
            path => input.path,
            error => input.error.trim(),
            original_diff => input.original_diff.trim(),
            latest_diff => input.latest_diff.trim(),
            source => input.source.trim_end(),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_tools() {
        let engine = PromptEngine::new().expect("engine");
        let tools = vec![
            "open_file <path>: open a file".to_string(),
            "submit: finish".to_string(),
        ];
        let prompt = engine.render_system("/repo", &tools).expect("render");
        assert!(prompt.contains("/repo"));
        assert!(prompt.contains("open_file <path>: open a file"));
        assert!(prompt.contains("<THOUGHT>"));
    }

    #[test]
    fn turn_sections_are_ordered() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine
            .render_turn(&TurnInputs {
                task: "fix the parser",
                buffers: vec![BufferView {
                    path: "a.py".to_string(),
                    page: 1,
                    pages: 2,
                    body: "1: x = 1".to_string(),
                }],
                observation: "ok",
            })
            .expect("render");
        let task = prompt.find("<task>").expect("task");
        let editor = prompt.find("[File: a.py (page 1 of 2)]").expect("editor");
        let observation = prompt.find("<observation>").expect("observation");
        assert!(task < editor && editor < observation);
    }

    #[test]
    fn empty_observation_is_marked() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine
            .render_turn(&TurnInputs {
                task: "t",
                buffers: Vec::new(),
                observation: "",
            })
            .expect("render");
        assert!(prompt.contains("(no output)"));
        assert!(!prompt.contains("<editor>"));
    }

    #[test]
    fn recovery_prompt_skips_identical_latest_diff() {
        let engine = PromptEngine::new().expect("engine");
        let prompt = engine
            .render_edit_recovery(&RecoveryInputs {
                path: "a.py",
                error: "context not found",
                original_diff: "--- a.py",
                latest_diff: "--- a.py",
                source: "1: x",
            })
            .expect("render");
        assert!(prompt.contains("<original_diff>"));
        assert!(!prompt.contains("<latest_diff>"));
        assert!(prompt.contains("context not found"));
    }
}
