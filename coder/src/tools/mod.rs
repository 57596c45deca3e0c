//! Tools the model can call, and the registry that dispatches to them.
//!
//! Tools are registered explicitly when a session is built. Each call gets a
//! [`ToolContext`] borrowing the session's environment, model, and editor, so
//! tools hold no handles of their own beyond lazily built private state.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info_span, warn};

use crate::core::command::ToolCall;
use crate::core::diff_engine::RecoveryBounds;
use crate::core::transition::{ASK_USER, EXIT, SET_TASK, STOP, SUBMIT};
use crate::io::config::{AgentConfig, LintConfig};
use crate::io::environment::{EnvError, Environment};
use crate::io::model::{LanguageModel, RetryPolicy};
use crate::io::prompt::PromptEngine;

pub mod edit;
pub mod editor;
pub mod file;
pub mod search;
pub mod shell;

use editor::{EditorError, EditorStore};

/// Name of the tool that receives unregistered commands.
pub const DEFAULT_TOOL: &str = "shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    /// One line: signature and summary.
    Docstring,
    /// Multi-line manual page.
    Manpage,
}

/// Knobs tools read from the agent configuration.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
    pub max_edit_recoveries: usize,
    pub recovery: RecoveryBounds,
    pub lint: LintConfig,
    pub model_retry: RetryPolicy,
}

impl ToolSettings {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            command_timeout: cfg.command_timeout(),
            output_limit_bytes: cfg.tool_output_limit_bytes,
            max_edit_recoveries: cfg.max_edit_recoveries,
            recovery: cfg.recovery,
            lint: cfg.lint.clone(),
            model_retry: RetryPolicy::from_config(&cfg.model),
        }
    }
}

pub struct ToolContext<'a> {
    pub env: &'a mut dyn Environment,
    pub model: &'a mut dyn LanguageModel,
    pub editor: &'a mut EditorStore,
    pub prompts: &'a PromptEngine,
    pub settings: &'a ToolSettings,
}

#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrong arguments; the message says how to call the tool.
    #[error("usage: {0}")]
    Usage(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Env(#[from] EnvError),
}

pub trait Tool {
    fn name(&self) -> &'static str;

    /// Call syntax, e.g. `open_file <path>`.
    fn signature(&self) -> &'static str;

    fn summary(&self) -> &'static str;

    /// Extra prose for the manpage form.
    fn details(&self) -> &'static str {
        ""
    }

    fn documentation(&self, format: DocFormat) -> String {
        match format {
            DocFormat::Docstring => format!("{}: {}", self.signature(), self.summary()),
            DocFormat::Manpage => {
                let mut page = format!(
                    "NAME\n    {} - {}\n\nSYNOPSIS\n    {}\n",
                    self.name(),
                    self.summary(),
                    self.signature()
                );
                if !self.details().is_empty() {
                    page.push_str("\nDESCRIPTION\n");
                    for line in self.details().lines() {
                        page.push_str(&format!("    {line}\n"));
                    }
                }
                page
            }
        }
    }

    fn setup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        Ok(())
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError>;
}

/// Runs around every tool call.
pub trait ToolHook {
    fn before(&mut self, _call: &ToolCall) {}

    fn after(&mut self, _call: &ToolCall, output: String) -> String {
        output
    }
}

/// Cuts tool output to a byte limit on a char boundary.
#[derive(Debug, Clone, Copy)]
pub struct TruncateOutput {
    pub limit_bytes: usize,
}

impl ToolHook for TruncateOutput {
    fn after(&mut self, call: &ToolCall, output: String) -> String {
        if output.len() <= self.limit_bytes {
            return output;
        }
        let mut cut = self.limit_bytes;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        debug!(tool = %call.name, bytes = output.len(), "truncating tool output");
        format!(
            "{}\n[output truncated {} bytes]",
            &output[..cut],
            output.len() - cut
        )
    }
}

/// Debug-logs every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCalls;

impl ToolHook for TraceCalls {
    fn before(&mut self, call: &ToolCall) {
        debug!(tool = %call.name, args = call.args.len(), "tool call");
    }
}

const CONTROL_DOCS: [(&str, &str); 5] = [
    (SUBMIT, "submit: finish the task and submit the current changes"),
    (EXIT, "exit: give up on the task without submitting"),
    (STOP, "stop: same as exit"),
    (SET_TASK, "set_task <text>: replace the current task"),
    (ASK_USER, "ask_user <question>: ask the human operator a question"),
];

pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
    hooks: Vec<Box<dyn ToolHook>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            hooks: Vec::new(),
        }
    }

    /// Every built-in tool plus tracing and output truncation hooks.
    pub fn with_defaults(settings: &ToolSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(file::OpenFile));
        registry.register(Box::new(file::CreateFile));
        registry.register(Box::new(file::DeleteFile));
        registry.register(Box::new(file::CloseFile));
        registry.register(Box::new(file::ScrollUp));
        registry.register(Box::new(file::ScrollDown));
        registry.register(Box::new(file::ScrollToLine));
        registry.register(Box::new(edit::EditFile));
        registry.register(Box::new(search::FindFile::default()));
        registry.register(Box::new(search::SearchDir));
        registry.register(Box::new(search::SearchFile));
        registry.register(Box::new(shell::GetCwd));
        registry.register(Box::new(shell::NoOp));
        registry.register(Box::new(shell::Shell));
        registry.add_hook(Box::new(TraceCalls));
        registry.add_hook(Box::new(TruncateOutput {
            limit_bytes: settings.output_limit_bytes,
        }));
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn add_hook(&mut self, hook: Box<dyn ToolHook>) {
        self.hooks.push(hook);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    /// Documentation for every tool and control command, for the system prompt.
    pub fn documentation(&self, format: DocFormat) -> Vec<String> {
        let mut docs: Vec<String> = self
            .tools
            .values()
            .map(|tool| tool.documentation(format))
            .collect();
        docs.extend(CONTROL_DOCS.iter().map(|(_, doc)| (*doc).to_string()));
        docs
    }

    pub fn setup_all(&mut self, ctx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        for tool in self.tools.values_mut() {
            tool.setup(ctx)?;
        }
        Ok(())
    }

    /// Clean up every tool; failures are logged, not propagated.
    pub fn cleanup_all(&mut self, ctx: &mut ToolContext<'_>) {
        for (name, tool) in &mut self.tools {
            if let Err(err) = tool.cleanup(ctx) {
                warn!(tool = name, err = %err, "tool cleanup failed");
            }
        }
    }

    /// Run one call through hooks and its tool.
    ///
    /// Tool failures become output text for the model. Only environment
    /// timeouts and crashes are returned as errors, since the session has to
    /// handle those itself.
    pub fn dispatch(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, EnvError> {
        let name = if self.tools.contains_key(call.name.as_str()) {
            call.name.as_str()
        } else {
            DEFAULT_TOOL
        };
        let _span = info_span!("tool", tool = name).entered();

        for hook in &mut self.hooks {
            hook.before(call);
        }
        let result = match self.tools.get_mut(name) {
            Some(tool) => tool.function(ctx, call),
            None => Err(ToolError::Failed(format!("unknown command `{}`", call.name))),
        };
        let mut output = match result {
            Ok(output) => output,
            Err(ToolError::Env(err @ (EnvError::Timeout(_) | EnvError::Crashed(_)))) => {
                return Err(err);
            }
            Err(err) => {
                debug!(err = %err, "tool failed");
                format!("Error: {err}")
            }
        };
        for hook in &mut self.hooks {
            output = hook.after(call, output);
        }
        Ok(output)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Require exactly `count` arguments.
pub(crate) fn expect_args<'c>(
    call: &'c ToolCall,
    count: usize,
    signature: &str,
) -> Result<Vec<&'c str>, ToolError> {
    if call.args.len() != count {
        return Err(ToolError::Usage(signature.to_string()));
    }
    Ok(call.args.iter().map(String::as_str).collect())
}
