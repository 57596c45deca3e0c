//! The fallback shell tool and trivial built-ins.

use crate::core::command::ToolCall;
use crate::io::environment::ExecOutput;
use crate::tools::{Tool, ToolContext, ToolError};

/// Forwards the raw command line to the environment.
///
/// Receives every command that does not name a registered tool.
pub struct Shell;

impl Tool for Shell {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn signature(&self) -> &'static str {
        "<any shell command>"
    }

    fn summary(&self) -> &'static str {
        "run a non-interactive shell command in the working directory"
    }

    fn details(&self) -> &'static str {
        "Each command runs in a fresh shell: `cd` and exported variables do not persist.\n\
         Interactive programs (editors, pagers, REPLs) are not supported."
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        // `shell <cmd>` and a bare `<cmd>` both run `<cmd>`.
        let command = match call.raw.strip_prefix("shell") {
            Some(rest) if call.name == "shell" => rest.trim(),
            _ => call.raw.as_str(),
        };
        if command.is_empty() {
            return Err(ToolError::Usage(self.signature().to_string()));
        }
        let out = ctx.env.execute(command, ctx.settings.command_timeout)?;
        let success = out.success();
        let ExecOutput { output, exit_code } = out;
        let mut text = output;
        if text.trim().is_empty() {
            text = "(no output)".to_string();
        }
        if !success {
            text.push_str(&format!("\n[exit code {exit_code}]"));
        }
        Ok(text)
    }
}

pub struct GetCwd;

impl Tool for GetCwd {
    fn name(&self) -> &'static str {
        "get_cwd"
    }

    fn signature(&self) -> &'static str {
        "get_cwd"
    }

    fn summary(&self) -> &'static str {
        "print the working directory"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, _call: &ToolCall) -> Result<String, ToolError> {
        Ok(ctx.env.workdir().to_string())
    }
}

pub struct NoOp;

impl Tool for NoOp {
    fn name(&self) -> &'static str {
        "no_op"
    }

    fn signature(&self) -> &'static str {
        "no_op"
    }

    fn summary(&self) -> &'static str {
        "do nothing; useful to just think"
    }

    fn function(&mut self, _ctx: &mut ToolContext<'_>, _call: &ToolCall) -> Result<String, ToolError> {
        Ok("No action taken.".to_string())
    }
}
