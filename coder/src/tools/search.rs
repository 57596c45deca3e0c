//! Finding files and searching text.

use tracing::debug;

use crate::core::command::ToolCall;
use crate::io::environment::shell_quote;
use crate::tools::editor::normalize_path;
use crate::tools::{Tool, ToolContext, ToolError, expect_args};

/// Results beyond this are summarized instead of listed.
const MAX_RESULTS: usize = 100;

/// Finds files by name using an index built on first use.
#[derive(Debug, Default)]
pub struct FindFile {
    index: Option<Vec<String>>,
}

impl FindFile {
    fn index(&mut self, ctx: &mut ToolContext<'_>) -> Result<&[String], ToolError> {
        if self.index.is_none() {
            let out = ctx.env.execute(
                "find . -type f -not -path '*/.git/*'",
                ctx.settings.command_timeout,
            )?;
            if !out.success() {
                return Err(ToolError::Failed(format!("cannot list files: {}", out.output.trim())));
            }
            let mut files: Vec<String> = out
                .output
                .lines()
                .map(normalize_path)
                .filter(|path| !path.is_empty())
                .collect();
            files.sort();
            debug!(files = files.len(), "built file index");
            self.index = Some(files);
        }
        Ok(self.index.as_deref().unwrap_or_default())
    }
}

impl Tool for FindFile {
    fn name(&self) -> &'static str {
        "find_file"
    }

    fn signature(&self) -> &'static str {
        "find_file <name>"
    }

    fn summary(&self) -> &'static str {
        "list files whose name contains <name>"
    }

    fn details(&self) -> &'static str {
        "The file list is collected once per session, on first use."
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        let needle = args[0];
        let matches: Vec<&String> = self
            .index(ctx)?
            .iter()
            .filter(|path| {
                let name = path.rsplit('/').next().unwrap_or(path);
                name.contains(needle)
            })
            .collect();
        if matches.is_empty() {
            return Ok(format!("No files named like \"{needle}\"."));
        }
        if matches.len() > MAX_RESULTS {
            return Ok(format!(
                "{} files match \"{needle}\"; use a more specific name.",
                matches.len()
            ));
        }
        let listing: Vec<&str> = matches.iter().map(|path| path.as_str()).collect();
        Ok(format!(
            "Found {} files matching \"{needle}\":\n{}",
            matches.len(),
            listing.join("\n")
        ))
    }
}

pub struct SearchDir;

impl Tool for SearchDir {
    fn name(&self) -> &'static str {
        "search_dir"
    }

    fn signature(&self) -> &'static str {
        "search_dir <term> [dir]"
    }

    fn summary(&self) -> &'static str {
        "search file contents under a directory (default: working directory)"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let (term, dir) = match call.args.as_slice() {
            [term] => (term.as_str(), "."),
            [term, dir] => (term.as_str(), dir.as_str()),
            _ => return Err(ToolError::Usage(self.signature().to_string())),
        };
        let command = format!(
            "grep -rnI --exclude-dir=.git -F -- {} {}",
            shell_quote(term),
            shell_quote(dir)
        );
        let out = ctx.env.execute(&command, ctx.settings.command_timeout)?;
        match out.exit_code {
            0 => {}
            1 => return Ok(format!("No matches for \"{term}\" in {dir}.")),
            _ => return Err(ToolError::Failed(out.output.trim().to_string())),
        }
        let hits: Vec<&str> = out
            .output
            .lines()
            .map(|line| line.strip_prefix("./").unwrap_or(line))
            .collect();
        if hits.len() > MAX_RESULTS {
            return Ok(format!(
                "{} matches for \"{term}\" in {dir}; use a more specific term or directory.",
                hits.len()
            ));
        }
        Ok(format!(
            "Found {} matches for \"{term}\" in {dir}:\n{}",
            hits.len(),
            hits.join("\n")
        ))
    }
}

pub struct SearchFile;

impl Tool for SearchFile {
    fn name(&self) -> &'static str {
        "search_file"
    }

    fn signature(&self) -> &'static str {
        "search_file <term> <path>"
    }

    fn summary(&self) -> &'static str {
        "list lines of a file containing <term>"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 2, self.signature())?;
        let (term, path) = (args[0], normalize_path(args[1]));
        let content = match ctx.editor.get(&path) {
            Some(buffer) => buffer.content.clone(),
            None => ctx.env.read_file(&path, ctx.settings.command_timeout)?,
        };
        let hits: Vec<String> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains(term))
            .map(|(idx, line)| format!("{}: {line}", idx + 1))
            .collect();
        if hits.is_empty() {
            return Ok(format!("No matches for \"{term}\" in {path}."));
        }
        if hits.len() > MAX_RESULTS {
            return Ok(format!(
                "{} matches for \"{term}\" in {path}; use a more specific term.",
                hits.len()
            ));
        }
        Ok(format!(
            "Found {} matches for \"{term}\" in {path}:\n{}",
            hits.len(),
            hits.join("\n")
        ))
    }
}
