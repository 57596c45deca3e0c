//! Opening, creating, deleting, and paging through files.

use crate::core::command::ToolCall;
use crate::tools::editor::normalize_path;
use crate::tools::{Tool, ToolContext, ToolError, expect_args};

fn page_message(ctx: &ToolContext<'_>, path: &str) -> Result<String, ToolError> {
    let view = ctx.editor.render_page(path)?;
    Ok(format!(
        "Showing {} page {} of {}.",
        view.path, view.page, view.pages
    ))
}

pub struct OpenFile;

impl Tool for OpenFile {
    fn name(&self) -> &'static str {
        "open_file"
    }

    fn signature(&self) -> &'static str {
        "open_file <path>"
    }

    fn summary(&self) -> &'static str {
        "open a file in the editor at its first page"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        let path = normalize_path(args[0]);
        if !ctx.env.file_exists(&path, ctx.settings.command_timeout)? {
            return Err(ToolError::Failed(format!("file {path} does not exist")));
        }
        let content = ctx.env.read_file(&path, ctx.settings.command_timeout)?;
        ctx.editor.open(&path, content);
        page_message(ctx, &path)
    }
}

pub struct CreateFile;

impl Tool for CreateFile {
    fn name(&self) -> &'static str {
        "create_file"
    }

    fn signature(&self) -> &'static str {
        "create_file <path> [<<<content>>>]"
    }

    fn summary(&self) -> &'static str {
        "create a new file, optionally with content, and open it"
    }

    fn details(&self) -> &'static str {
        "Fails if the file already exists; use edit_file to change existing files."
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let (path, content) = match call.args.as_slice() {
            [path] => (path, String::new()),
            [path, content] => {
                let mut content = content.clone();
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                (path, content)
            }
            _ => return Err(ToolError::Usage(self.signature().to_string())),
        };
        let path = normalize_path(path);
        if ctx.env.file_exists(&path, ctx.settings.command_timeout)? {
            return Err(ToolError::Failed(format!(
                "file {path} already exists; open it and use edit_file instead"
            )));
        }
        ctx.env
            .write_file(&path, &content, ctx.settings.command_timeout)?;
        ctx.editor.open(&path, content);
        Ok(format!("Created {path}."))
    }
}

pub struct DeleteFile;

impl Tool for DeleteFile {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn signature(&self) -> &'static str {
        "delete_file <path>"
    }

    fn summary(&self) -> &'static str {
        "delete a file and close it in the editor"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        let path = normalize_path(args[0]);
        if !ctx.env.file_exists(&path, ctx.settings.command_timeout)? {
            return Err(ToolError::Failed(format!("file {path} does not exist")));
        }
        ctx.env.delete_file(&path, ctx.settings.command_timeout)?;
        ctx.editor.close(&path);
        Ok(format!("Deleted {path}."))
    }
}

pub struct CloseFile;

impl Tool for CloseFile {
    fn name(&self) -> &'static str {
        "close_file"
    }

    fn signature(&self) -> &'static str {
        "close_file <path>"
    }

    fn summary(&self) -> &'static str {
        "remove a file from the editor"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        let path = normalize_path(args[0]);
        if !ctx.editor.close(&path) {
            return Err(ToolError::Failed(format!("file {path} is not open")));
        }
        Ok(format!("Closed {path}."))
    }
}

pub struct ScrollUp;

impl Tool for ScrollUp {
    fn name(&self) -> &'static str {
        "scroll_up"
    }

    fn signature(&self) -> &'static str {
        "scroll_up <path>"
    }

    fn summary(&self) -> &'static str {
        "show the previous page of an open file"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        ctx.editor.scroll(args[0], -1)?;
        page_message(ctx, args[0])
    }
}

pub struct ScrollDown;

impl Tool for ScrollDown {
    fn name(&self) -> &'static str {
        "scroll_down"
    }

    fn signature(&self) -> &'static str {
        "scroll_down <path>"
    }

    fn summary(&self) -> &'static str {
        "show the next page of an open file"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 1, self.signature())?;
        ctx.editor.scroll(args[0], 1)?;
        page_message(ctx, args[0])
    }
}

pub struct ScrollToLine;

impl Tool for ScrollToLine {
    fn name(&self) -> &'static str {
        "scroll_to_line"
    }

    fn signature(&self) -> &'static str {
        "scroll_to_line <path> <line>"
    }

    fn summary(&self) -> &'static str {
        "show the page of an open file containing a 1-based line"
    }

    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let args = expect_args(call, 2, self.signature())?;
        let line: usize = args[1]
            .parse()
            .map_err(|_| ToolError::Usage(self.signature().to_string()))?;
        ctx.editor.scroll_to_line(args[0], line)?;
        page_message(ctx, args[0])
    }
}
