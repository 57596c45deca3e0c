//! Splice located hunks into file content.

use crate::core::diff_error::DiffError;
use crate::core::fuzzy::{Span, locate_hunk, strip_blank_edges};
use crate::core::hunk::{ContextHunk, FileDiff};

/// Apply one hunk to a line buffer in place.
///
/// The buffer is untouched when the hunk cannot be located.
pub fn apply_hunk(buffer: &mut Vec<String>, hunk: &ContextHunk) -> Result<Span, DiffError> {
    let old_view = hunk.old_view();
    let span = {
        let file: Vec<&str> = buffer.iter().map(String::as_str).collect();
        locate_hunk(&file, &old_view)?
    };
    let new_view = hunk.new_view();
    let replacement: Vec<String> = strip_blank_edges(&new_view)
        .iter()
        .map(|line| (*line).to_string())
        .collect();
    buffer.splice(span.start..=span.end, replacement);
    Ok(span)
}

/// Apply every hunk of `diff`, in order, to `content`.
///
/// Returns the new content; on the first failing hunk the whole file is
/// rejected. A trailing newline on the input is preserved.
pub fn apply_file_hunks(content: &str, diff: &FileDiff) -> Result<String, DiffError> {
    if diff.hunks.is_empty() {
        return Err(DiffError::UnableToParseBlocks);
    }
    let mut buffer: Vec<String> = content.lines().map(str::to_string).collect();
    for hunk in &diff.hunks {
        apply_hunk(&mut buffer, hunk)?;
    }
    Ok(join_lines(&buffer, content.ends_with('\n') || content.is_empty()))
}

/// Content of a file created by a `/dev/null` source diff.
pub fn render_created_file(diff: &FileDiff) -> Result<String, DiffError> {
    let lines: Vec<&str> = diff.hunks.iter().flat_map(ContextHunk::new_view).collect();
    if diff.hunks.is_empty() {
        return Err(DiffError::UnableToParseBlocks);
    }
    Ok(join_lines(&lines, true))
}

fn join_lines<S: AsRef<str>>(lines: &[S], trailing_newline: bool) -> String {
    let mut out = lines
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}
