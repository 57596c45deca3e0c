//! Failure taxonomy for applying model-authored diffs.
//!
//! Every variant is recoverable: the session shows `to_recovery_prompt()` to the
//! model verbatim and lets it try again.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("no diff found")]
    NoDiffFound,
    #[error("diff has hunks but no source or target file")]
    NonApplicableDiff,
    #[error("unable to build old/new blocks from a hunk")]
    UnableToParseBlocks,
    #[error("not enough context to locate a hunk")]
    NotEnoughContext,
    #[error("hunk context does not identify a unique location")]
    IncorrectContext,
    #[error("retry changes {actual} lines, original diff changed {original}")]
    ExcessiveChangedLines { original: usize, actual: usize },
}

impl DiffError {
    /// Short stable identifier, used in logs and event payloads.
    pub fn name(&self) -> &'static str {
        match self {
            DiffError::NoDiffFound => "no_diff_found",
            DiffError::NonApplicableDiff => "non_applicable_diff",
            DiffError::UnableToParseBlocks => "unable_to_parse_blocks",
            DiffError::NotEnoughContext => "not_enough_context",
            DiffError::IncorrectContext => "incorrect_context",
            DiffError::ExcessiveChangedLines { .. } => "excessive_changed_lines",
        }
    }

    /// Instructional text replayed to the model after a failed edit.
    pub fn to_recovery_prompt(&self) -> String {
        match self {
            DiffError::NoDiffFound => "No diff was found in your edit. Wrap the diff in a \
                fenced code block, a <DIFF></DIFF> pair or a <<< >>> pair, and start each file \
                with `--- path` and `+++ path` header lines."
                .to_string(),
            DiffError::NonApplicableDiff => "The diff contains hunks but no file headers. \
                Every file must start with `--- path` and `+++ path` lines (use /dev/null as \
                the source to create a file) before its `@@` hunks."
                .to_string(),
            DiffError::UnableToParseBlocks => "A hunk could not be split into the old and new \
                code. Each hunk needs at least one unchanged or removed line (prefixed with a \
                space or `-`) so it can be located in the file; added lines start with `+`."
                .to_string(),
            DiffError::NotEnoughContext => "The context lines of a hunk were not found in the \
                file. Copy at least three unchanged lines before and after the change exactly as \
                they appear in the current file contents, including their order."
                .to_string(),
            DiffError::IncorrectContext => "The context lines of a hunk match the file in more \
                than one place, or in none. Include additional distinct unchanged lines around \
                the change so the location is unambiguous, and quote them exactly."
                .to_string(),
            DiffError::ExcessiveChangedLines { original, actual } => format!(
                "The corrected diff changes {actual} lines but the original diff changed \
                 {original}. Keep the correction focused on the original edit: fix only the \
                 context lines instead of rewriting unrelated code."
            ),
        }
    }
}
