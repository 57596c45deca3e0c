//! `edit_file`: apply a model-authored diff with bounded recovery.
//!
//! The whole diff is parsed and applied in memory first. Files that apply are
//! written; each file that fails gets up to `max_edit_recoveries` retries in
//! which the model sees the error, its diff, and the current source. Nothing
//! is written for a file until its diff applies.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::core::command::ToolCall;
use crate::core::diff_engine::{DiffEngine, FilePatch};
use crate::core::diff_error::DiffError;
use crate::core::hunk::{FileDiff, MultiFileDiff};
use crate::core::lint::{LintFinding, new_findings, parse_findings, render_findings};
use crate::core::types::Message;
use crate::io::environment::shell_quote;
use crate::io::model::query_with_retry;
use crate::io::prompt::RecoveryInputs;
use crate::tools::editor::number_lines;
use crate::tools::{Tool, ToolContext, ToolError};

/// Source files longer than this are shown to the model as a window.
const EXCERPT_LINES: usize = 120;

const RECOVERY_SYSTEM_PROMPT: &str =
    "You correct unified diffs that failed to apply. Reply with the corrected diff only.";

pub struct EditFile;

impl Tool for EditFile {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn signature(&self) -> &'static str {
        "edit_file <<<diff>>>"
    }

    fn summary(&self) -> &'static str {
        "apply a unified diff to one or more files"
    }

    fn details(&self) -> &'static str {
        "Start each file with `--- a/path` and `+++ b/path`; use /dev/null to create or delete.\n\
         Line numbers in `@@` headers are ignored: hunks are located by their context lines.\n\
         Give at least three unchanged lines before and after each change."
    }

    #[instrument(skip_all, fields(tool = "edit_file"))]
    fn function(&mut self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<String, ToolError> {
        let text = match call.args.as_slice() {
            [text] => text.as_str(),
            _ => return Err(ToolError::Usage(self.signature().to_string())),
        };
        let mut engine = DiffEngine::new(ctx.settings.recovery);
        let diff = engine
            .parse(text)
            .map_err(|err| ToolError::Failed(err.to_recovery_prompt()))?;

        let mut notes = Vec::new();
        let mut failed = Vec::new();
        let mut applicable = MultiFileDiff::default();
        let mut sources = BTreeMap::new();
        for file in &diff.files {
            match precheck(ctx, file)? {
                Precheck::Ready(source) => {
                    if let Some(source) = source {
                        sources.insert(file.path().to_string(), source);
                    }
                    applicable.files.push(file.clone());
                }
                Precheck::Rejected(reason) => failed.push(format!("{}: {reason}", file.path())),
            }
        }

        let report = engine.apply(&applicable, &sources);
        for patch in &report.patches {
            notes.push(write_patch(ctx, patch, sources.get(patch.path()))?);
        }
        for failure in &report.failures {
            let Some(file) = applicable.file(&failure.path) else {
                continue;
            };
            match recover(ctx, file, &failure.error, &sources)? {
                Ok(patch) => notes.push(write_patch(ctx, &patch, sources.get(patch.path()))?),
                Err(err) => failed.push(format!("{}: {}", failure.path, err.to_recovery_prompt())),
            }
        }

        if notes.is_empty() {
            return Err(ToolError::Failed(format!(
                "No changes were applied.\n{}",
                failed.join("\n")
            )));
        }
        let mut out = notes.join("\n");
        if !failed.is_empty() {
            out.push_str("\nThese files were not changed:\n");
            out.push_str(&failed.join("\n"));
        }
        Ok(out)
    }
}

enum Precheck {
    /// Current content, for diffs that modify an existing file.
    Ready(Option<String>),
    Rejected(String),
}

fn precheck(ctx: &mut ToolContext<'_>, file: &FileDiff) -> Result<Precheck, ToolError> {
    let path = file.path();
    let exists = ctx.env.file_exists(path, ctx.settings.command_timeout)?;
    if file.is_creation() {
        if exists {
            return Ok(Precheck::Rejected(
                "file already exists; diff against its current content instead of /dev/null"
                    .to_string(),
            ));
        }
        return Ok(Precheck::Ready(None));
    }
    if !exists {
        return Ok(Precheck::Rejected(
            "file does not exist; use /dev/null as the source to create it".to_string(),
        ));
    }
    if file.is_deletion() {
        return Ok(Precheck::Ready(None));
    }
    let source = ctx.env.read_file(path, ctx.settings.command_timeout)?;
    Ok(Precheck::Ready(Some(source)))
}

/// Re-prompt the model for one failed file until its diff applies.
///
/// The outer result carries environment failures; the inner one is the last
/// diff error when every attempt failed.
fn recover(
    ctx: &mut ToolContext<'_>,
    file: &FileDiff,
    error: &DiffError,
    sources: &BTreeMap<String, String>,
) -> Result<Result<FilePatch, DiffError>, ToolError> {
    let path = file.path();
    let original = file.render();
    let source = sources.get(path).map(String::as_str).unwrap_or_default();
    let excerpt = source_excerpt(source, file);

    let mut engine = DiffEngine::new(ctx.settings.recovery);
    let first = MultiFileDiff {
        files: vec![file.clone()],
    };
    if let Err(err) = engine.begin_attempt(&first) {
        return Ok(Err(err));
    }

    let mut latest = original.clone();
    let mut error = error.clone();
    for attempt in 1..=ctx.settings.max_edit_recoveries {
        let prompt = ctx
            .prompts
            .render_edit_recovery(&RecoveryInputs {
                path,
                error: &error.to_recovery_prompt(),
                original_diff: &original,
                latest_diff: &latest,
                source: &excerpt,
            })
            .map_err(|err| ToolError::Failed(format!("{err:#}")))?;
        let reply = match query_with_retry(
            ctx.model,
            &[Message::user(prompt)],
            RECOVERY_SYSTEM_PROMPT,
            ctx.settings.model_retry,
        ) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(path, err = %err, "model failed during edit recovery");
                break;
            }
        };
        latest = reply;

        let retry = match engine.parse(&latest) {
            Ok(diff) => diff,
            Err(err) => {
                debug!(path, attempt, error = err.name(), "recovery diff rejected");
                error = err;
                continue;
            }
        };
        let Some(fixed) = retry.file(path) else {
            error = DiffError::NoDiffFound;
            continue;
        };
        let single = MultiFileDiff {
            files: vec![fixed.clone()],
        };
        let mut report = engine.apply(&single, sources);
        if let Some(patch) = report.patches.pop() {
            info!(path, attempt, "edit recovered");
            return Ok(Ok(patch));
        }
        if let Some(failure) = report.failures.pop() {
            debug!(path, attempt, error = failure.error.name(), "recovery attempt failed");
            error = failure.error;
        }
    }
    Ok(Err(error))
}

/// Write one patch through the environment and keep the editor in sync.
fn write_patch(
    ctx: &mut ToolContext<'_>,
    patch: &FilePatch,
    before: Option<&String>,
) -> Result<String, ToolError> {
    let timeout = ctx.settings.command_timeout;
    match patch {
        FilePatch::Create { path, content } => {
            ctx.env.write_file(path, content, timeout)?;
            ctx.editor.open(path, content.clone());
            Ok(format!("Created {path}."))
        }
        FilePatch::Delete { path } => {
            ctx.env.delete_file(path, timeout)?;
            ctx.editor.close(path);
            Ok(format!("Deleted {path}."))
        }
        FilePatch::Modify { path, content } => {
            let lint_before = match before {
                Some(_) => run_lint(ctx, path),
                None => None,
            };
            ctx.env.write_file(path, content, timeout)?;
            ctx.editor.update_content(path, content.clone());
            let mut note = format!("Edited {path}.");
            if let Some(problem) = run_syntax_check(ctx, path) {
                note.push_str(&format!("\nSyntax check failed:\n{problem}"));
            }
            if let (Some(before), Some(after)) = (lint_before, run_lint(ctx, path)) {
                let introduced = new_findings(&before, &after);
                if !introduced.is_empty() {
                    note.push_str(&format!(
                        "\nThis edit introduced lint findings:\n{}",
                        render_findings(&introduced)
                    ));
                }
            }
            Ok(note)
        }
    }
}

fn lint_command(template: &str, path: &str) -> String {
    template.replace("{path}", &shell_quote(path))
}

/// Lint findings for `path`, or `None` when linting is off or unavailable.
fn run_lint(ctx: &mut ToolContext<'_>, path: &str) -> Option<Vec<LintFinding>> {
    let template = ctx.settings.lint.command.as_deref()?;
    let command = lint_command(template, path);
    match ctx.env.execute(&command, ctx.settings.command_timeout) {
        Ok(out) => Some(parse_findings(&out.output)),
        Err(err) => {
            warn!(path, err = %err, "lint command failed");
            None
        }
    }
}

/// Output of a failed syntax check, if one is configured and fails.
fn run_syntax_check(ctx: &mut ToolContext<'_>, path: &str) -> Option<String> {
    let template = ctx.settings.lint.syntax_command.as_deref()?;
    let command = lint_command(template, path);
    match ctx.env.execute(&command, ctx.settings.command_timeout) {
        Ok(out) if out.success() => None,
        Ok(out) => Some(out.output.trim().to_string()),
        Err(err) => {
            warn!(path, err = %err, "syntax check failed to run");
            None
        }
    }
}

/// Numbered source shown to the model during recovery.
///
/// Short files are shown whole. Longer ones are cut to a window around the
/// first line of the first hunk's context, or the top of the file.
fn source_excerpt(source: &str, file: &FileDiff) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.len() <= EXCERPT_LINES {
        return number_lines(&lines, 1);
    }
    let anchor = file
        .hunks
        .first()
        .and_then(|hunk| hunk.old_view().into_iter().find(|line| !line.trim().is_empty()))
        .and_then(|first| lines.iter().position(|line| line.trim() == first.trim()))
        .unwrap_or(0);
    let start = anchor.saturating_sub(EXCERPT_LINES / 4);
    let end = (start + EXCERPT_LINES).min(lines.len());
    number_lines(&lines[start..end], start + 1)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::command::parse_command;
    use crate::core::diff_engine::RecoveryBounds;
    use crate::io::config::LintConfig;
    use crate::io::model::RetryPolicy;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{MemoryEnvironment, ScriptedModel};
    use crate::tools::ToolSettings;
    use crate::tools::editor::EditorStore;

    const LETTERS: &str = "a\nb\nc\nd\ne\n";

    fn settings() -> ToolSettings {
        ToolSettings {
            command_timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
            max_edit_recoveries: 3,
            recovery: RecoveryBounds::default(),
            lint: LintConfig::default(),
            model_retry: RetryPolicy {
                max_retries: 0,
                backoff_base: Duration::ZERO,
            },
        }
    }

    fn run(
        env: &mut MemoryEnvironment,
        model: &mut ScriptedModel,
        settings: &ToolSettings,
        diff: &str,
    ) -> Result<String, ToolError> {
        let prompts = PromptEngine::new().expect("prompts");
        let mut editor = EditorStore::new(50);
        let mut ctx = ToolContext {
            env,
            model,
            editor: &mut editor,
            prompts: &prompts,
            settings,
        };
        let call = parse_command(&format!("edit_file <<<\n{diff}\n>>>")).expect("parse");
        EditFile.function(&mut ctx, &call)
    }

    fn letters_diff(context_line: &str) -> String {
        format!(
            "```diff\n--- a/letters.txt\n+++ b/letters.txt\n@@\n {context_line}\n-c\n+c2\n d\n e\n```"
        )
    }

    #[test]
    fn applies_fuzzy_diff_and_writes_file() {
        let mut env = MemoryEnvironment::new().with_file("letters.txt", LETTERS);
        let mut model = ScriptedModel::default();
        let out = run(&mut env, &mut model, &settings(), &letters_diff("b")).expect("edit");
        assert_eq!(out, "Edited letters.txt.");
        assert_eq!(env.file("letters.txt"), Some("a\nb\nc2\nd\ne\n"));
        assert!(model.transcript().borrow().is_empty());
    }

    #[test]
    fn recovers_a_failed_file_with_a_corrected_diff() {
        let mut env = MemoryEnvironment::new().with_file("letters.txt", LETTERS);
        let mut model = ScriptedModel::new([letters_diff("b")]);
        let out = run(&mut env, &mut model, &settings(), &letters_diff("zzz qqq")).expect("edit");
        assert_eq!(out, "Edited letters.txt.");
        assert_eq!(env.file("letters.txt"), Some("a\nb\nc2\nd\ne\n"));

        let transcript = model.transcript();
        let prompt = &transcript.borrow()[0][0].content;
        assert!(prompt.contains("<source path=\"letters.txt\">"));
        assert!(prompt.contains("3: c"));
    }

    #[test]
    fn oversized_retry_is_rejected_and_nothing_is_written() {
        let mut env = MemoryEnvironment::new().with_file("letters.txt", LETTERS);
        let oversized = "```diff\n--- a/letters.txt\n+++ b/letters.txt\n@@\n b\n-c\n+1\n+2\n+3\n+4\n+5\n+6\n+7\n d\n e\n```";
        let mut model = ScriptedModel::new([oversized, oversized, oversized]);
        let err = run(&mut env, &mut model, &settings(), &letters_diff("zzz qqq")).unwrap_err();
        let ToolError::Failed(message) = err else {
            panic!("expected failure, got {err:?}");
        };
        assert!(message.contains("changes 8 lines"));
        assert_eq!(env.file("letters.txt"), Some(LETTERS));
        assert_eq!(model.transcript().borrow().len(), 3);
    }

    #[test]
    fn successful_files_are_written_when_another_fails() {
        let mut env = MemoryEnvironment::new()
            .with_file("letters.txt", LETTERS)
            .with_file("other.txt", "x\ny\nz\n");
        let diff = "```diff\n--- a/letters.txt\n+++ b/letters.txt\n@@\n b\n-c\n+c2\n d\n--- a/other.txt\n+++ b/other.txt\n@@\n nope\n-nothing\n+here\n```";
        let mut model = ScriptedModel::default();
        let mut settings = settings();
        settings.max_edit_recoveries = 0;
        let out = run(&mut env, &mut model, &settings, diff).expect("partial edit");
        assert!(out.starts_with("Edited letters.txt."));
        assert!(out.contains("other.txt:"));
        assert_eq!(env.file("other.txt"), Some("x\ny\nz\n"));
    }

    #[test]
    fn creation_and_missing_files() {
        let mut env = MemoryEnvironment::new();
        let mut model = ScriptedModel::default();
        let create = "--- /dev/null\n+++ b/new.py\n@@\n+print(1)\n";
        let out = run(&mut env, &mut model, &settings(), create).expect("create");
        assert_eq!(out, "Created new.py.");
        assert_eq!(env.file("new.py"), Some("print(1)\n"));

        let modify_missing = "--- a/ghost.py\n+++ b/ghost.py\n@@\n a\n-b\n+c\n";
        let err = run(&mut env, &mut model, &settings(), modify_missing).unwrap_err();
        assert!(err.to_string().contains("ghost.py: file does not exist"));
    }

    #[test]
    fn unparsable_diff_reports_recovery_text() {
        let mut env = MemoryEnvironment::new();
        let mut model = ScriptedModel::default();
        let err = run(&mut env, &mut model, &settings(), "just words").unwrap_err();
        assert_eq!(err.to_string(), DiffError::NoDiffFound.to_recovery_prompt());
    }

    #[test]
    fn reports_only_new_lint_findings() {
        let mut env = MemoryEnvironment::new()
            .with_file("letters.txt", LETTERS)
            .respond("lint", "letters.txt:1:1: E1 old problem\n", 1);
        let mut settings = settings();
        settings.lint.command = Some("lint {path}".to_string());
        let mut model = ScriptedModel::default();
        let out = run(&mut env, &mut model, &settings, &letters_diff("b")).expect("edit");
        assert_eq!(out, "Edited letters.txt.");
        assert_eq!(
            env.executed,
            vec!["lint 'letters.txt'".to_string(), "lint 'letters.txt'".to_string()]
        );
    }

    #[test]
    fn long_sources_are_windowed_around_the_hunk() {
        let source: String = (1..=400).map(|n| format!("line {n}\n")).collect();
        let diff = crate::core::diff_parser::parse_multi_file_diff(
            "--- a/f\n+++ b/f\n@@\n line 300\n-line 301\n+changed\n",
        )
        .expect("diff");
        let excerpt = source_excerpt(&source, &diff.files[0]);
        assert!(excerpt.contains("300: line 300"));
        assert!(excerpt.starts_with("270: line 270"));
    }
}
