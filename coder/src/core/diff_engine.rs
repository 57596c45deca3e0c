//! Whole-diff validation and application.
//!
//! The engine is pure: callers hand it the current content of each referenced
//! file and get back per-file patches or failures. Writing results anywhere is
//! the caller's job. Across recovery attempts the engine remembers how many
//! lines the first attempt changed and rejects retries that drift too far.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::diff_error::DiffError;
use crate::core::diff_parser::parse_multi_file_diff;
use crate::core::hunk::{FileDiff, MultiFileDiff};
use crate::core::patch::{apply_file_hunks, render_created_file};

/// Allowed drift of a retry's changed-line count from the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryBounds {
    pub max_added: usize,
    pub max_removed: usize,
}

impl Default for RecoveryBounds {
    fn default() -> Self {
        Self {
            max_added: 5,
            max_removed: 1,
        }
    }
}

pub fn check_changed_lines(
    original: usize,
    actual: usize,
    bounds: RecoveryBounds,
) -> Result<(), DiffError> {
    if actual > original + bounds.max_added || actual + bounds.max_removed < original {
        return Err(DiffError::ExcessiveChangedLines { original, actual });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePatch {
    Create { path: String, content: String },
    Modify { path: String, content: String },
    Delete { path: String },
}

impl FilePatch {
    pub fn path(&self) -> &str {
        match self {
            FilePatch::Create { path, .. }
            | FilePatch::Modify { path, .. }
            | FilePatch::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub error: DiffError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub patches: Vec<FilePatch>,
    pub failures: Vec<FileFailure>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, path: &str) -> Option<&DiffError> {
        self.failures
            .iter()
            .find(|failure| failure.path == path)
            .map(|failure| &failure.error)
    }
}

#[derive(Debug, Default)]
pub struct DiffEngine {
    bounds: RecoveryBounds,
    original_changed: Option<usize>,
}

impl DiffEngine {
    pub fn new(bounds: RecoveryBounds) -> Self {
        Self {
            bounds,
            original_changed: None,
        }
    }

    /// Changed-line count of the first attempt, once one was made.
    pub fn original_changed(&self) -> Option<usize> {
        self.original_changed
    }

    /// Forget the first attempt; the next diff starts a new edit.
    pub fn reset(&mut self) {
        self.original_changed = None;
    }

    /// Parse model text into a diff and register it as an attempt.
    pub fn parse(&mut self, text: &str) -> Result<MultiFileDiff, DiffError> {
        let diff = parse_multi_file_diff(text)?;
        self.begin_attempt(&diff)?;
        Ok(diff)
    }

    /// Record the first attempt, or bound-check a retry against it.
    pub fn begin_attempt(&mut self, diff: &MultiFileDiff) -> Result<(), DiffError> {
        let actual = diff.changed_line_count();
        match self.original_changed {
            None => {
                self.original_changed = Some(actual);
                Ok(())
            }
            Some(original) => check_changed_lines(original, actual, self.bounds),
        }
    }

    /// Apply each file of `diff` against `sources` (path to current content).
    ///
    /// Files are independent: one file failing does not affect the others.
    pub fn apply(&self, diff: &MultiFileDiff, sources: &BTreeMap<String, String>) -> DiffReport {
        let mut report = DiffReport::default();
        for file in &diff.files {
            match apply_file(file, sources) {
                Ok(patch) => report.patches.push(patch),
                Err(error) => {
                    debug!(path = file.path(), error = error.name(), "file rejected");
                    report.failures.push(FileFailure {
                        path: file.path().to_string(),
                        error,
                    });
                }
            }
        }
        report
    }
}

fn apply_file(file: &FileDiff, sources: &BTreeMap<String, String>) -> Result<FilePatch, DiffError> {
    let path = file.path().to_string();
    if file.is_deletion() {
        return Ok(FilePatch::Delete { path });
    }
    if file.is_creation() {
        let content = render_created_file(file)?;
        return Ok(FilePatch::Create { path, content });
    }
    // A missing file cannot contain the hunk's context.
    let current = sources.get(&path).ok_or(DiffError::NotEnoughContext)?;
    let content = apply_file_hunks(current, file)?;
    Ok(FilePatch::Modify { path, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_DIFF: &str = "\
```diff
--- a/letters.txt
+++ b/letters.txt
@@ -2,3 +2,3 @@
 b
-c
+c2
 d
```
";

    fn sources(path: &str, content: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(path.to_string(), content.to_string())])
    }

    #[test]
    fn bounds_are_asymmetric() {
        let bounds = RecoveryBounds::default();
        assert!(check_changed_lines(4, 9, bounds).is_ok());
        assert!(check_changed_lines(4, 3, bounds).is_ok());
        assert_eq!(
            check_changed_lines(4, 10, bounds).unwrap_err(),
            DiffError::ExcessiveChangedLines {
                original: 4,
                actual: 10
            }
        );
        assert!(check_changed_lines(4, 2, bounds).is_err());
    }

    #[test]
    fn applies_scenario_diff() {
        let mut engine = DiffEngine::default();
        let diff = engine.parse(SCENARIO_DIFF).expect("parse");
        let report = engine.apply(&diff, &sources("letters.txt", "a\nb\nc\nd\ne\n"));
        assert!(report.is_clean());
        assert_eq!(
            report.patches,
            vec![FilePatch::Modify {
                path: "letters.txt".to_string(),
                content: "a\nb\nc2\nd\ne\n".to_string(),
            }]
        );
        assert_eq!(engine.original_changed(), Some(2));
    }

    #[test]
    fn retry_with_six_extra_changes_is_rejected() {
        let mut engine = DiffEngine::default();
        engine.parse(SCENARIO_DIFF).expect("first attempt");

        let mut retry = String::from("--- a/letters.txt\n+++ b/letters.txt\n@@\n b\n-c\n+c2\n");
        for idx in 0..6 {
            retry.push_str(&format!("+extra {idx}\n"));
        }
        retry.push_str(" d\n");
        let err = engine.parse(&retry).unwrap_err();
        assert_eq!(
            err,
            DiffError::ExcessiveChangedLines {
                original: 2,
                actual: 8
            }
        );
    }

    #[test]
    fn failing_file_leaves_other_files_applied() {
        let text = "\
--- a/one.txt
+++ b/one.txt
@@
-x
+y
--- a/two.txt
+++ b/two.txt
@@
 not here
-either
 at all
";
        let mut engine = DiffEngine::default();
        let diff = engine.parse(text).expect("parse");
        let mut files = sources("one.txt", "x\n");
        files.insert("two.txt".to_string(), "p\nq\n".to_string());
        let report = engine.apply(&diff, &files);
        assert_eq!(report.patches.len(), 1);
        assert_eq!(report.patches[0].path(), "one.txt");
        assert_eq!(report.failure("two.txt"), Some(&DiffError::NotEnoughContext));
    }

    #[test]
    fn creation_and_deletion() {
        let text = "\
--- /dev/null
+++ b/new.txt
@@
+hello
--- a/old.txt
+++ /dev/null
@@
-bye
";
        let mut engine = DiffEngine::default();
        let diff = engine.parse(text).expect("parse");
        let report = engine.apply(&diff, &BTreeMap::new());
        assert_eq!(
            report.patches,
            vec![
                FilePatch::Create {
                    path: "new.txt".to_string(),
                    content: "hello\n".to_string(),
                },
                FilePatch::Delete {
                    path: "old.txt".to_string(),
                },
            ]
        );
    }

    #[test]
    fn untouched_file_never_silently_patches() {
        let mut engine = DiffEngine::default();
        let diff = engine.parse(SCENARIO_DIFF).expect("parse");
        let report = engine.apply(&diff, &sources("letters.txt", "p\nq\nr\ns\n"));
        assert!(report.patches.is_empty());
        assert!(report.failure("letters.txt").is_some());
    }
}
