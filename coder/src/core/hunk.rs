//! Typed diff structures produced by the diff parser.
//!
//! A hunk is kept as the ordered list of tagged lines the model wrote. The
//! "old view" (removed + unchanged) is what we search for in the live file and
//! the "new view" (added + unchanged) is what replaces it.

use serde::{Deserialize, Serialize};

/// Path marker used by unified diffs for a missing side.
pub const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Removed,
    Added,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
}

impl HunkLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// One contiguous block of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextHunk {
    pub lines: Vec<HunkLine>,
}

impl ContextHunk {
    pub fn new(lines: Vec<HunkLine>) -> Self {
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Removed and unchanged lines, in order.
    pub fn old_view(&self) -> Vec<&str> {
        self.view(LineKind::Removed)
    }

    /// Added and unchanged lines, in order.
    pub fn new_view(&self) -> Vec<&str> {
        self.view(LineKind::Added)
    }

    fn view(&self, changed: LineKind) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.kind == changed || line.kind == LineKind::Unchanged)
            .map(|line| line.text.as_str())
            .collect()
    }

    /// Run of unchanged lines before the first change.
    pub fn leading_unchanged(&self) -> &[HunkLine] {
        let end = self
            .lines
            .iter()
            .position(|line| line.kind != LineKind::Unchanged)
            .unwrap_or(self.lines.len());
        &self.lines[..end]
    }

    /// Run of unchanged lines after the last change.
    pub fn trailing_unchanged(&self) -> &[HunkLine] {
        let start = self
            .lines
            .iter()
            .rposition(|line| line.kind != LineKind::Unchanged)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        &self.lines[start..]
    }

    /// Number of added plus removed lines.
    pub fn changed_line_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| line.kind != LineKind::Unchanged)
            .count()
    }
}

/// All hunks targeting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub src_path: String,
    pub tgt_path: String,
    pub hunks: Vec<ContextHunk>,
}

impl FileDiff {
    pub fn is_creation(&self) -> bool {
        self.src_path == DEV_NULL
    }

    pub fn is_deletion(&self) -> bool {
        self.tgt_path == DEV_NULL
    }

    /// The path on disk this diff touches.
    pub fn path(&self) -> &str {
        if self.is_deletion() {
            &self.src_path
        } else {
            &self.tgt_path
        }
    }

    pub fn changed_line_count(&self) -> usize {
        self.hunks.iter().map(ContextHunk::changed_line_count).sum()
    }

    /// Unified-diff text for this file, with bare `@@` hunk markers.
    pub fn render(&self) -> String {
        let side = |path: &str, prefix: &str| {
            if path == DEV_NULL {
                DEV_NULL.to_string()
            } else {
                format!("{prefix}{path}")
            }
        };
        let mut out = format!(
            "--- {}\n+++ {}\n",
            side(&self.src_path, "a/"),
            side(&self.tgt_path, "b/")
        );
        for hunk in &self.hunks {
            out.push_str("@@\n");
            for line in &hunk.lines {
                let marker = match line.kind {
                    LineKind::Removed => '-',
                    LineKind::Added => '+',
                    LineKind::Unchanged => ' ',
                };
                out.push(marker);
                out.push_str(&line.text);
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiFileDiff {
    pub files: Vec<FileDiff>,
}

impl MultiFileDiff {
    /// Sum of added and removed lines across every hunk of every file.
    pub fn changed_line_count(&self) -> usize {
        self.files.iter().map(FileDiff::changed_line_count).sum()
    }

    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.iter().find(|file| file.path() == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunk() -> ContextHunk {
        ContextHunk::new(vec![
            HunkLine::new(LineKind::Unchanged, "b"),
            HunkLine::new(LineKind::Removed, "c"),
            HunkLine::new(LineKind::Added, "c2"),
            HunkLine::new(LineKind::Unchanged, "d"),
            HunkLine::new(LineKind::Unchanged, "e"),
        ])
    }

    #[test]
    fn views_split_removed_and_added() {
        let hunk = hunk();
        assert_eq!(hunk.old_view(), vec!["b", "c", "d", "e"]);
        assert_eq!(hunk.new_view(), vec!["b", "c2", "d", "e"]);
    }

    #[test]
    fn unchanged_runs_frame_the_change() {
        let hunk = hunk();
        assert_eq!(hunk.leading_unchanged().len(), 1);
        assert_eq!(hunk.trailing_unchanged().len(), 2);
        assert_eq!(hunk.changed_line_count(), 2);
    }

    #[test]
    fn all_unchanged_hunk_has_full_runs() {
        let hunk = ContextHunk::new(vec![HunkLine::new(LineKind::Unchanged, "x")]);
        assert_eq!(hunk.leading_unchanged().len(), 1);
        assert_eq!(hunk.trailing_unchanged().len(), 1);
    }

    #[test]
    fn renders_unified_text() {
        let diff = FileDiff {
            src_path: "x.py".to_string(),
            tgt_path: "x.py".to_string(),
            hunks: vec![hunk()],
        };
        assert_eq!(
            diff.render(),
            "--- a/x.py\n+++ b/x.py\n@@\n b\n-c\n+c2\n d\n e\n"
        );
    }

    #[test]
    fn dev_null_marks_creation_and_deletion() {
        let created = FileDiff {
            src_path: DEV_NULL.to_string(),
            tgt_path: "new.py".to_string(),
            hunks: Vec::new(),
        };
        assert!(created.is_creation());
        assert_eq!(created.path(), "new.py");

        let deleted = FileDiff {
            src_path: "old.py".to_string(),
            tgt_path: DEV_NULL.to_string(),
            hunks: Vec::new(),
        };
        assert!(deleted.is_deletion());
        assert_eq!(deleted.path(), "old.py");
    }
}
