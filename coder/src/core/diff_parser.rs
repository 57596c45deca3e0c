//! Parser for model-authored context diffs.
//!
//! Two stages: pull the diff text out of free-form model output, then split it
//! into files and hunks of tagged lines. Line numbers in `@@` markers are
//! ignored; hunks are located later by content.

use tracing::debug;

use crate::core::diff_error::DiffError;
use crate::core::hunk::{ContextHunk, DEV_NULL, FileDiff, HunkLine, LineKind, MultiFileDiff};

const DIFF_OPEN_TAG: &str = "<DIFF>";
const DIFF_CLOSE_TAG: &str = "</DIFF>";
const BLOCK_OPEN: &str = "<<<";
const BLOCK_CLOSE: &str = ">>>";

/// Extract diff bodies from model output.
///
/// Conventions are tried in a fixed order (fenced code block, `<DIFF>` tag pair,
/// `<<<`/`>>>` pair) and the first one yielding a diff-looking block wins.
pub fn extract_diff_blocks(text: &str) -> Result<Vec<String>, DiffError> {
    let conventions: [fn(&str) -> Vec<String>; 3] =
        [fenced_code_blocks, tagged_blocks, bracketed_blocks];
    for extract in conventions {
        let blocks: Vec<String> = extract(text)
            .into_iter()
            .filter(|block| looks_like_diff(block))
            .collect();
        if !blocks.is_empty() {
            return Ok(blocks);
        }
    }
    Err(DiffError::NoDiffFound)
}

/// Parse model output (fenced or bare) into a typed multi-file diff.
pub fn parse_multi_file_diff(text: &str) -> Result<MultiFileDiff, DiffError> {
    let blocks = match extract_diff_blocks(text) {
        Ok(blocks) => blocks,
        // A diff passed without any fence (e.g. a heredoc argument) is still a diff.
        Err(DiffError::NoDiffFound) if looks_like_diff(text) => vec![text.to_string()],
        Err(err) => return Err(err),
    };

    let mut merged = MultiFileDiff::default();
    for block in &blocks {
        for file in parse_diff_block(block)? {
            match merged
                .files
                .iter_mut()
                .find(|f| f.src_path == file.src_path && f.tgt_path == file.tgt_path)
            {
                Some(existing) => existing.hunks.extend(file.hunks),
                None => merged.files.push(file),
            }
        }
    }

    if merged.files.is_empty() {
        return Err(DiffError::NoDiffFound);
    }
    debug!(
        files = merged.files.len(),
        changed_lines = merged.changed_line_count(),
        "parsed diff"
    );
    Ok(merged)
}

/// Split one diff body into per-file hunks.
pub fn parse_diff_block(block: &str) -> Result<Vec<FileDiff>, DiffError> {
    let lines: Vec<&str> = block.lines().collect();
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current_file: Option<FileDiff> = None;
    let mut current_hunk: Option<Vec<HunkLine>> = None;
    let mut orphan_hunk = false;

    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        let next = lines.get(idx + 1).copied();

        if let (Some(src_raw), Some(tgt_raw)) = (
            line.strip_prefix("--- "),
            next.and_then(|n| n.strip_prefix("+++ ")),
        ) {
            close_hunk(&mut current_file, &mut current_hunk, &mut orphan_hunk);
            if let Some(file) = current_file.take() {
                files.push(file);
            }
            let src = clean_path(src_raw);
            let tgt = clean_path(tgt_raw);
            if src.is_none() && tgt.is_none() {
                return Err(DiffError::NonApplicableDiff);
            }
            let src = src.or_else(|| tgt.clone()).unwrap_or_default();
            let tgt = tgt.unwrap_or_else(|| src.clone());
            if src == DEV_NULL && tgt == DEV_NULL {
                return Err(DiffError::NonApplicableDiff);
            }
            current_file = Some(FileDiff {
                src_path: src,
                tgt_path: tgt,
                hunks: Vec::new(),
            });
            idx += 2;
            continue;
        }

        if line.starts_with("@@") {
            close_hunk(&mut current_file, &mut current_hunk, &mut orphan_hunk);
            current_hunk = Some(Vec::new());
            idx += 1;
            continue;
        }

        if line.starts_with("\\ No newline") {
            idx += 1;
            continue;
        }

        let tagged = tag_line(line);
        match current_hunk.as_mut() {
            Some(hunk) => hunk.push(tagged),
            // Content right after the file headers without an `@@` marker.
            None if current_file.is_some() => current_hunk = Some(vec![tagged]),
            None => {
                if tagged.kind != LineKind::Unchanged {
                    orphan_hunk = true;
                }
            }
        }
        idx += 1;
    }

    close_hunk(&mut current_file, &mut current_hunk, &mut orphan_hunk);
    if orphan_hunk {
        return Err(DiffError::NonApplicableDiff);
    }
    if let Some(file) = current_file.take() {
        files.push(file);
    }
    Ok(files)
}

fn close_hunk(
    file: &mut Option<FileDiff>,
    hunk: &mut Option<Vec<HunkLine>>,
    orphan_hunk: &mut bool,
) {
    let Some(lines) = hunk.take() else {
        return;
    };
    if lines.is_empty() {
        return;
    }
    match file.as_mut() {
        Some(file) => file.hunks.push(ContextHunk::new(lines)),
        None => *orphan_hunk = true,
    }
}

fn tag_line(line: &str) -> HunkLine {
    if let Some(rest) = line.strip_prefix('-') {
        HunkLine::new(LineKind::Removed, rest)
    } else if let Some(rest) = line.strip_prefix('+') {
        HunkLine::new(LineKind::Added, rest)
    } else if let Some(rest) = line.strip_prefix(' ') {
        HunkLine::new(LineKind::Unchanged, rest)
    } else {
        // Models often drop the leading space of context lines.
        HunkLine::new(LineKind::Unchanged, line)
    }
}

/// Normalize a `---`/`+++` header path. Returns `None` for an empty path.
fn clean_path(raw: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or_default().trim();
    if path.is_empty() {
        return None;
    }
    if path == DEV_NULL {
        return Some(DEV_NULL.to_string());
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(path);
    Some(path.to_string())
}

fn looks_like_diff(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("@@"))
}

fn fenced_code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.as_mut() {
            None if trimmed.starts_with("```") => current = Some(Vec::new()),
            None => {}
            Some(body) if trimmed.trim_end() == "```" => {
                blocks.push(body.join("\n"));
                current = None;
            }
            Some(body) => body.push(line),
        }
    }
    blocks
}

fn tagged_blocks(text: &str) -> Vec<String> {
    delimited_blocks(text, DIFF_OPEN_TAG, DIFF_CLOSE_TAG)
}

fn bracketed_blocks(text: &str) -> Vec<String> {
    delimited_blocks(text, BLOCK_OPEN, BLOCK_CLOSE)
}

fn delimited_blocks(text: &str, open: &str, close: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        let Some(end) = after_open.find(close) else {
            break;
        };
        let body = &after_open[..end];
        let body = body.strip_prefix('\n').unwrap_or(body);
        let body = body.strip_suffix('\n').unwrap_or(body);
        blocks.push(body.to_string());
        rest = &after_open[end + close.len()..];
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "--- a/src/app.py\n+++ b/src/app.py\n@@ -1,3 +1,3 @@\n b\n-c\n+c2\n d\n";

    #[test]
    fn parses_headers_and_tagged_lines() {
        let files = parse_diff_block(SIMPLE).expect("parse");
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.src_path, "src/app.py");
        assert_eq!(file.tgt_path, "src/app.py");
        assert_eq!(file.hunks.len(), 1);
        let kinds: Vec<LineKind> = file.hunks[0].lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LineKind::Unchanged,
                LineKind::Removed,
                LineKind::Added,
                LineKind::Unchanged
            ]
        );
    }

    #[test]
    fn extracts_fenced_block_first() {
        let text = format!("I will fix it.\n```diff\n{SIMPLE}```\nthen <<<\nnot a diff\n>>>");
        let blocks = extract_diff_blocks(&text).expect("extract");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("--- a/src/app.py"));
    }

    #[test]
    fn extracts_tagged_and_bracketed_blocks() {
        let tagged = format!("<DIFF>\n{SIMPLE}</DIFF>");
        assert_eq!(extract_diff_blocks(&tagged).expect("tagged").len(), 1);

        let bracketed = format!("<<<\n{SIMPLE}>>>");
        assert_eq!(extract_diff_blocks(&bracketed).expect("bracketed").len(), 1);
    }

    #[test]
    fn skips_fenced_blocks_that_are_not_diffs() {
        let text = format!("```python\nprint(1)\n```\n<DIFF>\n{SIMPLE}</DIFF>");
        let blocks = extract_diff_blocks(&text).expect("extract");
        assert!(blocks[0].contains("+c2"));
    }

    #[test]
    fn no_diff_in_prose_is_an_error() {
        let err = extract_diff_blocks("just some words").unwrap_err();
        assert_eq!(err, DiffError::NoDiffFound);
        let err = parse_multi_file_diff("just some words").unwrap_err();
        assert_eq!(err, DiffError::NoDiffFound);
    }

    #[test]
    fn bare_diff_is_accepted() {
        let diff = parse_multi_file_diff(SIMPLE).expect("parse");
        assert_eq!(diff.files.len(), 1);
        assert_eq!(diff.changed_line_count(), 2);
    }

    #[test]
    fn hunk_without_file_headers_is_non_applicable() {
        let err = parse_diff_block("@@ -1 +1 @@\n-a\n+b\n").unwrap_err();
        assert_eq!(err, DiffError::NonApplicableDiff);
    }

    #[test]
    fn dev_null_on_both_sides_is_non_applicable() {
        for text in [
            "--- /dev/null\n+++ \n@@\n+x\n",
            "--- /dev/null\n+++ /dev/null\n@@\n+x\n",
        ] {
            assert_eq!(parse_diff_block(text).unwrap_err(), DiffError::NonApplicableDiff);
        }
    }

    #[test]
    fn splits_multiple_files_and_hunks() {
        let text = "--- a/one.py\n+++ b/one.py\n@@\n x\n-y\n+z\n@@\n p\n-q\n--- /dev/null\n+++ b/two.py\n@@\n+hello\n";
        let diff = parse_multi_file_diff(text).expect("parse");
        assert_eq!(diff.files.len(), 2);
        assert_eq!(diff.files[0].hunks.len(), 2);
        assert!(diff.files[1].is_creation());
        assert_eq!(diff.files[1].path(), "two.py");
    }

    #[test]
    fn removed_line_starting_with_dashes_is_not_a_header() {
        let text = "--- a/x.sql\n+++ b/x.sql\n@@\n select 1;\n--- old comment\n+-- new comment\n";
        let files = parse_diff_block(text).expect("parse");
        assert_eq!(files.len(), 1);
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.lines[1].kind, LineKind::Removed);
        assert_eq!(hunk.lines[1].text, "-- old comment");
    }

    #[test]
    fn content_after_headers_without_marker_forms_a_hunk() {
        let files = parse_diff_block("--- a.py\n+++ a.py\n x = 1\n-y = 2\n+y = 3\n").expect("parse");
        assert_eq!(files[0].hunks.len(), 1);
        assert_eq!(files[0].hunks[0].old_view(), vec!["x = 1", "y = 2"]);
    }

    #[test]
    fn same_file_across_blocks_is_merged() {
        let text = format!("```\n{SIMPLE}```\n```\n{SIMPLE}```");
        let diff = parse_multi_file_diff(&text).expect("parse");
        assert_eq!(diff.files.len(), 1);
        assert_eq!(diff.files[0].hunks.len(), 2);
    }
}
