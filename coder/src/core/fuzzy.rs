//! Fuzzy location of hunks inside a live file.
//!
//! The model's quoting of a file is rarely exact, so a hunk is located by its
//! edges ("fences"): the first and last few non-blank lines of its old view.
//! Lines are compared after trimming surrounding whitespace. Each fence length
//! is tried with exact lines first; only when that finds nothing may lines of
//! at least [`MIN_FUZZY_LINE_CHARS`] characters differ by one character edit.
//! Blank lines are ignored on both sides, so all matching happens in a
//! "non-blank index space" that is mapped back to file lines at the end.

use crate::core::diff_error::DiffError;

/// Largest per-line Levenshtein distance still treated as a match.
pub const MAX_LINE_DISTANCE: usize = 1;

/// Trimmed lines shorter than this must match exactly, even in a fuzzy pass.
pub const MIN_FUZZY_LINE_CHARS: usize = 3;

/// Fence lengths tried in order; each is tried again with comments stripped.
pub const FENCE_LENGTHS: [usize; 3] = [3, 2, 1];

/// Old views shorter than this use the whole view as both fences.
const MIN_FENCED_LINES: usize = 4;

/// Inclusive line range in the file being patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return a.len().max(b.len());
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// How strictly two lines must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    /// Equal after trimming.
    Exact,
    /// Equal after trimming, or one edit apart when both are long enough.
    Fuzzy,
}

/// Whitespace-insensitive, one-typo-tolerant line comparison.
pub fn lines_match(a: &str, b: &str) -> bool {
    lines_match_with(a, b, LineMatch::Fuzzy)
}

fn lines_match_with(a: &str, b: &str, mode: LineMatch) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    if mode == LineMatch::Exact {
        return false;
    }
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if len_a.min(len_b) < MIN_FUZZY_LINE_CHARS || len_a.abs_diff(len_b) > MAX_LINE_DISTANCE {
        return false;
    }
    levenshtein(a, b) <= MAX_LINE_DISTANCE
}

/// Drop blank lines from both ends.
pub fn strip_blank_edges<'a, 'b>(lines: &'b [&'a str]) -> &'b [&'a str] {
    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map(|idx| idx + 1)
        .unwrap_or(start);
    &lines[start..end]
}

/// Remove a trailing `#` or `//` comment that is not inside a string literal.
pub fn strip_inline_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            prev = Some(ch);
            continue;
        }
        match quote {
            Some(q) => {
                if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '#' => return line[..idx].trim_end(),
                '/' if prev == Some('/') => return line[..idx - 1].trim_end(),
                _ => {}
            },
        }
        prev = Some(ch);
    }
    line
}

/// Begin and end fences of `len` lines over a non-blank old view.
pub fn build_fences<'a, 'b>(old: &'b [&'a str], len: usize) -> (&'b [&'a str], &'b [&'a str]) {
    if old.len() < MIN_FENCED_LINES {
        return (old, old);
    }
    let len = len.clamp(1, old.len());
    (&old[..len], &old[old.len() - len..])
}

/// Every position where `fence` matches `file` line by line.
pub fn fence_positions(file: &[&str], fence: &[&str], mode: LineMatch) -> Vec<usize> {
    if fence.is_empty() || fence.len() > file.len() {
        return Vec::new();
    }
    (0..=file.len() - fence.len())
        .filter(|&start| {
            fence
                .iter()
                .zip(&file[start..])
                .all(|(expected, actual)| lines_match_with(expected, actual, mode))
        })
        .collect()
}

/// How far a candidate span's length may drift from the hunk's old-line count.
fn span_tolerance(expected: usize) -> usize {
    2 + expected / 10
}

enum Rung {
    Found { start: usize, end: usize },
    Ambiguous,
    Mismatch,
    NoMatch,
}

/// Exact lines first; the fuzzy pass runs only when the exact one found nothing.
fn match_rung(file: &[&str], old: &[&str], fence_len: usize) -> Rung {
    match match_rung_with(file, old, fence_len, LineMatch::Exact) {
        Rung::NoMatch => match_rung_with(file, old, fence_len, LineMatch::Fuzzy),
        Rung::Mismatch => match match_rung_with(file, old, fence_len, LineMatch::Fuzzy) {
            found @ Rung::Found { .. } => found,
            _ => Rung::Mismatch,
        },
        rung => rung,
    }
}

fn match_rung_with(file: &[&str], old: &[&str], fence_len: usize, mode: LineMatch) -> Rung {
    if old.len() == 1 {
        let hits = fence_positions(file, old, mode);
        return match hits.as_slice() {
            [] => Rung::NoMatch,
            [only] => Rung::Found {
                start: *only,
                end: *only,
            },
            _ => Rung::Ambiguous,
        };
    }

    let (begin, end) = build_fences(old, fence_len);
    let begins = fence_positions(file, begin, mode);
    let ends = fence_positions(file, end, mode);
    if begins.is_empty() || ends.is_empty() {
        return Rung::NoMatch;
    }

    let expected = old.len();
    let tolerance = span_tolerance(expected);
    let mut paired = false;
    for &b in &begins {
        for &e in ends.iter().filter(|&&e| e >= b) {
            paired = true;
            let span_end = e + end.len();
            if (span_end - b).abs_diff(expected) <= tolerance {
                return Rung::Found {
                    start: b,
                    end: span_end - 1,
                };
            }
        }
    }
    if paired { Rung::Mismatch } else { Rung::NoMatch }
}

fn non_blank<'a>(lines: &[&'a str], strip_comments: bool) -> Vec<(usize, &'a str)> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let text = if strip_comments {
                strip_inline_comment(line)
            } else {
                *line
            };
            (idx, text)
        })
        .filter(|(_, text)| !text.trim().is_empty())
        .collect()
}

/// Locate a hunk's old view inside `file`, walking the fence retry ladder.
///
/// Multi-line hunks take the first valid candidate in file order. A
/// single-line hunk must match exactly one location.
pub fn locate_hunk(file: &[&str], old_view: &[&str]) -> Result<Span, DiffError> {
    let old = strip_blank_edges(old_view);
    if old.is_empty() {
        return Err(DiffError::UnableToParseBlocks);
    }

    let mut single_line = false;
    let mut saw_pairs = false;
    for strip_comments in [false, true] {
        let file_nb = non_blank(file, strip_comments);
        let file_text: Vec<&str> = file_nb.iter().map(|(_, text)| *text).collect();
        let old_text: Vec<&str> = non_blank(old, strip_comments)
            .into_iter()
            .map(|(_, text)| text)
            .collect();
        if old_text.is_empty() {
            continue;
        }
        if !strip_comments {
            single_line = old_text.len() == 1;
        }

        let rungs = if old_text.len() < MIN_FENCED_LINES {
            &FENCE_LENGTHS[..1]
        } else {
            &FENCE_LENGTHS[..]
        };
        for &fence_len in rungs {
            match match_rung(&file_text, &old_text, fence_len) {
                Rung::Found { start, end } => {
                    return Ok(Span {
                        start: file_nb[start].0,
                        end: file_nb[end].0,
                    });
                }
                Rung::Ambiguous => return Err(DiffError::IncorrectContext),
                Rung::Mismatch => saw_pairs = true,
                Rung::NoMatch => {}
            }
        }
    }

    if single_line || saw_pairs {
        Err(DiffError::IncorrectContext)
    } else {
        Err(DiffError::NotEnoughContext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_classic_examples() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn lines_match_ignores_whitespace_and_one_typo() {
        assert!(lines_match("    return x", "return x  "));
        assert!(lines_match("return x", "return y"));
        assert!(lines_match("retrn x", "return x"));
        assert!(!lines_match("return xy", "return z"));
        assert!(!lines_match("a", "b"));
        assert!(!lines_match("}", ")"));
        assert!(!lines_match("ab", "ac"));
    }

    #[test]
    fn strips_comments_outside_strings() {
        assert_eq!(strip_inline_comment("x = 1  # note"), "x = 1");
        assert_eq!(strip_inline_comment("let a = 2; // why"), "let a = 2;");
        assert_eq!(strip_inline_comment("s = \"# not\""), "s = \"# not\"");
        assert_eq!(strip_inline_comment("url = 'http://x'"), "url = 'http://x'");
    }

    #[test]
    fn fences_use_whole_view_when_short() {
        let old = ["a", "b", "c"];
        let (begin, end) = build_fences(&old, 3);
        assert_eq!(begin, &old[..]);
        assert_eq!(end, &old[..]);

        let old = ["a", "b", "c", "d", "e"];
        let (begin, end) = build_fences(&old, 2);
        assert_eq!(begin, &["a", "b"]);
        assert_eq!(end, &["d", "e"]);
    }

    #[test]
    fn fence_positions_enumerates_all_matches() {
        let file = ["x", "a", "b", "x", "a", "b"];
        assert_eq!(fence_positions(&file, &["a", "b"], LineMatch::Exact), vec![1, 4]);
        assert_eq!(fence_positions(&file, &["a", "b"], LineMatch::Fuzzy), vec![1, 4]);
    }

    #[test]
    fn exact_candidate_beats_earlier_fuzzy_one() {
        let file = ["x = 1", "y = 1", "x = 2", "y = 2"];
        let span = locate_hunk(&file, &["x = 2", "y = 2"]).expect("locate");
        assert_eq!(span, Span { start: 2, end: 3 });
    }

    #[test]
    fn short_lines_never_match_their_neighbours() {
        let file = ["a", "b", "c", "d", "e"];
        assert_eq!(
            locate_hunk(&file, &["b", "c", "d"]).expect("locate"),
            Span { start: 1, end: 3 }
        );
        let err = locate_hunk(&["p", "q", "r", "s"], &["b", "c", "d"]).unwrap_err();
        assert_eq!(err, DiffError::NotEnoughContext);
    }

    #[test]
    fn typo_is_tolerated_when_nothing_matches_exactly() {
        let file = ["fn main() {", "    let total = 1;", "}"];
        let span = locate_hunk(&file, &["fn main() {", "    let totl = 1;", "}"]).expect("locate");
        assert_eq!(span, Span { start: 0, end: 2 });
    }

    #[test]
    fn locates_context_ignoring_blank_lines() {
        let file = ["a", "", "b", "c", "", "d", "e"];
        let span = locate_hunk(&file, &["b", "c", "d"]).expect("locate");
        assert_eq!(span, Span { start: 2, end: 5 });
    }

    #[test]
    fn falls_back_to_shorter_fences() {
        let file = [
            "def foo():",
            "    x = 1",
            "    y = 2",
            "    z = 3",
            "    return x",
        ];
        let old = [
            "def foo():",
            "    x = 1",
            "    totally_different = 99",
            "    z = 3",
            "    return x",
        ];
        let span = locate_hunk(&file, &old).expect("locate");
        assert_eq!(span, Span { start: 0, end: 4 });
    }

    #[test]
    fn falls_back_to_comment_stripped_matching() {
        let file = ["a = 1  # first", "b = 2  # second", "c = 3  # third"];
        let old = ["a = 1", "b = 2", "c = 3"];
        let span = locate_hunk(&file, &old).expect("locate");
        assert_eq!(span, Span { start: 0, end: 2 });
    }

    #[test]
    fn single_line_hunk_must_be_unique() {
        let file = ["x = 1", "y = 2", "x = 1"];
        assert_eq!(
            locate_hunk(&file, &["x = 1"]).unwrap_err(),
            DiffError::IncorrectContext
        );
        assert_eq!(
            locate_hunk(&file, &["zzz = 9"]).unwrap_err(),
            DiffError::IncorrectContext
        );
        assert_eq!(
            locate_hunk(&file, &["y = 2"]).expect("unique"),
            Span { start: 1, end: 1 }
        );
    }

    #[test]
    fn missing_context_is_not_enough_context() {
        let file = ["alpha", "beta", "gamma"];
        let err = locate_hunk(&file, &["one thing", "two things", "three things"]).unwrap_err();
        assert_eq!(err, DiffError::NotEnoughContext);
    }

    #[test]
    fn empty_old_view_cannot_be_located() {
        let err = locate_hunk(&["a"], &["", "  "]).unwrap_err();
        assert_eq!(err, DiffError::UnableToParseBlocks);
    }

    #[test]
    fn multi_line_takes_first_candidate() {
        let file = ["start", "mid", "end", "start", "mid", "end"];
        let span = locate_hunk(&file, &["start", "mid", "end"]).expect("locate");
        assert_eq!(span, Span { start: 0, end: 2 });
    }
}
