//! Lint findings and the "newly introduced" delta shown after an edit.
//!
//! Findings are compared by structure (code and message), not by their full
//! rendered line, so findings that only moved because lines were inserted
//! above them do not count as new.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static FINDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintFinding {
    pub code: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl LintFinding {
    fn identity(&self) -> (&str, &str) {
        (&self.code, &self.message)
    }
}

/// Parse `path:line:col: CODE message` lines; anything else is ignored.
pub fn parse_findings(output: &str) -> Vec<LintFinding> {
    output
        .lines()
        .filter_map(|line| {
            let caps = FINDING_RE.captures(line.trim_end())?;
            Some(LintFinding {
                code: caps["code"].to_string(),
                message: caps["msg"].trim().to_string(),
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
            })
        })
        .collect()
}

/// Findings in `after` not present in `before` (multiset difference).
pub fn new_findings(before: &[LintFinding], after: &[LintFinding]) -> Vec<LintFinding> {
    let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for finding in before {
        *seen.entry(finding.identity()).or_default() += 1;
    }
    after
        .iter()
        .filter(|finding| match seen.get_mut(&finding.identity()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .cloned()
        .collect()
}

pub fn render_findings(findings: &[LintFinding]) -> String {
    findings
        .iter()
        .map(|f| format!("line {}, col {}: {} {}", f.line, f.column, f.code, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}
