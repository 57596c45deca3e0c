//! Git adapter for producing predictions.
//!
//! Only "stage everything and diff" is needed, and it has to work inside a
//! container too, so git runs through the session's [`Environment`] rather
//! than as a host subprocess.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::io::environment::{EnvError, Environment};

/// Agent bookkeeping that must never end up in a prediction.
const EXCLUDED_PATHSPEC: &str = "':(exclude).coder'";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Wrapper for running git in an environment's working directory.
pub struct Git<'a> {
    env: &'a mut dyn Environment,
    timeout: Duration,
}

impl<'a> Git<'a> {
    pub fn new(env: &'a mut dyn Environment, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&mut self) -> Result<(), EnvError> {
        self.run_checked(&format!("add -A -- . {EXCLUDED_PATHSPEC}"))?;
        Ok(())
    }

    pub fn status_porcelain(&mut self) -> Result<Vec<StatusEntry>, EnvError> {
        let out = self.run_checked("status --porcelain=v1 -uall")?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// Stage everything and return the cached diff.
    #[instrument(skip_all)]
    pub fn staged_diff(&mut self) -> Result<String, EnvError> {
        self.add_all()?;
        let diff = self.run_checked("diff --cached --no-color")?;
        debug!(bytes = diff.len(), "staged diff");
        Ok(diff)
    }

    fn run_checked(&mut self, args: &str) -> Result<String, EnvError> {
        let out = self.env.execute(&format!("git {args}"), self.timeout)?;
        if !out.success() {
            return Err(EnvError::Failed(format!(
                "git {args} failed: {}",
                out.output.trim()
            )));
        }
        Ok(out.output)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry, EnvError> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(EnvError::Failed(format!("unexpected porcelain line: '{line}'")));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::environment::LocalEnvironment;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn staged_diff_includes_new_files_but_not_run_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = LocalEnvironment::new(temp.path());
        env.execute(
            "git init -q && git config user.email t@example.com && git config user.name t",
            TIMEOUT,
        )
        .expect("init");
        std::fs::write(temp.path().join("a.txt"), "hello\n").expect("write");
        std::fs::create_dir_all(temp.path().join(".coder/runs")).expect("mkdir");
        std::fs::write(temp.path().join(".coder/runs/events.jsonl"), "{}\n").expect("write");

        let mut git = Git::new(&mut env, TIMEOUT);
        let diff = git.staged_diff().expect("diff");
        assert!(diff.contains("+++ b/a.txt"));
        assert!(diff.contains("+hello"));
        assert!(!diff.contains(".coder"));
        let status = git.status_porcelain().expect("status");
        assert!(status.iter().any(|entry| entry.path == "a.txt"));
    }
}
