//! Shell and filesystem access for tools.
//!
//! An `Environment` runs one stateless shell command at a time in a working
//! directory. File helpers have default implementations on top of `execute`
//! so a new backend only needs to provide command execution.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Cap on captured bytes per stream; tools truncate further for the model.
const CAPTURE_LIMIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The environment itself is gone (broken pipe, dead container, no exit status).
    #[error("environment crashed: {0}")]
    Crashed(String),
    /// An operation failed but the environment is healthy.
    #[error("{0}")]
    Failed(String),
}

impl EnvError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EnvError::Crashed(_))
    }
}

/// Single-quote `value` for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Heredoc terminator that no line of `content` equals.
pub fn heredoc_marker(content: &str) -> String {
    let mut marker = String::from("CODER_EOF");
    while content.lines().any(|line| line == marker) {
        marker.push('_');
    }
    marker
}

pub trait Environment {
    /// Directory commands run in, as the environment sees it.
    fn workdir(&self) -> &str;

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, EnvError>;

    fn read_file(&mut self, path: &str, timeout: Duration) -> Result<String, EnvError> {
        let out = self.execute(&format!("cat {}", shell_quote(path)), timeout)?;
        if !out.success() {
            return Err(EnvError::Failed(format!("cannot read {path}: {}", out.output.trim())));
        }
        Ok(out.output)
    }

    fn write_file(&mut self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError> {
        // The heredoc always adds a final newline; trim it back off.
        let marker = heredoc_marker(content);
        let command = format!(
            "mkdir -p \"$(dirname {quoted})\" && cat > {quoted} <<'{marker}'\n{content}\n{marker}\ntruncate -s -1 {quoted}",
            quoted = shell_quote(path),
        );
        let out = self.execute(&command, timeout)?;
        if !out.success() {
            return Err(EnvError::Failed(format!("cannot write {path}: {}", out.output.trim())));
        }
        Ok(())
    }

    fn delete_file(&mut self, path: &str, timeout: Duration) -> Result<(), EnvError> {
        let out = self.execute(&format!("rm {}", shell_quote(path)), timeout)?;
        if !out.success() {
            return Err(EnvError::Failed(format!("cannot delete {path}: {}", out.output.trim())));
        }
        Ok(())
    }

    fn file_exists(&mut self, path: &str, timeout: Duration) -> Result<bool, EnvError> {
        let out = self.execute(&format!("test -f {}", shell_quote(path)), timeout)?;
        Ok(out.success())
    }

    /// Stop whatever is running after a timeout.
    fn interrupt(&mut self) -> Result<(), EnvError> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EnvError> {
        Ok(())
    }

    fn restart(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}

/// Runs commands with `sh -c` on the host, inside a root directory.
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    root: PathBuf,
    workdir: String,
}

impl LocalEnvironment {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            workdir: root.display().to_string(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Environment for LocalEnvironment {
    fn workdir(&self) -> &str {
        &self.workdir
    }

    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, EnvError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);
        let output = run_command_with_timeout(cmd, None, timeout, CAPTURE_LIMIT_BYTES)
            .map_err(|err| EnvError::Crashed(format!("{err:#}")))?;
        if output.timed_out {
            return Err(EnvError::Timeout(timeout));
        }
        let exit_code = output
            .status
            .code()
            .ok_or_else(|| EnvError::Crashed("command terminated by signal".to_string()))?;
        debug!(exit_code, "local command finished");
        Ok(ExecOutput {
            output: output.combined_text(),
            exit_code,
        })
    }

    fn read_file(&mut self, path: &str, _timeout: Duration) -> Result<String, EnvError> {
        fs::read_to_string(self.resolve(path))
            .map_err(|err| EnvError::Failed(format!("cannot read {path}: {err}")))
    }

    fn write_file(&mut self, path: &str, content: &str, _timeout: Duration) -> Result<(), EnvError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| EnvError::Failed(format!("cannot create {}: {err}", parent.display())))?;
        }
        fs::write(&full, content).map_err(|err| EnvError::Failed(format!("cannot write {path}: {err}")))
    }

    fn delete_file(&mut self, path: &str, _timeout: Duration) -> Result<(), EnvError> {
        fs::remove_file(self.resolve(path))
            .map_err(|err| EnvError::Failed(format!("cannot delete {path}: {err}")))
    }

    fn file_exists(&mut self, path: &str, _timeout: Duration) -> Result<bool, EnvError> {
        Ok(self.resolve(path).is_file())
    }
}

/// Runs commands in an existing container through `docker exec`.
#[derive(Debug, Clone)]
pub struct DockerEnvironment {
    container: String,
    workdir: String,
}

impl DockerEnvironment {
    pub fn new(container: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            workdir: workdir.into(),
        }
    }

    fn docker(&self, args: &[&str], stdin: Option<&[u8]>, timeout: Duration) -> Result<ExecOutput, EnvError> {
        let mut cmd = Command::new("docker");
        cmd.args(args);
        let output = run_command_with_timeout(cmd, stdin, timeout, CAPTURE_LIMIT_BYTES)
            .map_err(|err| EnvError::Crashed(format!("{err:#}")))?;
        if output.timed_out {
            return Err(EnvError::Timeout(timeout));
        }
        let exit_code = output
            .status
            .code()
            .ok_or_else(|| EnvError::Crashed("docker terminated by signal".to_string()))?;
        Ok(ExecOutput {
            output: output.combined_text(),
            exit_code,
        })
    }
}

impl Environment for DockerEnvironment {
    fn workdir(&self) -> &str {
        &self.workdir
    }

    #[instrument(skip_all, fields(container = %self.container, timeout_secs = timeout.as_secs()))]
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, EnvError> {
        let out = self.docker(
            &["exec", "-w", &self.workdir, &self.container, "sh", "-c", command],
            None,
            timeout,
        )?;
        // 125-127 come from docker itself, not from the command.
        if out.exit_code == 125 && out.output.contains("Error response from daemon") {
            return Err(EnvError::Crashed(out.output.trim().to_string()));
        }
        Ok(out)
    }

    fn write_file(&mut self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError> {
        let script = format!(
            "mkdir -p \"$(dirname {quoted})\" && cat > {quoted}",
            quoted = shell_quote(path)
        );
        let out = self.docker(
            &["exec", "-i", "-w", &self.workdir, &self.container, "sh", "-c", &script],
            Some(content.as_bytes()),
            timeout,
        )?;
        if !out.success() {
            return Err(EnvError::Failed(format!("cannot write {path}: {}", out.output.trim())));
        }
        Ok(())
    }

    fn interrupt(&mut self) -> Result<(), EnvError> {
        warn!(container = %self.container, "interrupting container processes");
        let out = self.docker(
            &["exec", &self.container, "sh", "-c", "pkill -INT -f -- '^sh -c' || true"],
            None,
            Duration::from_secs(10),
        )?;
        if !out.success() {
            return Err(EnvError::Failed(out.output));
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EnvError> {
        self.docker(&["stop", &self.container], None, Duration::from_secs(60))
            .map(|_| ())
    }

    fn restart(&mut self) -> Result<(), EnvError> {
        let out = self.docker(&["start", &self.container], None, Duration::from_secs(60))?;
        if !out.success() {
            return Err(EnvError::Crashed(out.output.trim().to_string()));
        }
        Ok(())
    }
}
