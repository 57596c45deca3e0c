//! Language model backends.
//!
//! The [`LanguageModel`] trait decouples the agent from the backend. The
//! shipped backend pipes the conversation to an external command, the same
//! way an agent CLI is driven; tests use scripted models.

use std::process::Command;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

const REPLY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model rate limited: {0}")]
    RateLimited(String),
    #[error("model timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("model backend failed: {0}")]
    Backend(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RateLimited(_))
    }
}

pub trait LanguageModel {
    fn name(&self) -> &str;

    fn query(&mut self, messages: &[Message], system_prompt: &str) -> Result<String, ModelError>;
}

/// Exponential backoff for retryable model errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[instrument(skip_all, fields(model = model.name(), max_retries = policy.max_retries))]
pub fn query_with_retry(
    model: &mut dyn LanguageModel,
    messages: &[Message],
    system_prompt: &str,
    policy: RetryPolicy,
) -> Result<String, ModelError> {
    let mut attempt = 0;
    loop {
        match model.query(messages, system_prompt) {
            Ok(reply) => return Ok(reply),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, err = %err, "retrying model query");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Serialize)]
struct ModelInput<'a> {
    model: &'a str,
    system: &'a str,
    messages: &'a [Message],
}

/// Model reached through an external command.
///
/// The command receives `{"model", "system", "messages"}` as JSON on stdin and
/// prints the reply on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    name: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandModel {
    pub fn new(cfg: &ModelConfig, timeout: Duration) -> Self {
        Self {
            name: cfg.name.clone(),
            argv: cfg.command.clone(),
            timeout,
        }
    }
}

impl LanguageModel for CommandModel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(model = %self.name, messages = messages.len()))]
    fn query(&mut self, messages: &[Message], system_prompt: &str) -> Result<String, ModelError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| ModelError::Backend("empty model command".to_string()))?;
        let input = serde_json::to_vec(&ModelInput {
            model: &self.name,
            system: system_prompt,
            messages,
        })
        .map_err(|err| ModelError::Backend(format!("encode request: {err}")))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(cmd, Some(&input), self.timeout, REPLY_LIMIT_BYTES)
            .map_err(|err| ModelError::Backend(format!("{err:#}")))?;
        if output.timed_out {
            return Err(ModelError::Timeout(self.timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            let lowered = stderr.to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("429") {
                return Err(ModelError::RateLimited(stderr.trim().to_string()));
            }
            return Err(ModelError::Backend(format!(
                "exit status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        debug!(bytes = output.stdout.len(), "model replied");
        Ok(output.stdout_text())
    }
}
