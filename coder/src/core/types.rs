//! Shared deterministic types for the agent core.
//!
//! These types cross the boundary between the pure transition logic and the
//! side-effecting collaborators, and are serialized into the event log.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the model conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// The model ran `submit`; a prediction is produced.
    Submitted,
    /// The model ran `exit` or `stop`.
    Exited,
    /// `ask_user` had nobody to answer.
    NoUserInput,
    StepBudgetExhausted,
    /// Environment crash, unrecoverable timeout, or model failure.
    EarlyExit { error: String },
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Submitted => "submitted",
            StopReason::Exited => "exited",
            StopReason::NoUserInput => "no_user_input",
            StopReason::StepBudgetExhausted => "step_budget_exhausted",
            StopReason::EarlyExit { .. } => "early_exit",
        }
    }

    /// Whether the session ended on a graceful control path.
    pub fn is_graceful(&self) -> bool {
        !matches!(self, StopReason::EarlyExit { .. })
    }
}
