//! Pure transition rules of the session state machine.
//!
//! `step` looks at the event under the cursor (and, for observation merging
//! and the step budget, at the log before it) and says what happens next.
//! Anything needing the outside world (model, tools, user) is returned as a
//! request for the session to fulfil; everything else is returned as the
//! successor events to append. Given the same log, `step` always returns the
//! same answer.

use thiserror::Error;

use crate::core::command::{ToolCall, parse_command};
use crate::core::event::{Event, EventKind};
use crate::core::types::StopReason;

pub const SUBMIT: &str = "submit";
pub const EXIT: &str = "exit";
pub const STOP: &str = "stop";
pub const SET_TASK: &str = "set_task";
pub const ASK_USER: &str = "ask_user";

/// Commands the session handles itself instead of dispatching to a tool.
pub const CONTROL_COMMANDS: [&str; 5] = [SUBMIT, EXIT, STOP, SET_TASK, ASK_USER];

pub fn is_control_command(name: &str) -> bool {
    CONTROL_COMMANDS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingModel,
    AwaitingTool,
    AwaitingUser,
    Stopped,
}

impl Phase {
    /// Phase entered once `kind` is appended. Interrupts leave it unchanged.
    pub fn after(kind: &EventKind) -> Option<Phase> {
        match kind {
            EventKind::Task { .. } | EventKind::ModelRequest { .. } => Some(Phase::AwaitingModel),
            EventKind::ToolResponse { .. } => Some(Phase::AwaitingModel),
            EventKind::ModelResponse { .. }
            | EventKind::ToolRequest { .. }
            | EventKind::UserResponse { .. } => Some(Phase::AwaitingTool),
            EventKind::UserRequest { .. } => Some(Phase::AwaitingUser),
            EventKind::Stop { .. } => Some(Phase::Stopped),
            EventKind::Interrupt { .. } => None,
        }
    }
}

/// What the session must do for the event under the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Append these events.
    Emit(Vec<EventKind>),
    /// Query the model; append `ModelResponse`, or `ModelRequest` on a format error.
    QueryModel { observation: String },
    /// Dispatch to the tool registry; append `ToolResponse`.
    RunTool(ToolCall),
    /// Wait for a human; append `UserResponse`, or `Stop` when nobody answers.
    AskUser { question: String },
    /// Nothing to append; the event is folded into a later one.
    Absorb,
    /// Terminal.
    Halt,
}

pub fn step(log: &[Event], cursor: usize, max_steps: usize) -> Next {
    let Some(event) = log.get(cursor) else {
        return Next::Halt;
    };
    match &event.kind {
        EventKind::Task { .. } => Next::Emit(vec![EventKind::ModelRequest {
            observation: String::new(),
        }]),
        EventKind::ModelRequest { observation } => {
            if model_requests_through(log, cursor) > max_steps {
                return Next::Emit(vec![EventKind::stop(StopReason::StepBudgetExhausted)]);
            }
            Next::QueryModel {
                observation: merge_interrupts(log, cursor, observation),
            }
        }
        EventKind::ModelResponse { action, .. } => match parse_command(action) {
            Ok(call) => Next::Emit(vec![EventKind::ToolRequest { call }]),
            Err(err) => Next::Emit(vec![EventKind::ToolResponse {
                output: format!("Could not parse command `{action}`: {err}"),
            }]),
        },
        EventKind::ToolRequest { call } => match call.name.as_str() {
            SUBMIT => Next::Emit(vec![EventKind::stop(StopReason::Submitted)]),
            EXIT | STOP => Next::Emit(vec![EventKind::stop(StopReason::Exited)]),
            SET_TASK => Next::Emit(vec![EventKind::Task {
                text: call.joined_args(),
            }]),
            ASK_USER => Next::Emit(vec![EventKind::UserRequest {
                question: call.joined_args(),
            }]),
            _ => Next::RunTool(call.clone()),
        },
        EventKind::ToolResponse { output } => Next::Emit(vec![EventKind::ModelRequest {
            observation: output.clone(),
        }]),
        EventKind::UserRequest { question } => Next::AskUser {
            question: question.clone(),
        },
        EventKind::UserResponse { text } => Next::Emit(vec![EventKind::ToolResponse {
            output: text.clone(),
        }]),
        EventKind::Interrupt { .. } => Next::Absorb,
        EventKind::Stop { .. } => Next::Halt,
    }
}

fn model_requests_through(log: &[Event], cursor: usize) -> usize {
    log[..=cursor]
        .iter()
        .filter(|event| matches!(event.kind, EventKind::ModelRequest { .. }))
        .count()
}

/// Append interrupt messages logged since the previous model request.
fn merge_interrupts(log: &[Event], cursor: usize, observation: &str) -> String {
    let since = log[..cursor]
        .iter()
        .rposition(|event| matches!(event.kind, EventKind::ModelRequest { .. }))
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let mut parts: Vec<&str> = Vec::new();
    if !observation.is_empty() {
        parts.push(observation);
    }
    for event in &log[since..cursor] {
        if let EventKind::Interrupt { message } = &event.kind {
            parts.push(message);
        }
    }
    parts.join("\n\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogViolation {
    #[error("event log is empty")]
    Empty,
    #[error("event log must start with a task, found {found}")]
    MissingTask { found: &'static str },
    #[error("event {index} ({found}) cannot follow event {parent} ({parent_kind})")]
    UnexpectedSuccessor {
        parent: usize,
        parent_kind: &'static str,
        index: usize,
        found: &'static str,
    },
    #[error("event {index} ({found}) follows the stop event")]
    EventAfterStop { index: usize, found: &'static str },
    #[error("event log ends at event {index} ({kind}) without a stop event")]
    Incomplete { index: usize, kind: &'static str },
}

/// Check that every event in a complete log follows from its predecessor.
///
/// Interrupts are skipped when pairing events with their successors since
/// they are folded into the next model request rather than answered.
pub fn verify_log(log: &[Event], max_steps: usize) -> Result<(), LogViolation> {
    let first = log.first().ok_or(LogViolation::Empty)?;
    if !matches!(first.kind, EventKind::Task { .. }) {
        return Err(LogViolation::MissingTask {
            found: first.kind.name(),
        });
    }

    let chain: Vec<usize> = (0..log.len())
        .filter(|&idx| !matches!(log[idx].kind, EventKind::Interrupt { .. }))
        .collect();
    for (pos, &idx) in chain.iter().enumerate() {
        let kind = &log[idx].kind;
        let successor = chain.get(pos + 1).copied();
        if let EventKind::Stop { .. } = kind {
            if let Some(next) = successor {
                return Err(LogViolation::EventAfterStop {
                    index: next,
                    found: log[next].kind.name(),
                });
            }
            return Ok(());
        }
        let Some(next) = successor else {
            return Err(LogViolation::Incomplete {
                index: idx,
                kind: kind.name(),
            });
        };
        if !allowed_successor(&step(log, idx, max_steps), &log[next].kind) {
            return Err(LogViolation::UnexpectedSuccessor {
                parent: idx,
                parent_kind: kind.name(),
                index: next,
                found: log[next].kind.name(),
            });
        }
    }
    Ok(())
}

fn allowed_successor(next: &Next, found: &EventKind) -> bool {
    match next {
        Next::Emit(kinds) => kinds.first() == Some(found),
        Next::QueryModel { .. } => matches!(
            found,
            EventKind::ModelResponse { .. }
                | EventKind::ModelRequest { .. }
                | EventKind::Stop {
                    reason: StopReason::EarlyExit { .. }
                }
        ),
        Next::RunTool(_) => matches!(
            found,
            EventKind::ToolResponse { .. }
                | EventKind::Stop {
                    reason: StopReason::EarlyExit { .. }
                }
        ),
        Next::AskUser { .. } => matches!(
            found,
            EventKind::UserResponse { .. }
                | EventKind::Stop {
                    reason: StopReason::NoUserInput
                }
        ),
        Next::Absorb | Next::Halt => false,
    }
}
