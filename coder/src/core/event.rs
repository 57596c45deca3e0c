//! Typed events and the append-only event log.

use serde::{Deserialize, Serialize};

use crate::core::command::ToolCall;
use crate::core::types::StopReason;

pub const USER: &str = "user";
pub const SESSION: &str = "session";
pub const AGENT: &str = "agent";
pub const MODEL: &str = "model";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Task {
        text: String,
    },
    ModelRequest {
        observation: String,
    },
    ModelResponse {
        thought: String,
        action: String,
        output: String,
    },
    ToolRequest {
        call: ToolCall,
    },
    ToolResponse {
        output: String,
    },
    UserRequest {
        question: String,
    },
    UserResponse {
        text: String,
    },
    Interrupt {
        message: String,
    },
    Stop {
        reason: StopReason,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Task { .. } => "task",
            EventKind::ModelRequest { .. } => "model_request",
            EventKind::ModelResponse { .. } => "model_response",
            EventKind::ToolRequest { .. } => "tool_request",
            EventKind::ToolResponse { .. } => "tool_response",
            EventKind::UserRequest { .. } => "user_request",
            EventKind::UserResponse { .. } => "user_response",
            EventKind::Interrupt { .. } => "interrupt",
            EventKind::Stop { .. } => "stop",
        }
    }

    pub fn stop(reason: StopReason) -> Self {
        EventKind::Stop { reason }
    }

    fn endpoints(&self) -> (String, String) {
        let (producer, consumer) = match self {
            EventKind::Task { .. } => (USER, AGENT),
            EventKind::ModelRequest { .. } => (SESSION, MODEL),
            EventKind::ModelResponse { .. } => (MODEL, SESSION),
            EventKind::ToolRequest { call } => return (SESSION.to_string(), call.name.clone()),
            EventKind::ToolResponse { .. } => ("tool", SESSION),
            EventKind::UserRequest { .. } => (SESSION, USER),
            EventKind::UserResponse { .. } => (USER, SESSION),
            EventKind::Interrupt { .. } => (USER, SESSION),
            EventKind::Stop { .. } => (SESSION, SESSION),
        };
        (producer.to_string(), consumer.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub producer: String,
    pub consumer: String,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        let (producer, consumer) = kind.endpoints();
        Self {
            kind,
            producer,
            consumer,
        }
    }
}

/// Ordered, append-only record of a session.
///
/// There is no way to edit or remove an event once appended; progress is
/// tracked by a cursor held elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the new event's index.
    pub fn append(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    pub fn get(&self, idx: usize) -> Option<&Event> {
        self.events.get(idx)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl From<Vec<Event>> for EventLog {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}
