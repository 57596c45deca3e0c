//! The model-facing half of a session.
//!
//! The agent keeps the conversation history, renders each turn from the task,
//! the open editor buffers, and the latest observation, and turns the raw
//! reply into a thought and an action.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::reply::parse_reply;
use crate::core::types::Message;
use crate::io::model::{LanguageModel, ModelError, RetryPolicy, query_with_retry};
use crate::io::prompt::{PromptEngine, TurnInputs};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// What one model turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTurn {
    Action {
        thought: String,
        action: String,
        /// The reply exactly as the model wrote it.
        output: String,
    },
    /// The reply broke the format; `observation` tells the model how.
    Malformed { observation: String },
}

pub struct Agent {
    model: Box<dyn LanguageModel>,
    system_prompt: String,
    history: Vec<Message>,
    retry: RetryPolicy,
}

impl Agent {
    pub fn new(model: Box<dyn LanguageModel>, system_prompt: String, retry: RetryPolicy) -> Self {
        Self {
            model,
            system_prompt,
            history: Vec::new(),
            retry,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// The backing model, lent to tools that query it themselves.
    pub fn model_mut(&mut self) -> &mut dyn LanguageModel {
        self.model.as_mut()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Run one turn. Malformed replies stay in the history so the model sees
    /// what it wrote next to the correction.
    #[instrument(skip_all, fields(model = self.model.name(), turn = self.history.len() / 2))]
    pub fn query(
        &mut self,
        prompts: &PromptEngine,
        input: &TurnInputs<'_>,
    ) -> Result<AgentTurn, AgentError> {
        let prompt = prompts
            .render_turn(input)
            .map_err(|err| AgentError::Prompt(format!("{err:#}")))?;
        self.history.push(Message::user(prompt));

        let output = match query_with_retry(
            self.model.as_mut(),
            &self.history,
            &self.system_prompt,
            self.retry,
        ) {
            Ok(output) => output,
            Err(err) => {
                // Keep user/assistant turns alternating for the next query.
                self.history.pop();
                return Err(err.into());
            }
        };
        self.history.push(Message::assistant(output.clone()));

        match parse_reply(&output) {
            Ok(reply) => {
                debug!(action = %reply.action, "model chose action");
                Ok(AgentTurn::Action {
                    thought: reply.thought,
                    action: reply.action,
                    output,
                })
            }
            Err(err) => {
                debug!(err = %err, "malformed reply");
                Ok(AgentTurn::Malformed {
                    observation: err.observation(),
                })
            }
        }
    }
}
