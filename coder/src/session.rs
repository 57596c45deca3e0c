//! Event-sourced session runner.
//!
//! A session owns an append-only [`EventLog`] and a cursor into it. Each turn
//! asks [`step`] what the event at the cursor calls for, performs that one
//! side effect (query the model, run a tool, ask the user), appends the
//! resulting event, and moves the cursor on. Every decision about what comes
//! next lives in the pure transition function, so a stored log can be checked
//! without re-running anything.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::{error, info, info_span, warn};

use crate::agent::{Agent, AgentTurn};
use crate::core::command::ToolCall;
use crate::core::event::{Event, EventKind, EventLog};
use crate::core::transition::{Next, Phase, step};
use crate::core::types::StopReason;
use crate::io::config::AgentConfig;
use crate::io::environment::{EnvError, Environment};
use crate::io::event_log::EventSink;
use crate::io::git::Git;
use crate::io::model::LanguageModel;
use crate::io::prompt::{PromptEngine, TurnInputs};
use crate::tools::editor::EditorStore;
use crate::tools::{DocFormat, ToolContext, ToolRegistry, ToolSettings};

/// Answers `ask_user` questions.
pub trait UserInput {
    /// `None` means nobody is there to answer.
    fn ask(&mut self, question: &str) -> Option<String>;
}

/// Unattended runs: every question goes unanswered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserInput;

impl UserInput for NoUserInput {
    fn ask(&mut self, _question: &str) -> Option<String> {
        None
    }
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinUserInput;

impl UserInput for StdinUserInput {
    fn ask(&mut self, question: &str) -> Option<String> {
        eprint!("{question}\n> ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub stop: StopReason,
    /// Staged diff of the working tree; only for submitted sessions.
    pub prediction: Option<String>,
    /// Model requests made, including the one that hit the budget.
    pub steps: usize,
}

pub struct Session {
    log: EventLog,
    cursor: usize,
    phase: Phase,
    task: String,
    max_steps: usize,
    env: Box<dyn Environment>,
    agent: Agent,
    registry: ToolRegistry,
    editor: EditorStore,
    prompts: PromptEngine,
    settings: ToolSettings,
    user: Box<dyn UserInput>,
    sink: Option<EventSink>,
    /// Interrupts raised before the task event exists.
    pending: Vec<String>,
}

impl Session {
    /// Build a session with the default tool set and no user on the other end.
    pub fn new(
        task: impl Into<String>,
        cfg: &AgentConfig,
        env: Box<dyn Environment>,
        model: Box<dyn LanguageModel>,
    ) -> Result<Self> {
        let settings = ToolSettings::from_config(cfg);
        let registry = ToolRegistry::with_defaults(&settings);
        Self::with_registry(task, cfg, env, model, registry)
    }

    pub fn with_registry(
        task: impl Into<String>,
        cfg: &AgentConfig,
        env: Box<dyn Environment>,
        model: Box<dyn LanguageModel>,
        registry: ToolRegistry,
    ) -> Result<Self> {
        let prompts = PromptEngine::new()?;
        let settings = ToolSettings::from_config(cfg);
        let system_prompt = prompts
            .render_system(env.workdir(), &registry.documentation(DocFormat::Docstring))
            .context("render system prompt")?;
        let agent = Agent::new(model, system_prompt, settings.model_retry);
        Ok(Self {
            log: EventLog::new(),
            cursor: 0,
            phase: Phase::AwaitingModel,
            task: task.into(),
            max_steps: cfg.max_steps,
            env,
            agent,
            registry,
            editor: EditorStore::new(cfg.editor_page_size),
            prompts,
            settings,
            user: Box::new(NoUserInput),
            sink: None,
            pending: Vec::new(),
        })
    }

    pub fn with_user_input(mut self, user: Box<dyn UserInput>) -> Self {
        self.user = user;
        self
    }

    /// Persist every appended event to `sink` as it happens.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn editor(&self) -> &EditorStore {
        &self.editor
    }

    /// Record an out-of-band message for the model.
    ///
    /// Interrupts never change the phase; their text is merged into the next
    /// model request's observation.
    pub fn interrupt(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        if self.log.is_empty() {
            self.pending.push(message);
            return Ok(());
        }
        self.append(EventKind::Interrupt { message })
    }

    /// Drive the session until a stop event is processed.
    pub fn run(&mut self) -> Result<SessionOutcome> {
        let _span = info_span!("session", max_steps = self.max_steps).entered();
        if self.log.is_empty() {
            self.append(EventKind::Task {
                text: self.task.clone(),
            })?;
            for message in std::mem::take(&mut self.pending) {
                self.append(EventKind::Interrupt { message })?;
            }
            self.setup_tools();
        }

        loop {
            let next = step(self.log.events(), self.cursor, self.max_steps);
            match next {
                Next::Halt => break,
                Next::Absorb => {}
                Next::Emit(kinds) => {
                    for kind in kinds {
                        self.append(kind)?;
                    }
                }
                Next::QueryModel { observation } => {
                    let kind = self.query_model(&observation);
                    self.append(kind)?;
                }
                Next::RunTool(call) => {
                    let kind = self.run_tool(&call);
                    self.append(kind)?;
                }
                Next::AskUser { question } => {
                    let kind = match self.user.ask(&question) {
                        Some(text) => EventKind::UserResponse { text },
                        None => EventKind::stop(StopReason::NoUserInput),
                    };
                    self.append(kind)?;
                }
            }
            self.cursor += 1;
        }

        let stop = self
            .log
            .events()
            .iter()
            .rev()
            .find_map(|event| match &event.kind {
                EventKind::Stop { reason } => Some(reason.clone()),
                _ => None,
            })
            .unwrap_or(StopReason::EarlyExit {
                error: "session halted without a stop event".to_string(),
            });
        let prediction = match stop {
            StopReason::Submitted => self.collect_prediction(),
            _ => None,
        };
        self.cleanup_tools();
        let steps = self
            .log
            .events()
            .iter()
            .filter(|event| matches!(event.kind, EventKind::ModelRequest { .. }))
            .count();
        info!(stop = stop.label(), steps, "session finished");
        Ok(SessionOutcome {
            stop,
            prediction,
            steps,
        })
    }

    fn append(&mut self, kind: EventKind) -> Result<()> {
        if let Some(phase) = Phase::after(&kind) {
            self.phase = phase;
        }
        if let EventKind::Task { text } = &kind {
            self.task = text.clone();
        }
        let event = Event::new(kind);
        if let Some(sink) = self.sink.as_mut() {
            sink.append(&event)?;
        }
        self.log.append(event);
        Ok(())
    }

    fn query_model(&mut self, observation: &str) -> EventKind {
        let input = TurnInputs {
            task: &self.task,
            buffers: self.editor.render_all(),
            observation,
        };
        match self.agent.query(&self.prompts, &input) {
            Ok(AgentTurn::Action {
                thought,
                action,
                output,
            }) => EventKind::ModelResponse {
                thought,
                action,
                output,
            },
            Ok(AgentTurn::Malformed { observation }) => EventKind::ModelRequest { observation },
            Err(err) => {
                error!(err = %err, "model query failed");
                EventKind::stop(StopReason::EarlyExit {
                    error: err.to_string(),
                })
            }
        }
    }

    fn run_tool(&mut self, call: &ToolCall) -> EventKind {
        let mut ctx = ToolContext {
            env: self.env.as_mut(),
            model: self.agent.model_mut(),
            editor: &mut self.editor,
            prompts: &self.prompts,
            settings: &self.settings,
        };
        match self.registry.dispatch(&mut ctx, call) {
            Ok(output) => EventKind::ToolResponse { output },
            Err(EnvError::Timeout(limit)) => match self.env.interrupt() {
                Ok(()) => {
                    warn!(tool = %call.name, "command timed out; interrupted");
                    EventKind::ToolResponse {
                        output: format!(
                            "The command timed out after {}s and was interrupted. \
                             Run something faster or narrower.",
                            limit.as_secs()
                        ),
                    }
                }
                Err(err) => self.abandon_environment(err),
            },
            Err(err) => self.abandon_environment(err),
        }
    }

    /// Tear the environment down after a crash and end the session.
    fn abandon_environment(&mut self, err: EnvError) -> EventKind {
        error!(err = %err, "environment failed");
        if let Err(teardown) = self.env.teardown() {
            warn!(err = %teardown, "teardown failed");
        }
        if let Err(restart) = self.env.restart() {
            warn!(err = %restart, "restart failed");
        }
        EventKind::stop(StopReason::EarlyExit {
            error: err.to_string(),
        })
    }

    fn collect_prediction(&mut self) -> Option<String> {
        let mut git = Git::new(self.env.as_mut(), self.settings.command_timeout);
        match git.staged_diff() {
            Ok(diff) => Some(diff),
            Err(err) => {
                warn!(err = %err, "cannot collect prediction");
                None
            }
        }
    }

    fn setup_tools(&mut self) {
        let mut ctx = ToolContext {
            env: self.env.as_mut(),
            model: self.agent.model_mut(),
            editor: &mut self.editor,
            prompts: &self.prompts,
            settings: &self.settings,
        };
        if let Err(err) = self.registry.setup_all(&mut ctx) {
            warn!(err = %err, "tool setup failed");
        }
    }

    fn cleanup_tools(&mut self) {
        let mut ctx = ToolContext {
            env: self.env.as_mut(),
            model: self.agent.model_mut(),
            editor: &mut self.editor,
            prompts: &self.prompts,
            settings: &self.settings,
        };
        self.registry.cleanup_all(&mut ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryEnvironment, ScriptedModel, reply};

    fn config(max_steps: usize) -> AgentConfig {
        let mut cfg = AgentConfig {
            max_steps,
            ..AgentConfig::default()
        };
        cfg.model.max_retries = 0;
        cfg
    }

    fn kinds(session: &Session) -> Vec<&'static str> {
        session.log().events().iter().map(|e| e.kind.name()).collect()
    }

    #[test]
    fn submit_first_stops_without_tools() {
        let model = ScriptedModel::new([reply("done already", "submit")]);
        let mut session = Session::new(
            "nothing to do",
            &config(5),
            Box::new(MemoryEnvironment::new()),
            Box::new(model),
        )
        .expect("session");
        let outcome = session.run().expect("run");
        assert_eq!(outcome.stop, StopReason::Submitted);
        assert_eq!(outcome.prediction.as_deref(), Some(""));
        assert_eq!(
            kinds(&session),
            vec!["task", "model_request", "model_response", "tool_request", "stop"]
        );
        assert_eq!(session.phase(), Phase::Stopped);
    }

    #[test]
    fn step_budget_stops_the_session() {
        let model = ScriptedModel::new([reply("a", "no_op"), reply("b", "no_op")]);
        let mut session = Session::new(
            "loop",
            &config(1),
            Box::new(MemoryEnvironment::new()),
            Box::new(model),
        )
        .expect("session");
        let outcome = session.run().expect("run");
        assert_eq!(outcome.stop, StopReason::StepBudgetExhausted);
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.prediction, None);
    }

    #[test]
    fn unanswered_question_stops_with_no_user_input() {
        let model = ScriptedModel::new([reply("unsure", "ask_user which file?")]);
        let mut session = Session::new(
            "vague",
            &config(5),
            Box::new(MemoryEnvironment::new()),
            Box::new(model),
        )
        .expect("session");
        let outcome = session.run().expect("run");
        assert_eq!(outcome.stop, StopReason::NoUserInput);
        assert_eq!(
            kinds(&session)[3..],
            ["tool_request", "user_request", "stop"]
        );
    }

    #[test]
    fn model_failure_is_an_early_exit() {
        let model = ScriptedModel::default();
        let mut session = Session::new(
            "anything",
            &config(5),
            Box::new(MemoryEnvironment::new()),
            Box::new(model),
        )
        .expect("session");
        let outcome = session.run().expect("run");
        assert!(matches!(outcome.stop, StopReason::EarlyExit { ref error } if error.contains("script exhausted")));
    }

    #[test]
    fn interrupts_are_merged_into_the_next_observation() {
        let model = ScriptedModel::new([reply("ok", "exit")]);
        let transcript = model.transcript();
        let mut session = Session::new(
            "task",
            &config(5),
            Box::new(MemoryEnvironment::new()),
            Box::new(model),
        )
        .expect("session");
        session.interrupt("heads up: tests are slow").expect("interrupt");
        let outcome = session.run().expect("run");
        assert_eq!(outcome.stop, StopReason::Exited);
        let calls = transcript.borrow();
        assert!(calls[0][0].content.contains("heads up: tests are slow"));
    }
}
