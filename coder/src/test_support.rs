//! Test doubles for environments and models.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::types::Message;
use crate::io::environment::{EnvError, Environment, ExecOutput};
use crate::io::model::{LanguageModel, ModelError};
use crate::session::UserInput;

/// Environment whose files live in a map and whose commands are scripted.
///
/// Commands are matched by prefix against the scripted responses, first match
/// wins. Unmatched commands succeed with no output.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    pub files: BTreeMap<String, String>,
    pub executed: Vec<String>,
    responses: Vec<(String, Result<ExecOutput, EnvError>)>,
    pub fail_interrupt: bool,
    pub interrupts: usize,
    pub restarts: usize,
    pub teardowns: usize,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn respond(mut self, prefix: &str, output: &str, exit_code: i32) -> Self {
        self.responses.push((
            prefix.to_string(),
            Ok(ExecOutput {
                output: output.to_string(),
                exit_code,
            }),
        ));
        self
    }

    pub fn fail(mut self, prefix: &str, err: EnvError) -> Self {
        self.responses.push((prefix.to_string(), Err(err)));
        self
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

impl Environment for MemoryEnvironment {
    fn workdir(&self) -> &str {
        "/repo"
    }

    fn execute(&mut self, command: &str, _timeout: Duration) -> Result<ExecOutput, EnvError> {
        self.executed.push(command.to_string());
        self.responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or(Ok(ExecOutput {
                output: String::new(),
                exit_code: 0,
            }))
    }

    fn read_file(&mut self, path: &str, _timeout: Duration) -> Result<String, EnvError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| EnvError::Failed(format!("cannot read {path}: no such file")))
    }

    fn write_file(&mut self, path: &str, content: &str, _timeout: Duration) -> Result<(), EnvError> {
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn delete_file(&mut self, path: &str, _timeout: Duration) -> Result<(), EnvError> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| EnvError::Failed(format!("cannot delete {path}: no such file")))
    }

    fn file_exists(&mut self, path: &str, _timeout: Duration) -> Result<bool, EnvError> {
        Ok(self.files.contains_key(path))
    }

    fn interrupt(&mut self) -> Result<(), EnvError> {
        self.interrupts += 1;
        if self.fail_interrupt {
            return Err(EnvError::Crashed("interrupt failed".to_string()));
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EnvError> {
        self.teardowns += 1;
        Ok(())
    }

    fn restart(&mut self) -> Result<(), EnvError> {
        self.restarts += 1;
        Ok(())
    }
}

/// A [`MemoryEnvironment`] that stays inspectable after a session owns it.
#[derive(Debug, Clone, Default)]
pub struct SharedEnvironment(Rc<RefCell<MemoryEnvironment>>);

impl SharedEnvironment {
    pub fn new(env: MemoryEnvironment) -> Self {
        Self(Rc::new(RefCell::new(env)))
    }

    pub fn borrow(&self) -> Ref<'_, MemoryEnvironment> {
        self.0.borrow()
    }
}

impl Environment for SharedEnvironment {
    fn workdir(&self) -> &str {
        "/repo"
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, EnvError> {
        self.0.borrow_mut().execute(command, timeout)
    }

    fn read_file(&mut self, path: &str, timeout: Duration) -> Result<String, EnvError> {
        self.0.borrow_mut().read_file(path, timeout)
    }

    fn write_file(&mut self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError> {
        self.0.borrow_mut().write_file(path, content, timeout)
    }

    fn delete_file(&mut self, path: &str, timeout: Duration) -> Result<(), EnvError> {
        self.0.borrow_mut().delete_file(path, timeout)
    }

    fn file_exists(&mut self, path: &str, timeout: Duration) -> Result<bool, EnvError> {
        self.0.borrow_mut().file_exists(path, timeout)
    }

    fn interrupt(&mut self) -> Result<(), EnvError> {
        self.0.borrow_mut().interrupt()
    }

    fn teardown(&mut self) -> Result<(), EnvError> {
        self.0.borrow_mut().teardown()
    }

    fn restart(&mut self) -> Result<(), EnvError> {
        self.0.borrow_mut().restart()
    }
}

/// Conversations a [`ScriptedModel`] was queried with, shared with the test.
pub type Transcript = Rc<RefCell<Vec<Vec<Message>>>>;

/// Model that replays canned replies in order.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: VecDeque<Result<String, ModelError>>,
    transcript: Transcript,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(|reply| Ok(reply.into())).collect(),
            transcript: Transcript::default(),
        }
    }

    pub fn then_fail(mut self, err: ModelError) -> Self {
        self.replies.push_back(Err(err));
        self
    }

    pub fn transcript(&self) -> Transcript {
        Rc::clone(&self.transcript)
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn query(&mut self, messages: &[Message], _system_prompt: &str) -> Result<String, ModelError> {
        self.transcript.borrow_mut().push(messages.to_vec());
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Backend("script exhausted".to_string())))
    }
}

/// User that gives canned answers, then goes quiet.
#[derive(Debug, Default)]
pub struct ScriptedUser {
    answers: VecDeque<String>,
    pub questions: Vec<String>,
}

impl ScriptedUser {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            questions: Vec::new(),
        }
    }
}

impl UserInput for ScriptedUser {
    fn ask(&mut self, question: &str) -> Option<String> {
        self.questions.push(question.to_string());
        self.answers.pop_front()
    }
}

/// Reply in the thought/command format the agent expects.
pub fn reply(thought: &str, command: &str) -> String {
    format!("<THOUGHT>\n{thought}\n</THOUGHT>\n<COMMAND>\n{command}\n</COMMAND>\n")
}

/// Temporary directory populated with `files`.
pub fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(full, content).expect("write file");
}
