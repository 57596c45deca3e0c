//! Session-level scenarios driven by scripted models.
//!
//! Each test runs a full session to its stop event and then checks the
//! resulting event log, environment state, and that the log replays cleanly
//! through the transition function.

use std::fs;
use std::time::Duration;

use coder::core::event::{Event, EventKind};
use coder::core::transition::{LogViolation, verify_log};
use coder::core::types::StopReason;
use coder::io::config::AgentConfig;
use coder::io::environment::{EnvError, LocalEnvironment};
use coder::io::event_log::{EventSink, load_event_log};
use coder::session::Session;
use coder::test_support::{
    MemoryEnvironment, ScriptedModel, ScriptedUser, SharedEnvironment, reply, workspace,
};

const LETTERS: &str = "a\nb\nc\nd\ne\n";
const PREDICTION: &str = "diff --git a/letters.txt b/letters.txt\n";

fn config(max_steps: usize) -> AgentConfig {
    let mut cfg = AgentConfig {
        max_steps,
        ..AgentConfig::default()
    };
    cfg.model.max_retries = 0;
    cfg
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|event| event.kind.name()).collect()
}

fn tool_outputs(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match &event.kind {
            EventKind::ToolResponse { output } => Some(output.as_str()),
            _ => None,
        })
        .collect()
}

const LETTERS_EDIT: &str = "edit_file <<<
--- a/letters.txt
+++ b/letters.txt
@@ -2,4 +2,4 @@
 b
-c
+c2
 d
 e
>>>";

/// Open, edit, submit: the canonical happy path.
///
/// The file `a..e` becomes `a, b, c2, d, e`, the edit shows up in the
/// editor on the next turn, and submitting collects the staged diff.
#[test]
fn edit_then_submit_produces_prediction() {
    let env = SharedEnvironment::new(
        MemoryEnvironment::new()
            .with_file("letters.txt", LETTERS)
            .respond("git diff", PREDICTION, 0),
    );
    let model = ScriptedModel::new([
        reply("look at the file", "open_file letters.txt"),
        reply("replace c", LETTERS_EDIT),
        reply("done", "submit"),
    ]);
    let transcript = model.transcript();
    let mut session = Session::new("change c to c2", &config(10), Box::new(env.clone()), Box::new(model))
        .expect("session");

    let outcome = session.run().expect("run");
    assert_eq!(outcome.stop, StopReason::Submitted);
    assert_eq!(outcome.prediction.as_deref(), Some(PREDICTION));
    assert_eq!(outcome.steps, 3);
    assert_eq!(env.borrow().file("letters.txt"), Some("a\nb\nc2\nd\ne\n"));

    let events = session.log().events();
    assert_eq!(
        kinds(events),
        vec![
            "task",
            "model_request",
            "model_response",
            "tool_request",
            "tool_response",
            "model_request",
            "model_response",
            "tool_request",
            "tool_response",
            "model_request",
            "model_response",
            "tool_request",
            "stop",
        ]
    );
    assert_eq!(tool_outputs(events)[1], "Edited letters.txt.");

    let calls = transcript.borrow();
    let last_prompt = &calls[2].last().expect("prompt").content;
    assert!(last_prompt.contains("[File: letters.txt (page 1 of 1)]"));
    assert!(last_prompt.contains("3: c2"));

    verify_log(events, 10).expect("log replays");
    assert!(env.borrow().executed.iter().any(|cmd| cmd.starts_with("git add -A")));
}

#[test]
fn malformed_reply_becomes_a_new_model_request() {
    let model = ScriptedModel::new(["I think we should look around.".to_string(), reply("ok", "exit")]);
    let mut session = Session::new(
        "task",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session");
    let outcome = session.run().expect("run");
    assert_eq!(outcome.stop, StopReason::Exited);
    assert_eq!(outcome.prediction, None);

    let events = session.log().events();
    assert_eq!(
        kinds(events),
        vec![
            "task",
            "model_request",
            "model_request",
            "model_response",
            "tool_request",
            "stop"
        ]
    );
    let EventKind::ModelRequest { observation } = &events[2].kind else {
        panic!("expected model request");
    };
    assert!(observation.contains("no <THOUGHT> block"));
    verify_log(events, 5).expect("log replays");
}

#[test]
fn unparsable_command_is_reported_to_the_model() {
    let model = ScriptedModel::new([reply("quote", "open_file \"unterminated"), reply("ok", "exit")]);
    let mut session = Session::new(
        "task",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session");
    session.run().expect("run");
    let events = session.log().events();
    assert!(tool_outputs(events)[0].starts_with("Could not parse command"));
    verify_log(events, 5).expect("log replays");
}

/// Same script, same environment, same log: an edit, a malformed reply, and
/// an interrupted command all replay to identical events.
#[test]
fn identical_runs_record_identical_logs() {
    fn run_once() -> (Vec<Event>, usize) {
        let env = SharedEnvironment::new(
            MemoryEnvironment::new()
                .with_file("letters.txt", LETTERS)
                .fail("sleep", EnvError::Timeout(Duration::from_secs(1)))
                .respond("git diff", PREDICTION, 0),
        );
        let model = ScriptedModel::new([
            reply("edit first", LETTERS_EDIT),
            "no tags at all".to_string(),
            reply("wait for it", "sleep 100"),
            reply("done", "submit"),
        ]);
        let mut session = Session::new("change c to c2", &config(10), Box::new(env.clone()), Box::new(model))
            .expect("session");
        let outcome = session.run().expect("run");
        assert_eq!(outcome.stop, StopReason::Submitted);
        let interrupts = env.borrow().interrupts;
        (session.log().events().to_vec(), interrupts)
    }

    let (first, first_interrupts) = run_once();
    let (second, second_interrupts) = run_once();
    assert_eq!(first, second);
    assert_eq!((first_interrupts, second_interrupts), (1, 1));
    assert_eq!(tool_outputs(&first)[0], "Edited letters.txt.");
    assert!(tool_outputs(&first)[1].contains("timed out after 1s"));
    verify_log(&first, 10).expect("log replays");
}

#[test]
fn tampered_log_fails_replay() {
    let model = ScriptedModel::new([reply("a", "no_op"), reply("b", "exit")]);
    let mut session = Session::new(
        "task",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session");
    session.run().expect("run");

    let mut events = session.log().events().to_vec();
    let response = events
        .iter()
        .position(|event| matches!(event.kind, EventKind::ToolResponse { .. }))
        .expect("tool response");
    events.remove(response);
    assert!(matches!(
        verify_log(&events, 5),
        Err(LogViolation::UnexpectedSuccessor { .. })
    ));

    // A smaller budget than the run used is also a mismatch.
    assert!(verify_log(session.log().events(), 1).is_err());
}

#[test]
fn timed_out_command_is_interrupted_and_the_session_continues() {
    let env = SharedEnvironment::new(
        MemoryEnvironment::new().fail("sleep", EnvError::Timeout(Duration::from_secs(1))),
    );
    let model = ScriptedModel::new([reply("wait", "sleep 100"), reply("ok", "exit")]);
    let mut session = Session::new("task", &config(5), Box::new(env.clone()), Box::new(model))
        .expect("session");
    let outcome = session.run().expect("run");

    assert_eq!(outcome.stop, StopReason::Exited);
    assert_eq!(env.borrow().interrupts, 1);
    let events = session.log().events();
    assert!(tool_outputs(events)[0].contains("timed out after 1s"));
    verify_log(events, 5).expect("log replays");
}

#[test]
fn failed_interrupt_ends_the_session_early() {
    let mut memory = MemoryEnvironment::new().fail("sleep", EnvError::Timeout(Duration::from_secs(1)));
    memory.fail_interrupt = true;
    let env = SharedEnvironment::new(memory);
    let model = ScriptedModel::new([reply("wait", "sleep 100")]);
    let mut session = Session::new("task", &config(5), Box::new(env.clone()), Box::new(model))
        .expect("session");
    let outcome = session.run().expect("run");

    assert!(matches!(outcome.stop, StopReason::EarlyExit { .. }));
    assert_eq!(env.borrow().teardowns, 1);
    assert_eq!(env.borrow().restarts, 1);
    verify_log(session.log().events(), 5).expect("log replays");
}

#[test]
fn crashed_environment_ends_the_session_early() {
    let env = SharedEnvironment::new(
        MemoryEnvironment::new().fail("boom", EnvError::Crashed("container gone".to_string())),
    );
    let model = ScriptedModel::new([reply("go", "boom")]);
    let mut session = Session::new("task", &config(5), Box::new(env.clone()), Box::new(model))
        .expect("session");
    let outcome = session.run().expect("run");

    assert_eq!(
        outcome.stop,
        StopReason::EarlyExit {
            error: "environment crashed: container gone".to_string()
        }
    );
    assert_eq!(outcome.prediction, None);
    assert_eq!(env.borrow().teardowns, 1);
}

#[test]
fn set_task_replaces_the_task_for_later_turns() {
    let model = ScriptedModel::new([reply("refocus", "set_task fix the tests instead"), reply("ok", "exit")]);
    let transcript = model.transcript();
    let mut session = Session::new(
        "fix the docs",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session");
    session.run().expect("run");

    assert_eq!(session.task(), "fix the tests instead");
    let calls = transcript.borrow();
    assert!(calls[1].last().expect("prompt").content.contains("fix the tests instead"));
    verify_log(session.log().events(), 5).expect("log replays");
}

#[test]
fn answered_question_is_fed_back_as_an_observation() {
    let model = ScriptedModel::new([reply("unsure", "ask_user which file?"), reply("ok", "exit")]);
    let transcript = model.transcript();
    let mut session = Session::new(
        "task",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session")
    .with_user_input(Box::new(ScriptedUser::new(["letters.txt"])));
    let outcome = session.run().expect("run");

    assert_eq!(outcome.stop, StopReason::Exited);
    let events = session.log().events();
    assert_eq!(
        kinds(&events[3..7]),
        vec!["tool_request", "user_request", "user_response", "tool_response"]
    );
    assert!(transcript.borrow()[1].last().expect("prompt").content.contains("letters.txt"));
    verify_log(events, 5).expect("log replays");
}

#[test]
fn events_are_persisted_as_they_are_appended() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    let model = ScriptedModel::new([reply("a", "no_op"), reply("b", "exit")]);
    let mut session = Session::new(
        "task",
        &config(5),
        Box::new(MemoryEnvironment::new()),
        Box::new(model),
    )
    .expect("session")
    .with_sink(EventSink::create(&path).expect("sink"));
    session.run().expect("run");

    let loaded = load_event_log(&path).expect("load");
    assert_eq!(loaded, session.log().events());
    verify_log(&loaded, 5).expect("log replays");
}

/// End to end against real files on disk.
#[test]
fn local_environment_creates_and_edits_files() {
    let dir = workspace(&[("src/app.py", "def main():\n    print('hi')\n    return 0\n")]);
    let edit = "edit_file <<<
--- a/src/app.py
+++ b/src/app.py
@@
 def main():
-    print('hi')
+    print('hello')
     return 0
>>>";
    let model = ScriptedModel::new([
        reply("add notes", "create_file notes.txt <<<\nremember this\n>>>"),
        reply("edit", edit),
        reply("done", "exit"),
    ]);
    let mut session = Session::new(
        "greet properly",
        &config(5),
        Box::new(LocalEnvironment::new(dir.path())),
        Box::new(model),
    )
    .expect("session");
    let outcome = session.run().expect("run");

    assert_eq!(outcome.stop, StopReason::Exited);
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).expect("notes"),
        "remember this\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("src/app.py")).expect("app"),
        "def main():\n    print('hello')\n    return 0\n"
    );
    assert!(session.editor().is_open("notes.txt"));
}
