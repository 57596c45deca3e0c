//! Batch execution.
//!
//! Runs every task instance in its own session on a bounded pool of worker
//! threads. Sessions share nothing mutable except the predictions writer,
//! which appends one line per finished instance.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use coder::io::config::{AgentConfig, EnvironmentKind};
use coder::io::environment::{DockerEnvironment, Environment, LocalEnvironment};
use coder::io::event_log::{EventSink, RunMeta, write_meta};
use coder::io::model::{CommandModel, LanguageModel};
use coder::io::predictions::{Prediction, PredictionWriter};
use coder::session::{Session, SessionOutcome};

use crate::config::apply_task_config;
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{InstanceResult, instance_dir, instance_run_paths, write_result};
use crate::task::TaskInstance;

/// Builds the environment and model for each instance.
///
/// Called on the worker thread that runs the instance, so the returned
/// objects never cross threads.
pub trait Backends: Sync {
    fn environment(&self, task: &TaskInstance, cfg: &AgentConfig) -> Result<Box<dyn Environment>>;
    fn model(&self, task: &TaskInstance, cfg: &AgentConfig) -> Result<Box<dyn LanguageModel>>;
}

/// Local checkouts or Docker containers, per the instance config, and the
/// configured model command.
#[derive(Debug, Default)]
pub struct ConfiguredBackends;

impl Backends for ConfiguredBackends {
    fn environment(
        &self,
        task: &TaskInstance,
        cfg: &AgentConfig,
    ) -> Result<Box<dyn Environment>> {
        match cfg.environment.kind {
            EnvironmentKind::Local => {
                if !task.repo.is_dir() {
                    bail!("repo {} is not a directory", task.repo.display());
                }
                Ok(Box::new(LocalEnvironment::new(&task.repo)))
            }
            EnvironmentKind::Docker => {
                let container = cfg
                    .environment
                    .container
                    .clone()
                    .context("environment.container is required for docker")?;
                Ok(Box::new(DockerEnvironment::new(
                    container,
                    cfg.environment.container_workdir(),
                )))
            }
        }
    }

    fn model(&self, _task: &TaskInstance, cfg: &AgentConfig) -> Result<Box<dyn LanguageModel>> {
        Ok(Box::new(CommandModel::new(&cfg.model, cfg.model_timeout())))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_id: String,
    pub results_dir: PathBuf,
    pub workers: usize,
}

/// Result of one instance in a batch.
#[derive(Debug, Clone)]
pub struct InstanceRun {
    pub instance_id: String,
    pub outcome: Outcome,
    pub results_dir: PathBuf,
}

/// Run all instances and return their runs in task order.
#[instrument(skip_all, fields(batch_id = %opts.batch_id, tasks = tasks.len()))]
pub fn run_batch(
    tasks: &[TaskInstance],
    base: &AgentConfig,
    writer: &PredictionWriter,
    backends: &dyn Backends,
    opts: &BatchOptions,
) -> Vec<InstanceRun> {
    let workers = opts.workers.clamp(1, tasks.len().max(1));
    info!(workers, "batch started");

    let next = AtomicUsize::new(0);
    let finished = Mutex::new(Vec::with_capacity(tasks.len()));
    thread::scope(|scope| {
        for worker in 0..workers {
            let next = &next;
            let finished = &finished;
            scope.spawn(move || {
                loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(task) = tasks.get(idx) else {
                        break;
                    };
                    debug!(worker, instance_id = %task.instance_id, "instance picked up");
                    let run = run_instance(task, base, writer, backends, opts);
                    let mut guard = finished.lock().unwrap_or_else(|p| p.into_inner());
                    guard.push((idx, run));
                }
            });
        }
    });

    let mut runs = finished.into_inner().unwrap_or_else(|p| p.into_inner());
    runs.sort_by_key(|(idx, _)| *idx);
    info!("batch finished");
    runs.into_iter().map(|(_, run)| run).collect()
}

/// Run one instance end to end. Failures become an `error` outcome with a
/// null prediction rather than aborting the batch.
#[instrument(skip_all, fields(instance_id = %task.instance_id))]
pub fn run_instance(
    task: &TaskInstance,
    base: &AgentConfig,
    writer: &PredictionWriter,
    backends: &dyn Backends,
    opts: &BatchOptions,
) -> InstanceRun {
    let started_at = Utc::now();
    let dir = instance_dir(&opts.results_dir, &opts.batch_id, &task.instance_id);
    let mut errors = Vec::new();

    let (model_name, session) = match apply_task_config(base.clone(), task) {
        Ok(cfg) => (
            cfg.model.name.clone(),
            drive(task, &cfg, backends, &dir, &opts.batch_id),
        ),
        Err(err) => (base.model.name.clone(), Err(err)),
    };
    let session = match session {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            let message = format!("{err:#}");
            warn!(error = %message, "instance failed");
            errors.push(message);
            None
        }
    };

    let prediction = session.as_ref().and_then(|s| s.prediction.clone());
    if let Err(err) = writer.append(&Prediction {
        model: model_name.clone(),
        instance_id: task.instance_id.clone(),
        prediction: prediction.clone(),
    }) {
        let message = format!("{err:#}");
        warn!(error = %message, "prediction not written");
        errors.push(format!("predictions: {message}"));
    }

    let stop = session.as_ref().map(|s| s.stop.clone());
    let outcome = classify_outcome(stop.as_ref(), prediction.as_deref());
    let finished_at = Utc::now();
    let (start_time, end_time, duration_secs) = InstanceResult::timed(started_at, finished_at);
    let result = InstanceResult {
        instance_id: task.instance_id.clone(),
        batch_id: opts.batch_id.clone(),
        model: model_name,
        outcome,
        stop,
        steps: session.as_ref().map_or(0, |s| s.steps),
        start_time,
        end_time,
        duration_secs,
        prediction_bytes: prediction.as_ref().map(String::len),
        errors,
    };
    if let Err(err) = write_result(&dir, &result) {
        warn!(error = %err, "result not written");
    }
    info!(outcome = ?outcome, duration_secs, "instance finished");

    InstanceRun {
        instance_id: task.instance_id.clone(),
        outcome,
        results_dir: dir,
    }
}

fn drive(
    task: &TaskInstance,
    cfg: &AgentConfig,
    backends: &dyn Backends,
    dir: &Path,
    batch_id: &str,
) -> Result<SessionOutcome> {
    let paths = instance_run_paths(dir);
    write_meta(
        &paths,
        &RunMeta {
            run_id: format!("{batch_id}/{}", task.instance_id),
            model: cfg.model.name.clone(),
            max_steps: cfg.max_steps,
            task: task.problem_statement.clone(),
        },
    )?;
    let sink = EventSink::create(&paths.events_path)?;
    let env = backends
        .environment(task, cfg)
        .context("create environment")?;
    let model = backends.model(task, cfg).context("create model")?;
    let mut session =
        Session::new(task.problem_statement.as_str(), cfg, env, model)?.with_sink(sink);
    session.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coder::core::transition::verify_log;
    use coder::io::environment::EnvError;
    use coder::io::event_log::load_event_log;
    use coder::io::predictions::load_predictions;
    use coder::test_support::{MemoryEnvironment, ScriptedModel, reply};
    use tempfile::tempdir;

    use crate::results::load_result;

    const DIFF: &str = "diff --git a/letters.txt b/letters.txt\n";

    /// Behavior keyed by instance id.
    struct Scripted;

    impl Backends for Scripted {
        fn environment(
            &self,
            task: &TaskInstance,
            _cfg: &AgentConfig,
        ) -> Result<Box<dyn Environment>> {
            match task.instance_id.as_str() {
                "broken" => bail!("no sandbox available"),
                "crash" => Ok(Box::new(
                    MemoryEnvironment::new().fail("boom", EnvError::Crashed("gone".to_string())),
                )),
                _ => Ok(Box::new(
                    MemoryEnvironment::new()
                        .with_file("letters.txt", "a\n")
                        .respond("git diff", DIFF, 0),
                )),
            }
        }

        fn model(
            &self,
            task: &TaskInstance,
            _cfg: &AgentConfig,
        ) -> Result<Box<dyn LanguageModel>> {
            let script = match task.instance_id.as_str() {
                "crash" => vec![reply("go", "boom")],
                "quit" => vec![reply("give up", "exit")],
                _ => vec![reply("look", "open_file letters.txt"), reply("done", "submit")],
            };
            Ok(Box::new(ScriptedModel::new(script)))
        }
    }

    fn task(id: &str) -> TaskInstance {
        TaskInstance {
            instance_id: id.to_string(),
            problem_statement: format!("solve {id}"),
            repo: PathBuf::from("/unused"),
            container: None,
            workdir: None,
            max_steps: None,
        }
    }

    #[test]
    fn every_instance_gets_one_prediction_line() {
        let temp = tempdir().expect("tempdir");
        let predictions = temp.path().join("preds.jsonl");
        let writer = PredictionWriter::open(&predictions).expect("writer");
        let opts = BatchOptions {
            batch_id: "batch-1".to_string(),
            results_dir: temp.path().join("results"),
            workers: 3,
        };
        let tasks: Vec<TaskInstance> = ["ok-1", "crash", "quit", "broken", "ok-2"]
            .into_iter()
            .map(task)
            .collect();
        let mut cfg = AgentConfig::default();
        cfg.model.max_retries = 0;

        let runs = run_batch(&tasks, &cfg, &writer, &Scripted, &opts);

        let outcomes: Vec<(&str, Outcome)> = runs
            .iter()
            .map(|run| (run.instance_id.as_str(), run.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("ok-1", Outcome::Submitted),
                ("crash", Outcome::EarlyExit),
                ("quit", Outcome::NotSubmitted),
                ("broken", Outcome::Error),
                ("ok-2", Outcome::Submitted),
            ]
        );

        let mut lines = load_predictions(&predictions).expect("predictions");
        assert_eq!(lines.len(), 5);
        lines.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        assert_eq!(lines[0].instance_id, "broken");
        assert_eq!(lines[0].prediction, None);
        assert_eq!(lines[2].instance_id, "ok-1");
        assert_eq!(lines[2].prediction.as_deref(), Some(DIFF));
        assert!(lines.iter().all(|line| line.model == cfg.model.name));
    }

    #[test]
    fn instance_artifacts_are_recorded() {
        let temp = tempdir().expect("tempdir");
        let writer = PredictionWriter::open(&temp.path().join("preds.jsonl")).expect("writer");
        let opts = BatchOptions {
            batch_id: "batch-2".to_string(),
            results_dir: temp.path().join("results"),
            workers: 1,
        };
        let cfg = AgentConfig::default();

        let run = run_instance(&task("ok"), &cfg, &writer, &Scripted, &opts);
        assert_eq!(run.results_dir, temp.path().join("results/batch-2/ok"));

        let result = load_result(&run.results_dir).expect("result");
        assert_eq!(result.outcome, Outcome::Submitted);
        assert_eq!(result.steps, 2);
        assert_eq!(result.prediction_bytes, Some(DIFF.len()));
        assert!(result.errors.is_empty());

        let events = load_event_log(&run.results_dir.join("events.jsonl")).expect("events");
        verify_log(&events, cfg.max_steps).expect("log replays");
    }

    #[test]
    fn setup_failure_is_recorded_with_its_error() {
        let temp = tempdir().expect("tempdir");
        let writer = PredictionWriter::open(&temp.path().join("preds.jsonl")).expect("writer");
        let opts = BatchOptions {
            batch_id: "b".to_string(),
            results_dir: temp.path().join("results"),
            workers: 1,
        };
        let run = run_instance(&task("broken"), &AgentConfig::default(), &writer, &Scripted, &opts);
        let result = load_result(&run.results_dir).expect("result");
        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.stop, None);
        assert!(result.errors[0].contains("no sandbox available"));
    }

    #[test]
    fn missing_local_repo_is_a_setup_error() {
        let cfg = AgentConfig::default();
        let mut missing = task("x");
        missing.repo = PathBuf::from("/definitely/not/here");
        assert!(ConfiguredBackends.environment(&missing, &cfg).is_err());
    }
}
