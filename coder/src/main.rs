//! Autonomous coding agent CLI.
//!
//! `coder run` drives one session against a repository and records its event
//! log under `.coder/runs/<run-id>/`. `coder apply` runs the diff engine alone,
//! and `coder replay` checks a recorded log against the transition function.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use coder::core::diff_engine::{DiffEngine, FilePatch};
use coder::core::transition::verify_log;
use coder::exit_codes;
use coder::io::config::{AgentConfig, EnvironmentKind, load_config, write_config};
use coder::io::environment::{DockerEnvironment, Environment, LocalEnvironment};
use coder::io::event_log::{
    EventSink, RunMeta, RunPaths, generate_run_id, load_event_log, load_meta, write_meta,
};
use coder::io::model::CommandModel;
use coder::io::predictions::{Prediction, PredictionWriter};
use coder::logging;
use coder::session::{Session, StdinUserInput};

const CONFIG_PATH: &str = ".coder/config.toml";

#[derive(Parser)]
#[command(name = "coder", version, about = "Autonomous coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EnvArg {
    Local,
    Docker,
}

impl From<EnvArg> for EnvironmentKind {
    fn from(arg: EnvArg) -> Self {
        match arg {
            EnvArg::Local => EnvironmentKind::Local,
            EnvArg::Docker => EnvironmentKind::Docker,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.coder/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one session until the model submits or the session stops.
    Run {
        /// Task text.
        #[arg(long, conflicts_with = "task_file")]
        task: Option<String>,
        /// Read the task from a file.
        #[arg(long)]
        task_file: Option<PathBuf>,
        /// Repository to work in (defaults to the current directory).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Override `environment.kind` from the config.
        #[arg(long, value_enum)]
        env: Option<EnvArg>,
        /// Container for `--env docker`.
        #[arg(long)]
        container: Option<String>,
        /// Config file (defaults to `.coder/config.toml` under the repository).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `max_steps` from the config.
        #[arg(long)]
        max_steps: Option<usize>,
        /// Answer `ask_user` questions on stdin.
        #[arg(long)]
        interactive: bool,
        /// Append the prediction to this JSONL file.
        #[arg(long)]
        predictions: Option<PathBuf>,
        /// Instance id recorded with the prediction.
        #[arg(long, default_value = "local")]
        instance_id: String,
    },
    /// Apply a diff to the working tree without a model.
    Apply {
        /// Diff file; reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Check a recorded event log against the transition function.
    Replay {
        /// Run id under `.coder/runs/`, or a path to an events file.
        run: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            task,
            task_file,
            path,
            env,
            container,
            config,
            max_steps,
            interactive,
            predictions,
            instance_id,
        } => {
            let task = match (task, task_file) {
                (Some(task), _) => task,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("read task file {}", path.display()))?,
                (None, None) => bail!("one of --task or --task-file is required"),
            };
            let root = match path {
                Some(path) => path
                    .canonicalize()
                    .with_context(|| format!("resolve {}", path.display()))?,
                None => root,
            };
            let mut cfg = resolve_config(&root, config.as_deref())?;
            if let Some(max_steps) = max_steps {
                cfg.max_steps = max_steps;
            }
            if let Some(env) = env {
                cfg.environment.kind = env.into();
            }
            if container.is_some() {
                cfg.environment.container = container;
            }
            cfg.validate()?;
            cmd_run(
                &root,
                &cfg,
                &task,
                interactive,
                predictions.as_deref(),
                &instance_id,
            )
        }
        Command::Apply { file } => cmd_apply(&root, file.as_deref()),
        Command::Replay { run } => cmd_replay(&root, &run),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = root.join(CONFIG_PATH);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &AgentConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn resolve_config(root: &Path, explicit: Option<&Path>) -> Result<AgentConfig> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = root.join(CONFIG_PATH);
            if path.exists() {
                load_config(&path)
            } else {
                Ok(AgentConfig::default())
            }
        }
    }
}

fn environment(root: &Path, cfg: &AgentConfig) -> Result<Box<dyn Environment>> {
    match cfg.environment.kind {
        EnvironmentKind::Local => Ok(Box::new(LocalEnvironment::new(root))),
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

fn cmd_run(
    root: &Path,
    cfg: &AgentConfig,
    task: &str,
    interactive: bool,
    predictions: Option<&Path>,
    instance_id: &str,
) -> Result<i32> {
    let run_id = generate_run_id(root)?;
    let paths = RunPaths::new(root, &run_id);
    write_meta(
        &paths,
        &RunMeta {
            run_id: run_id.clone(),
            model: cfg.model.name.clone(),
            max_steps: cfg.max_steps,
            task: task.to_string(),
        },
    )?;
    let sink = EventSink::create(&paths.events_path)?;
    let model = CommandModel::new(&cfg.model, cfg.model_timeout());
    let mut session = Session::new(task, cfg, environment(root, cfg)?, Box::new(model))?
        .with_sink(sink);
    if interactive {
        session = session.with_user_input(Box::new(StdinUserInput));
    }

    let outcome = session.run()?;
    if let Some(path) = predictions {
        PredictionWriter::open(path)?.append(&Prediction {
            model: cfg.model.name.clone(),
            instance_id: instance_id.to_string(),
            prediction: outcome.prediction.clone(),
        })?;
    }
    if let Some(diff) = &outcome.prediction {
        print!("{diff}");
    }
    eprintln!(
        "{run_id}: {} after {} steps",
        outcome.stop.label(),
        outcome.steps
    );
    Ok(if outcome.stop.is_graceful() {
        exit_codes::OK
    } else {
        exit_codes::EARLY_EXIT
    })
}

fn cmd_apply(root: &Path, file: Option<&Path>) -> Result<i32> {
    let text = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read diff from stdin")?;
            buf
        }
    };
    let mut engine = DiffEngine::default();
    let diff = match engine.parse(&text) {
        Ok(diff) => diff,
        Err(err) => {
            eprintln!("{}", err.to_recovery_prompt());
            return Ok(exit_codes::INVALID);
        }
    };
    let mut sources = BTreeMap::new();
    for file in diff.files.iter().filter(|f| !f.is_creation() && !f.is_deletion()) {
        let path = root.join(file.path());
        if let Ok(content) = fs::read_to_string(&path) {
            sources.insert(file.path().to_string(), content);
        }
    }

    let report = engine.apply(&diff, &sources);
    for patch in &report.patches {
        let path = root.join(patch.path());
        match patch {
            FilePatch::Create { content, .. } | FilePatch::Modify { content, .. } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
            }
            FilePatch::Delete { .. } => {
                fs::remove_file(&path).with_context(|| format!("delete {}", path.display()))?;
            }
        }
        println!("applied {}", patch.path());
    }
    for failure in &report.failures {
        eprintln!("{}: {}", failure.path, failure.error.to_recovery_prompt());
    }
    Ok(if report.is_clean() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_replay(root: &Path, run: &str) -> Result<i32> {
    let direct = PathBuf::from(run);
    let (events_path, meta_path) = if direct.is_file() {
        let meta = direct.with_file_name("meta.json");
        (direct, meta)
    } else {
        let paths = RunPaths::new(root, run);
        (paths.events_path, paths.meta_path)
    };
    let meta = load_meta(&meta_path)?;
    let events = load_event_log(&events_path)?;
    for (idx, event) in events.iter().enumerate() {
        println!("{idx:>4} {:<14} {} -> {}", event.kind.name(), event.producer, event.consumer);
    }
    match verify_log(&events, meta.max_steps) {
        Ok(()) => {
            println!("{}: {} events consistent", meta.run_id, events.len());
            Ok(exit_codes::OK)
        }
        Err(violation) => {
            println!("{}: {violation}", meta.run_id);
            Ok(exit_codes::REPLAY_MISMATCH)
        }
    }
}
