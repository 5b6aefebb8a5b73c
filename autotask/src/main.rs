//! Background auto-task orchestrator.
//!
//! Works through a user's automation tasks (`.autotask/tasks.json`) one
//! invocation at a time: plan, run tool steps, summarize, and report on each
//! finished group.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use autotask::core::types::{RunOutcome, RunReport};
use autotask::exit_codes;
use autotask::io::completion::PromptedCompletion;
use autotask::io::config::{AutotaskConfig, load_config, write_config};
use autotask::io::llm::CommandBackend;
use autotask::io::store::{JsonTaskStore, TaskStore};
use autotask::io::tools::CommandToolRegistry;
use autotask::logging;
use autotask::looping::{LoopStop, run_until_finished};
use autotask::orchestrator::Orchestrator;
use autotask::task::AutoTask;
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "autotask",
    version,
    about = "Background orchestrator for user automation tasks"
)]
struct Cli {
    /// Config file; the task file path is resolved next to it.
    #[arg(long, global = true, default_value = "autotask.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and an empty task file if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one orchestration invocation for a user and print its report.
    Run {
        #[arg(long)]
        user: String,
    },
    /// Run invocations until nothing is left, a run halts, or `--max-runs`.
    Loop {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 20)]
        max_runs: u32,
    },
    /// Print a user's tasks as JSON.
    Tasks {
        #[arg(long)]
        user: String,
    },
    /// Append a new `undone` task.
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Id of the parent task; omit for a main task.
        #[arg(long)]
        parent: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run { user } => cmd_run(&cli.config, &user),
        Command::Loop { user, max_runs } => cmd_loop(&cli.config, &user, max_runs),
        Command::Tasks { user } => cmd_tasks(&cli.config, &user),
        Command::Add {
            user,
            title,
            description,
            parent,
        } => cmd_add(&cli.config, &user, &title, &description, parent),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    let cfg = if force || !config_path.exists() {
        let cfg = AutotaskConfig::default();
        write_config(config_path, &cfg)
            .with_context(|| format!("write {}", config_path.display()))?;
        cfg
    } else {
        load_config(config_path)?
    };

    let store = JsonTaskStore::new(cfg.store_path(config_path));
    if force || !store.path().exists() {
        store.save_all(&[])?;
    }
    Ok(exit_codes::OK)
}

fn open_store(config_path: &Path) -> Result<(AutotaskConfig, JsonTaskStore)> {
    let cfg = load_config(config_path)?;
    let store = JsonTaskStore::new(cfg.store_path(config_path));
    Ok((cfg, store))
}

fn run_exit_code(report: &RunReport) -> i32 {
    match report.outcome {
        RunOutcome::GroupCompleted { .. } => exit_codes::OK,
        RunOutcome::Idle => exit_codes::IDLE,
        RunOutcome::Halted => exit_codes::HALTED,
    }
}

fn cmd_run(config_path: &Path, user: &str) -> Result<i32> {
    let (cfg, store) = open_store(config_path)?;
    let tools = CommandToolRegistry::new(cfg.tools.clone());
    let completion = PromptedCompletion::new(
        CommandBackend::new(cfg.completion.clone()),
        cfg.completion.prompt_budget_bytes,
    )?;
    let orchestrator = Orchestrator::new(&store, &tools, &completion, cfg.orchestrator.clone());

    let report = orchestrator.run_once(user);
    print_json(&report, true)?;
    Ok(run_exit_code(&report))
}

fn cmd_loop(config_path: &Path, user: &str, max_runs: u32) -> Result<i32> {
    let (cfg, store) = open_store(config_path)?;
    let tools = CommandToolRegistry::new(cfg.tools.clone());
    let completion = PromptedCompletion::new(
        CommandBackend::new(cfg.completion.clone()),
        cfg.completion.prompt_budget_bytes,
    )?;
    let orchestrator = Orchestrator::new(&store, &tools, &completion, cfg.orchestrator.clone());

    let mut print_err = None;
    let outcome = run_until_finished(&orchestrator, user, max_runs, |report| {
        if print_err.is_none()
            && let Err(err) = print_json(report, false)
        {
            print_err = Some(err);
        }
    });
    if let Some(err) = print_err {
        return Err(err);
    }

    eprintln!(
        "{} run(s), {} task(s) completed",
        outcome.runs,
        outcome.completed_tasks.len()
    );
    Ok(match outcome.stop {
        LoopStop::Finished => exit_codes::IDLE,
        LoopStop::Halted { .. } => exit_codes::HALTED,
        LoopStop::MaxRunsExceeded { .. } => exit_codes::OK,
    })
}

fn cmd_tasks(config_path: &Path, user: &str) -> Result<i32> {
    let (_, store) = open_store(config_path)?;
    let tasks = store.list_user_tasks(user)?;
    print_json(&tasks, true)?;
    Ok(exit_codes::OK)
}

fn cmd_add(
    config_path: &Path,
    user: &str,
    title: &str,
    description: &str,
    parent: Option<String>,
) -> Result<i32> {
    let (_, store) = open_store(config_path)?;
    let tasks = store.load_all()?;
    if let Some(parent_id) = &parent
        && !tasks
            .iter()
            .any(|task| &task.id == parent_id && task.user_id == user)
    {
        bail!("parent task '{parent_id}' not found for user '{user}'");
    }

    let id = next_task_id(&tasks);
    let mut task = AutoTask::new(&id, user, title, description);
    task.parent_id = parent;
    store.insert_task(task)?;
    println!("{id}");
    Ok(exit_codes::OK)
}

/// First `task-N` id not yet taken, counting from the number of tasks.
fn next_task_id(tasks: &[AutoTask]) -> String {
    let mut n = tasks.len() + 1;
    loop {
        let id = format!("task-{n}");
        if !tasks.iter().any(|task| task.id == id) {
            return id;
        }
        n += 1;
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("serialize json")?;
    println!("{payload}");
    Ok(())
}
