//! Process runner for interactive training procedures.
//!
//! Validates process documents and plays them against a simulated scene,
//! one quantum per tick, until the process completes or halts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stepwise::core::session::Session;
use stepwise::core::stage::{LifecycleObserver, LogFilter, Role, Stage, StageChange, TracingObserver};
use stepwise::driver::{Runner, TickOutcome};
use stepwise::error::RunnerError;
use stepwise::exit_codes;
use stepwise::io::config::{EngineConfig, load_config, write_config};
use stepwise::io::process_store::load_process;
use stepwise::io::scene::load_scene;
use stepwise::logging;

const DEFAULT_CONFIG: &str = "stepwise.toml";

#[derive(Parser)]
#[command(
    name = "stepwise",
    version,
    about = "Run step-by-step training processes against a simulated scene"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `stepwise.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Check a process document against the schema and structural invariants.
    Validate { process: PathBuf },
    /// Play a process until it completes, halts or hits `max_ticks`.
    Run {
        process: PathBuf,
        /// Scene document the process refers to.
        #[arg(long)]
        scene: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Autocomplete every step as soon as it starts.
        #[arg(long)]
        fast_forward: bool,
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
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Validate { process } => cmd_validate(&process),
        Command::Run {
            process,
            scene,
            config,
            fast_forward,
        } => cmd_run(&process, &scene, &config, fast_forward),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if force || !path.exists() {
        write_config(path, &EngineConfig::default())
            .with_context(|| format!("write {}", path.display()))?;
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let tree = load_process(path)?;
    let steps: usize = tree.chapters().iter().map(|c| tree.steps(*c).len()).sum();
    println!(
        "{}: {} chapters, {} steps",
        path.display(),
        tree.chapters().len(),
        steps
    );
    Ok(exit_codes::OK)
}

fn cmd_run(process: &Path, scene: &Path, config: &Path, fast_forward: bool) -> Result<i32> {
    let cfg = load_config(config)?;
    let tree = load_process(process)?;
    let (scene, tags) = load_scene(scene)?;

    let observer = StepPrinter::new(cfg.logging.clone());
    let max_ticks = cfg.max_ticks;
    let mut runner = Runner::new(Session::new(scene, tags), cfg).with_observer(Box::new(observer));
    runner
        .activate_process(tree)
        .with_context(|| format!("activate {}", process.display()))?;
    for diagnostic in runner.diagnostics() {
        eprintln!("warning: {diagnostic}");
    }

    for _ in 0..max_ticks {
        if fast_forward {
            runner.fast_forward_current_step()?;
        }
        match runner.tick() {
            Ok(TickOutcome::Running) => {}
            Ok(TickOutcome::Complete) => {
                println!("complete after {} quanta", runner.quantum());
                return Ok(exit_codes::OK);
            }
            Ok(TickOutcome::Idle) => {
                eprintln!("process stopped without completing");
                return Ok(exit_codes::HALTED);
            }
            Err(RunnerError::Halted(err)) => {
                eprintln!("halted after {} quanta: {err}", runner.quantum());
                return Ok(exit_codes::HALTED);
            }
            Err(err) => return Err(err.into()),
        }
    }
    eprintln!("process still running after {max_ticks} ticks");
    Ok(exit_codes::TICK_LIMIT)
}

/// Prints each step as it starts, then forwards to the tracing observer.
struct StepPrinter {
    inner: TracingObserver,
}

impl StepPrinter {
    fn new(filter: LogFilter) -> Self {
        Self {
            inner: TracingObserver::new(filter),
        }
    }
}

impl LifecycleObserver for StepPrinter {
    fn stage_changed(&mut self, change: &StageChange) {
        if change.role == Role::Step && change.to == Stage::Activating {
            println!("step: {}", change.name);
        }
        self.inner.stage_changed(change);
    }
}
