//! Cubescript - run cube scripts from the terminal
//!
//! Executes a script file against a fresh cube, printing logs and toasts as
//! the run is paced through. Ctrl-C aborts the run.

mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use cubescript_cube::Cube;
use cubescript_engine::{Presenter, RunController, TracingPresenter};
use cubescript_protocol::RunState;
use cubescript_script_host::{ScriptConfig, TYPESCRIPT_DEFINITIONS};

use console::{lifecycle_notice, ConsolePresenter};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Script to run
    #[arg(required_unless_present = "print_api")]
    script: Option<PathBuf>,

    /// Delay after each cube change, in milliseconds
    #[arg(long, default_value_t = 250)]
    step_delay_ms: u64,

    #[arg(long, default_value_t = Cube::DEFAULT_EDGE_LENGTH)]
    edge_length: u8,

    /// Stop the script after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Interpreter memory limit, in bytes (0 for unlimited)
    #[arg(long)]
    memory_limit: Option<usize>,

    /// Interpreter stack limit, in bytes
    #[arg(long)]
    max_stack_size: Option<usize>,

    /// Longest accepted script, in bytes
    #[arg(long)]
    max_script_length: Option<usize>,

    /// Print every move as it is applied
    #[arg(long)]
    show_moves: bool,

    /// Send script output to the log instead of stdout
    #[arg(long)]
    log_output: bool,

    /// Print the TypeScript definitions of the script API and exit
    #[arg(long)]
    print_api: bool,
}

impl Cli {
    fn script_config(&self) -> ScriptConfig {
        let defaults = ScriptConfig::default();
        ScriptConfig {
            memory_limit: self.memory_limit.unwrap_or(defaults.memory_limit),
            max_stack_size: self.max_stack_size.unwrap_or(defaults.max_stack_size),
            timeout_ms: self.timeout_ms,
            max_script_length: self.max_script_length.unwrap_or(defaults.max_script_length),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cubescript=info".parse()?),
        )
        .init();

    if cli.print_api {
        print!("{TYPESCRIPT_DEFINITIONS}");
        return Ok(());
    }
    let Some(path) = &cli.script else {
        bail!("no script given");
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cube = Cube::new(cli.edge_length).context("Invalid edge length")?;

    let presenter: Arc<dyn Presenter> = if cli.log_output {
        Arc::new(TracingPresenter)
    } else {
        Arc::new(ConsolePresenter {
            show_moves: cli.show_moves,
        })
    };
    let controller = RunController::new(cube, presenter, cli.script_config());
    controller.subscribe(|transition| {
        if let Some(notice) = lifecycle_notice(transition) {
            println!("{notice}");
        }
    });

    tracing::debug!(run_id = %controller.run_id(), script = %path.display(), "Starting run");
    controller.start(&source, Duration::from_millis(cli.step_delay_ms))?;

    let state = tokio::select! {
        state = controller.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = controller.abort() {
                tracing::debug!(error = %e, "Run ended before abort");
            }
            controller.wait().await
        }
    };

    if controller.cube_state().is_solved() {
        println!("Cube is solved");
    }
    match state {
        RunState::Done | RunState::Stopped => Ok(()),
        _ => bail!("run ended {state}"),
    }
}
