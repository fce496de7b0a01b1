use clap::Parser;
use crucible::assistant::Capabilities;
use crucible::experiment::ExperimentDir;
use crucible::runner::{self, ExperimentLock, RunSummary, Runner, StartupError};
use crucible::signals::SignalHandler;
use crucible::{config, logging};
use std::path::PathBuf;
use std::process::ExitCode;

/// Runs a training script and an AI assistant in a supervised loop:
/// plan the experiment, train, let the assistant analyze and edit,
/// and repeat until it writes REPORT.md.
#[derive(Parser, Debug)]
#[command(
    name = "crucible",
    version,
    about,
    after_help = "Examples:\n  crucible experiments/my_exp\n  crucible experiments/my_exp --max-iterations 20 --allow-uv"
)]
pub struct Cli {
    /// Directory containing IDEA.md and experiment files
    #[arg(value_name = "EXPERIMENT_DIR")]
    experiment_dir: PathBuf,

    /// Maximum iterations (default: from crucible.toml, else 10)
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Allow the assistant to install packages with uv
    #[arg(long)]
    allow_uv: bool,

    /// Allow the assistant to install packages with pip
    #[arg(long)]
    allow_pip: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => {
            tracing::debug!(?summary, "run finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                tracing::error!("{e}");
            } else {
                eprintln!("ERROR: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary, StartupError> {
    let root = cli
        .experiment_dir
        .canonicalize()
        .map_err(|e| StartupError::Io {
            path: cli.experiment_dir.clone(),
            source: e,
        })?;
    let exp = ExperimentDir::new(root);
    exp.init().map_err(|e| StartupError::Io {
        path: exp.logs_dir(),
        source: e,
    })?;

    if let Err(e) = logging::init(&exp.runner_log(), cli.verbose) {
        eprintln!(
            "warning: cannot open {}: {e}; logging to stderr only",
            exp.runner_log().display()
        );
        logging::init_stderr();
    }
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = config::load_config(exp.root());
    if let Some(n) = cli.max_iterations {
        config.session.max_iterations = n;
    }

    runner::preflight(&config.assistant).await?;
    let _lock = ExperimentLock::acquire(&exp)?;

    let capabilities = Capabilities {
        allow_uv: cli.allow_uv,
        allow_pip: cli.allow_pip,
    };
    let mut runner = Runner::new(exp, config, capabilities)?;
    let signals = SignalHandler::install();
    Ok(runner.run(&signals).await)
}
