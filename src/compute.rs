/// One computation run: pick the training script, run it with its output
/// captured to per-iteration log files, and report how it ended.
use crate::config::ComputationConfig;
use crate::experiment::ExperimentDir;
use crate::process::{self, ProcessError, ProcessOutcome};
use crate::signals::SignalHandler;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// A computation script that exited 0.
#[derive(Debug)]
pub struct ComputeRun {
    pub script: String,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub duration: Duration,
}

/// The (success, message) pair reported to the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOutcome {
    pub success: bool,
    pub message: String,
}

impl From<&Result<ComputeRun, ComputeError>> for ComputeOutcome {
    fn from(result: &Result<ComputeRun, ComputeError>) -> Self {
        match result {
            Ok(_) => ComputeOutcome {
                success: true,
                message: "Success".to_string(),
            },
            Err(e) => ComputeOutcome {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// Why a computation run did not succeed. None of these stop the loop.
#[derive(Debug)]
pub enum ComputeError {
    /// None of the candidate scripts exist.
    NoScript,
    Timeout { secs: u64 },
    ExitCode(i32),
    /// Killed by a signal it did not catch.
    Signal(Option<i32>),
    /// Killed on a forced stop.
    Interrupted,
    Process(ProcessError),
}

impl std::fmt::Display for ComputeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeError::NoScript => write!(f, "No training script found"),
            ComputeError::Timeout { secs } => write!(f, "Timeout after {secs}s"),
            ComputeError::ExitCode(code) => write!(f, "Exit code {code}"),
            ComputeError::Signal(Some(sig)) => write!(f, "Terminated by signal {sig}"),
            ComputeError::Signal(None) => write!(f, "Terminated without exit code"),
            ComputeError::Interrupted => write!(f, "Interrupted by user"),
            ComputeError::Process(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ComputeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComputeError::Process(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessError> for ComputeError {
    fn from(e: ProcessError) -> Self {
        ComputeError::Process(e)
    }
}

/// First candidate script that exists in the experiment directory.
pub fn find_script(exp: &ExperimentDir, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|name| exp.root().join(name.as_str()).is_file())
        .cloned()
}

fn build_command(config: &ComputationConfig, exp: &ExperimentDir, script: &str) -> Command {
    let mut cmd = if config.interpreter.is_empty() {
        Command::new(exp.root().join(script))
    } else {
        let mut cmd = Command::new(&config.interpreter);
        cmd.arg(script);
        cmd
    };
    cmd.current_dir(exp.root());
    cmd
}

/// Run the computation script for `iteration`.
///
/// Output goes to `logs/iter_{iteration}_stdout.txt` and `..._stderr.txt`.
/// Success means exit code 0.
pub async fn run_computation(
    config: &ComputationConfig,
    exp: &ExperimentDir,
    iteration: u32,
    abort: &SignalHandler,
) -> Result<ComputeRun, ComputeError> {
    let Some(script) = find_script(exp, &config.scripts) else {
        tracing::warn!(candidates = ?config.scripts, "no training script found");
        return Err(ComputeError::NoScript);
    };

    let stdout = exp.iteration_stdout(iteration);
    let stderr = exp.iteration_stderr(iteration);
    tracing::info!(
        iteration,
        script = %script,
        stdout = %stdout.display(),
        "Running {script}..."
    );

    let start = Instant::now();
    let timeout = Duration::from_secs(config.timeout_secs);
    let outcome = process::run_to_files(
        build_command(config, exp, &script),
        &stdout,
        &stderr,
        timeout,
        abort,
    )
    .await?;
    let duration = start.elapsed();

    match outcome {
        ProcessOutcome::Exited(status) if status.success() => {
            tracing::info!(
                iteration,
                duration_secs = duration.as_secs(),
                "Training completed successfully"
            );
            Ok(ComputeRun {
                script,
                stdout,
                stderr,
                duration,
            })
        }
        ProcessOutcome::Exited(status) => match status.code() {
            Some(code) => {
                tracing::warn!(iteration, exit_code = code, "Training failed with code {code}");
                Err(ComputeError::ExitCode(code))
            }
            None => {
                tracing::warn!(iteration, signal = ?status.signal(), "Training killed by signal");
                Err(ComputeError::Signal(status.signal()))
            }
        },
        ProcessOutcome::TimedOut => {
            tracing::warn!(
                iteration,
                timeout_secs = config.timeout_secs,
                "Training timed out"
            );
            Err(ComputeError::Timeout {
                secs: config.timeout_secs,
            })
        }
        ProcessOutcome::Interrupted => {
            tracing::warn!(iteration, "Training killed on user request");
            Err(ComputeError::Interrupted)
        }
    }
}
