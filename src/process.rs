/// Child-process plumbing shared by the computation and assistant invocations.
///
/// Every child is spawned in its own process group (via `process_group(0)`)
/// so a timeout can kill the whole group, grandchildren included, and so a
/// Ctrl-C delivered to the terminal does not reach it.
use crate::signals::SignalHandler;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// How long killed children get to close their pipes before reads are abandoned.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a bounded child run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(ExitStatus),
    /// The deadline passed; the process group was killed and reaped.
    TimedOut,
    /// A forced stop killed the process group.
    Interrupted,
}

/// Result of a run whose stdout and stderr were captured in memory.
#[derive(Debug)]
pub struct CapturedOutput {
    pub outcome: ProcessOutcome,
    pub stdout: String,
    pub stderr: String,
}

/// Errors that can occur while running a child process.
#[derive(Debug)]
pub enum ProcessError {
    /// Failed to spawn the program.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Failed to open a capture file.
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed while waiting for the child or reading its output.
    Io { source: std::io::Error },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Spawn { program, source } => {
                write!(f, "failed to spawn {program}: {source}")
            }
            ProcessError::OutputFile { path, source } => {
                write!(
                    f,
                    "failed to create output file {}: {source}",
                    path.display()
                )
            }
            ProcessError::Io { source } => write!(f, "I/O error while running child: {source}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Spawn { source, .. } => Some(source),
            ProcessError::OutputFile { source, .. } => Some(source),
            ProcessError::Io { source } => Some(source),
        }
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().to_string()
}

fn spawn(cmd: &mut Command) -> Result<Child, ProcessError> {
    cmd.stdin(Stdio::null()).process_group(0).kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: program_name(cmd),
        source: e,
    })?;
    tracing::debug!(pid = child.id(), program = %program_name(cmd), "child process started");
    Ok(child)
}

/// Run `cmd` with stdout and stderr redirected to the given files.
pub async fn run_to_files(
    mut cmd: Command,
    stdout_path: &Path,
    stderr_path: &Path,
    timeout: Duration,
    abort: &SignalHandler,
) -> Result<ProcessOutcome, ProcessError> {
    let stdout = std::fs::File::create(stdout_path).map_err(|e| ProcessError::OutputFile {
        path: stdout_path.to_path_buf(),
        source: e,
    })?;
    let stderr = std::fs::File::create(stderr_path).map_err(|e| ProcessError::OutputFile {
        path: stderr_path.to_path_buf(),
        source: e,
    })?;

    cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
    let mut child = spawn(&mut cmd)?;
    let pgid = child.id();
    wait_or_kill(&mut child, pgid, Instant::now() + timeout, abort).await
}

/// Run `cmd` capturing stdout and stderr in memory.
///
/// Both pipes are drained while the child runs so a chatty child cannot block.
/// One deadline covers the wait and the drain: a grandchild still holding a
/// pipe when it passes gets its process group killed and the run is `TimedOut`.
pub async fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    abort: &SignalHandler,
) -> Result<CapturedOutput, ProcessError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = spawn(&mut cmd)?;
    let pgid = child.id();
    let deadline = Instant::now() + timeout;

    let mut stdout_task = tokio::spawn(drain(child.stdout.take()));
    let mut stderr_task = tokio::spawn(drain(child.stderr.take()));

    let outcome = wait_or_kill(&mut child, pgid, deadline, abort).await?;

    // Already killed: the pipes close as the group dies, allow a short grace.
    let drain_deadline = match outcome {
        ProcessOutcome::Exited(_) => deadline,
        _ => Instant::now() + DRAIN_GRACE,
    };

    let cut_short = {
        let drained = async {
            let stdout = join_output(&mut stdout_task).await?;
            let stderr = join_output(&mut stderr_task).await?;
            Ok::<_, ProcessError>((stdout, stderr))
        };
        tokio::select! {
            biased;
            res = drained => {
                let (stdout, stderr) = res?;
                return Ok(CapturedOutput {
                    outcome,
                    stdout,
                    stderr,
                });
            }
            _ = tokio::time::sleep_until(drain_deadline) => ProcessOutcome::TimedOut,
            _ = abort.forced() => ProcessOutcome::Interrupted,
        }
    };

    tracing::warn!(
        pid = pgid,
        timeout_secs = timeout.as_secs(),
        "output pipes still open after child exit, killing process group"
    );
    if let Some(pid) = pgid {
        kill_process_group(pid);
    }
    stdout_task.abort();
    stderr_task.abort();

    Ok(CapturedOutput {
        outcome: match outcome {
            ProcessOutcome::Exited(_) => cut_short,
            other => other,
        },
        stdout: String::new(),
        stderr: String::new(),
    })
}

async fn drain<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut s) = stream {
        s.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn join_output(
    handle: &mut tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<String, ProcessError> {
    let bytes = handle
        .await
        .map_err(|e| ProcessError::Io {
            source: std::io::Error::other(e),
        })?
        .map_err(|e| ProcessError::Io { source: e })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Wait for the child until `deadline` or a forced stop, then kill its whole
/// process group and reap it.
async fn wait_or_kill(
    child: &mut Child,
    pgid: Option<u32>,
    deadline: Instant,
    abort: &SignalHandler,
) -> Result<ProcessOutcome, ProcessError> {
    let outcome = tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| ProcessError::Io { source: e })?;
            return Ok(ProcessOutcome::Exited(status));
        }
        _ = tokio::time::sleep_until(deadline) => {
            tracing::warn!(pid = pgid, "child timed out, killing process group");
            ProcessOutcome::TimedOut
        }
        _ = abort.forced() => {
            tracing::warn!(pid = pgid, "stop requested, killing process group");
            ProcessOutcome::Interrupted
        }
    };

    if let Some(pid) = pgid {
        kill_process_group(pid);
    }
    // Fallback for the direct child if the group kill failed.
    let _ = child.start_kill();
    child
        .wait()
        .await
        .map_err(|e| ProcessError::Io { source: e })?;
    Ok(outcome)
}

fn kill_process_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        tracing::warn!(pid, error = %e, "failed to kill process group");
    }
}
