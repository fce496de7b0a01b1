/// Core loop: plan once, then run the computation, hand the results to the
/// assistant, persist status, and repeat until the completion artifact
/// appears or the iteration budget runs out.
use crate::assistant::{self, AssistantClient, Capabilities};
use crate::compute::{self, ComputeOutcome};
use crate::config::{AssistantConfig, RunnerConfig};
use crate::experiment::ExperimentDir;
use crate::prompt;
use crate::resources::{self, ResourceInfo};
use crate::signals::SignalHandler;
use crate::status::{StatusPatch, StatusStore};
use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

/// Where the run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Planning,
    Iterating,
    /// The completion artifact exists.
    Complete,
    /// Iteration budget used up without a completion artifact.
    Exhausted,
    /// Plan creation failed or the user interrupted.
    Aborted,
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Status (or the artifact) said complete before any work.
    AlreadyComplete,
    /// The completion artifact appeared during the run.
    ReportCreated,
    MaxIterations,
    PlanFailed,
    Interrupted,
}

/// Summary of the entire run, returned to main.
#[derive(Debug)]
pub struct RunSummary {
    pub final_state: RunState,
    /// Iteration counter at exit (persisted).
    pub iterations: u32,
    pub report_exists: bool,
    pub exit_reason: ExitReason,
}

/// Conditions that stop the orchestrator before the loop starts.
#[derive(Debug)]
pub enum StartupError {
    /// The idea document is missing.
    MissingInput { path: PathBuf },
    /// The assistant CLI cannot be run.
    ToolUnavailable { command: String, reason: String },
    /// Another orchestrator holds the experiment lock.
    Locked { path: PathBuf },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::MissingInput { path } => write!(
                f,
                "{} not found. Please create it with your experiment description",
                path.display()
            ),
            StartupError::ToolUnavailable { command, reason } => {
                write!(f, "assistant CLI `{command}` not available: {reason}")
            }
            StartupError::Locked { path } => write!(
                f,
                "another runner is already active in this experiment (lock {})",
                path.display()
            ),
            StartupError::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Fail fast if the assistant CLI cannot be run.
pub async fn preflight(config: &AssistantConfig) -> Result<(), StartupError> {
    match assistant::check_available(&config.command).await {
        Ok(version) => {
            tracing::debug!(command = %config.command, version = %version, "assistant CLI found");
            Ok(())
        }
        Err(reason) => Err(StartupError::ToolUnavailable {
            command: config.command.clone(),
            reason,
        }),
    }
}

/// Exclusive lock on the experiment, held for the runner's lifetime.
#[derive(Debug)]
pub struct ExperimentLock {
    _file: File,
}

impl ExperimentLock {
    pub fn acquire(exp: &ExperimentDir) -> Result<Self, StartupError> {
        let path = exp.lock();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StartupError::Io {
                path: path.clone(),
                source: e,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| StartupError::Locked { path })?;
        Ok(Self { _file: file })
    }
}

/// Run context: everything one experiment run carries between passes.
pub struct Runner {
    exp: ExperimentDir,
    config: RunnerConfig,
    assistant: AssistantClient,
    status: StatusStore,
    capabilities: Capabilities,
    resources: ResourceInfo,
    iteration: u32,
    session_id: Option<String>,
    previously_complete: bool,
    state: RunState,
}

impl Runner {
    /// Validate the experiment and restore any prior status.
    pub fn new(
        exp: ExperimentDir,
        config: RunnerConfig,
        capabilities: Capabilities,
    ) -> Result<Self, StartupError> {
        exp.init().map_err(|e| StartupError::Io {
            path: exp.logs_dir(),
            source: e,
        })?;

        let idea = exp.idea();
        if !idea.is_file() {
            return Err(StartupError::MissingInput { path: idea });
        }

        let status = StatusStore::new(exp.status());
        let prior = match status.load() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable status, starting from iteration 0");
                None
            }
        };
        let (iteration, session_id, previously_complete) = match prior {
            Some(doc) => (doc.iteration, doc.session_id, doc.complete),
            None => (0, None, false),
        };
        if iteration > 0 || session_id.is_some() {
            tracing::info!(iteration, session_id = ?session_id, "resuming from saved status");
        }

        let assistant = AssistantClient::new(&config.assistant, &config.retry, capabilities);

        Ok(Self {
            exp,
            config,
            assistant,
            status,
            capabilities,
            resources: ResourceInfo::default(),
            iteration,
            session_id,
            previously_complete,
            state: RunState::Init,
        })
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Run the experiment to completion, budget exhaustion, or interruption.
    pub async fn run(&mut self, signals: &SignalHandler) -> RunSummary {
        tracing::info!(
            "Starting automated experiment in {}",
            self.exp.root().display()
        );

        if self.previously_complete || self.exp.is_complete() {
            tracing::info!("Experiment already complete");
            self.state = RunState::Complete;
            return self.summary(ExitReason::AlreadyComplete);
        }

        if !self.exp.plan().exists() {
            self.state = RunState::Planning;
            if !self.create_plan(signals).await {
                let reason = if signals.force_requested() {
                    tracing::warn!("Plan creation stopped by user - exiting");
                    ExitReason::Interrupted
                } else {
                    tracing::error!("Failed to create plan - exiting");
                    ExitReason::PlanFailed
                };
                self.state = RunState::Aborted;
                self.save_status();
                return self.summary(reason);
            }
            signals
                .pause(Duration::from_secs(self.config.session.plan_pause_secs))
                .await;
        } else {
            tracing::info!("PLAN.md already exists, skipping creation");
        }

        self.state = RunState::Iterating;
        let exit_reason = self.iterate(signals).await;

        tracing::info!(
            iterations = self.iteration,
            reason = ?exit_reason,
            "Experiment finished after {} iterations",
            self.iteration
        );
        if self.exp.is_complete() {
            tracing::info!("✓ REPORT.md generated successfully");
        } else {
            tracing::warn!("✗ No final report generated");
        }
        self.save_status();

        self.state = match exit_reason {
            ExitReason::Interrupted => RunState::Aborted,
            _ if self.exp.is_complete() => RunState::Complete,
            _ => RunState::Exhausted,
        };
        self.summary(exit_reason)
    }

    /// The ITERATING state. Returns why the loop ended.
    async fn iterate(&mut self, signals: &SignalHandler) -> ExitReason {
        let max_iterations = self.config.session.max_iterations;
        let pause = Duration::from_secs(self.config.session.iteration_pause_secs);

        while self.iteration < max_iterations {
            if signals.shutdown_requested() {
                return ExitReason::Interrupted;
            }

            self.iteration += 1;
            tracing::info!(iteration = self.iteration, "{}", "=".repeat(60));
            tracing::info!(iteration = self.iteration, "Starting iteration {}", self.iteration);

            if self.exp.is_complete() {
                tracing::info!("Experiment complete - REPORT.md exists");
                return ExitReason::ReportCreated;
            }

            let computation = compute::run_computation(
                &self.config.computation,
                &self.exp,
                self.iteration,
                signals,
            )
            .await;
            let outcome = ComputeOutcome::from(&computation);
            if let Err(e) = &computation {
                tracing::warn!(iteration = self.iteration, error = %e, "training run failed");
            }
            if signals.force_requested() {
                return ExitReason::Interrupted;
            }

            if self.iteration == 1 {
                self.ensure_resources().await;
            }
            let prompt = prompt::iteration_prompt(
                self.iteration,
                &outcome,
                &self.resources,
                self.capabilities,
            );

            if !self.run_assistant(&prompt, signals).await {
                tracing::warn!(
                    iteration = self.iteration,
                    "Claude analysis failed - will retry next iteration"
                );
            }

            self.save_status();

            if signals.shutdown_requested() {
                return ExitReason::Interrupted;
            }
            if self.iteration < max_iterations && signals.pause(pause).await {
                return ExitReason::Interrupted;
            }
        }

        if self.exp.is_complete() {
            ExitReason::ReportCreated
        } else {
            ExitReason::MaxIterations
        }
    }

    /// The PLANNING state. True once PLAN.md exists.
    async fn create_plan(&mut self, signals: &SignalHandler) -> bool {
        tracing::info!("Creating initial experiment plan...");
        self.ensure_resources().await;
        let prompt = prompt::plan_prompt(&self.resources, self.capabilities);

        if !self.run_assistant(&prompt, signals).await {
            return false;
        }
        if !self.exp.plan().exists() {
            tracing::error!("assistant finished but PLAN.md was not created");
            return false;
        }
        true
    }

    async fn ensure_resources(&mut self) {
        if !self.resources.is_known() {
            self.resources = resources::detect().await;
        }
    }

    /// One assistant call. Failures are already logged by the client.
    async fn run_assistant(&mut self, prompt: &str, signals: &SignalHandler) -> bool {
        let result = self
            .assistant
            .invoke(
                &self.exp,
                self.iteration,
                self.session_id.as_deref(),
                prompt,
                signals,
            )
            .await;

        match result {
            Ok(response) => {
                if let Some(id) = response.session_id {
                    self.adopt_session(id);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Take a new session id and persist it right away so a restart can resume it.
    fn adopt_session(&mut self, id: String) {
        if self.session_id.as_deref() == Some(id.as_str()) {
            return;
        }
        tracing::info!(session_id = %id, "Session ID saved: {id}");
        self.session_id = Some(id);
        self.save_status();
    }

    fn save_status(&self) {
        let patch = StatusPatch {
            iteration: Some(self.iteration),
            complete: Some(self.exp.is_complete()),
            session_id: self.session_id.clone(),
        };
        if let Err(e) = self.status.save(patch) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    fn summary(&self, exit_reason: ExitReason) -> RunSummary {
        RunSummary {
            final_state: self.state,
            iterations: self.iteration,
            report_exists: self.exp.is_complete(),
            exit_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Fake assistant: records its --resume value, writes PLAN.md if missing,
    /// then runs `extra` and prints a response carrying `session`.
    fn fake_assistant(tools: &Path, session: &str, extra: &str) -> String {
        let path = tools.join("fake-claude");
        let script = format!(
            r##"#!/bin/sh
resume=none
while [ $# -gt 0 ]; do
  if [ "$1" = "--resume" ]; then resume="$2"; fi
  shift
done
echo "$resume" >> resumes.txt
[ -f PLAN.md ] || echo "# Plan" > PLAN.md
{extra}
echo '{{"result":"ok","session_id":"{session}","cost_usd":0.01,"total_cost":0.02,"num_turns":1}}'
"##
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn failing_assistant(tools: &Path) -> String {
        let path = tools.join("failing-claude");
        std::fs::write(&path, "#!/bin/sh\necho call >> calls.txt\necho boom >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// Helper to create a minimal test config with fast scripts and no pauses.
    fn test_config(assistant: &str, max_iterations: u32) -> RunnerConfig {
        RunnerConfig {
            session: SessionConfig {
                max_iterations,
                iteration_pause_secs: 0,
                plan_pause_secs: 0,
            },
            assistant: AssistantConfig {
                command: assistant.to_string(),
                timeout_secs: 30,
                ..AssistantConfig::default()
            },
            retry: RetryConfig {
                max_retries: 2,
                backoff_secs: 0,
            },
            computation: ComputationConfig {
                interpreter: "sh".to_string(),
                scripts: vec!["train.sh".to_string()],
                timeout_secs: 30,
            },
            watchdog: WatchdogConfig::default(),
        }
    }

    /// Experiment dir with IDEA.md and a training script that logs each run.
    fn setup() -> (TempDir, TempDir, ExperimentDir) {
        let dir = tempdir().unwrap();
        let tools = tempdir().unwrap();
        std::fs::write(dir.path().join("IDEA.md"), "# Idea\nTrain a tiny model.\n").unwrap();
        std::fs::write(dir.path().join("train.sh"), "echo run >> runs.txt\necho trained\n").unwrap();
        let exp = ExperimentDir::new(dir.path());
        (dir, tools, exp)
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    fn count(pattern: &Path) -> usize {
        glob::glob(&pattern.display().to_string()).unwrap().count()
    }

    #[tokio::test]
    async fn test_single_iteration_from_idea_only() {
        let (dir, tools, exp) = setup();
        let cmd = fake_assistant(tools.path(), "s-1", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 1), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
        assert_eq!(summary.final_state, RunState::Exhausted);
        assert_eq!(summary.iterations, 1);
        assert!(!summary.report_exists);

        assert!(exp.plan().exists());
        assert_eq!(count(&exp.logs_dir().join("iter_*_stdout.txt")), 1);
        assert_eq!(count(&exp.logs_dir().join("iter_*_stderr.txt")), 1);
        assert!(exp.iteration_stdout(1).exists());

        let status = StatusStore::new(exp.status()).load().unwrap().unwrap();
        assert_eq!(status.iteration, 1);
        assert_eq!(status.session_id.as_deref(), Some("s-1"));
        assert!(!status.complete);

        // Planning call (iteration 0) and iteration 1 both saved responses
        assert!(exp.assistant_response(0).exists());
        assert!(exp.assistant_response(1).exists());
        assert_eq!(lines(&dir.path().join("runs.txt")).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_idea_is_fatal() {
        let dir = tempdir().unwrap();
        let exp = ExperimentDir::new(dir.path());
        let err = Runner::new(exp, test_config("claude", 1), Capabilities::default())
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::MissingInput { .. }));
        assert!(err.to_string().contains("IDEA.md not found"));
    }

    #[tokio::test]
    async fn test_session_adopted_and_resumed_on_next_call() {
        let (dir, tools, exp) = setup();
        let cmd = fake_assistant(tools.path(), "s-new", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 2), Capabilities::default()).unwrap();
        runner.run(&SignalHandler::new()).await;

        // Plan call starts fresh; every later call resumes the adopted session
        assert_eq!(
            lines(&dir.path().join("resumes.txt")),
            vec!["none", "s-new", "s-new"]
        );
        assert_eq!(runner.session_id(), Some("s-new"));
    }

    #[tokio::test]
    async fn test_restart_resumes_iteration_and_session() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        StatusStore::new(exp.status())
            .save(StatusPatch {
                iteration: Some(2),
                complete: Some(false),
                session_id: Some("s-old".to_string()),
            })
            .unwrap();
        let cmd = fake_assistant(tools.path(), "s-old", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 4), Capabilities::default()).unwrap();
        assert_eq!(runner.iteration(), 2);
        assert_eq!(runner.session_id(), Some("s-old"));

        let summary = runner.run(&SignalHandler::new()).await;
        assert_eq!(summary.iterations, 4);

        // Only iterations 3 and 4 ran, both resuming the stored session
        assert!(!exp.iteration_stdout(1).exists());
        assert!(exp.iteration_stdout(3).exists());
        assert!(exp.iteration_stdout(4).exists());
        assert_eq!(lines(&dir.path().join("resumes.txt")), vec!["s-old", "s-old"]);

        let status = StatusStore::new(exp.status()).load().unwrap().unwrap();
        assert_eq!(status.iteration, 4);
    }

    #[tokio::test]
    async fn test_status_round_trip_between_runner_instances() {
        let (_dir, tools, exp) = setup();
        let cmd = fake_assistant(tools.path(), "s-rt", "");

        let mut first =
            Runner::new(exp.clone(), test_config(&cmd, 1), Capabilities::default()).unwrap();
        first.run(&SignalHandler::new()).await;

        let second =
            Runner::new(exp.clone(), test_config(&cmd, 1), Capabilities::default()).unwrap();
        assert_eq!(second.iteration(), first.iteration());
        assert_eq!(second.session_id(), first.session_id());
    }

    #[tokio::test]
    async fn test_budget_already_spent_runs_nothing() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        StatusStore::new(exp.status())
            .save(StatusPatch {
                iteration: Some(3),
                ..Default::default()
            })
            .unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 3), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
        assert_eq!(summary.iterations, 3);
        assert!(!dir.path().join("resumes.txt").exists());
        assert!(!dir.path().join("runs.txt").exists());
    }

    #[tokio::test]
    async fn test_already_complete_does_no_work() {
        let (dir, tools, exp) = setup();
        StatusStore::new(exp.status())
            .save(StatusPatch {
                iteration: Some(4),
                complete: Some(true),
                ..Default::default()
            })
            .unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 10), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::AlreadyComplete);
        assert_eq!(summary.final_state, RunState::Complete);
        assert!(!exp.plan().exists());
        assert!(!dir.path().join("resumes.txt").exists());
    }

    #[tokio::test]
    async fn test_report_stops_loop_before_next_pass() {
        let (dir, tools, exp) = setup();
        // Second assistant call (iteration 1, after the plan call) writes the report
        let cmd = fake_assistant(
            tools.path(),
            "s",
            r##"n=$(wc -l < resumes.txt)
if [ "$n" -ge 2 ]; then echo "# Report" > REPORT.md; fi"##,
        );

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 5), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::ReportCreated);
        assert_eq!(summary.final_state, RunState::Complete);
        assert!(summary.report_exists);
        // Iteration 2 was counted but neither process ran for it
        assert_eq!(summary.iterations, 2);
        assert_eq!(lines(&dir.path().join("runs.txt")).len(), 1);
        assert_eq!(lines(&dir.path().join("resumes.txt")).len(), 2);
        assert!(!exp.iteration_stdout(2).exists());

        let status = StatusStore::new(exp.status()).load().unwrap().unwrap();
        assert!(status.complete);
        assert_eq!(status.iteration, 2);
    }

    #[tokio::test]
    async fn test_existing_report_skips_all_work() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        std::fs::write(exp.report(), "# Experiment Report (Watchdog Termination)").unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 5), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.final_state, RunState::Complete);
        assert!(!dir.path().join("runs.txt").exists());
        assert!(!dir.path().join("resumes.txt").exists());
    }

    #[tokio::test]
    async fn test_plan_failure_aborts() {
        let (dir, tools, exp) = setup();
        let cmd = failing_assistant(tools.path());

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 3), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::PlanFailed);
        assert_eq!(summary.final_state, RunState::Aborted);
        assert_eq!(summary.iterations, 0);
        assert!(!dir.path().join("runs.txt").exists());
        // "boom" is not transient, so exactly one attempt
        assert_eq!(lines(&dir.path().join("calls.txt")).len(), 1);
    }

    #[tokio::test]
    async fn test_assistant_failures_do_not_stop_loop() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        let cmd = failing_assistant(tools.path());

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 3), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.exit_reason, ExitReason::MaxIterations);
        assert_eq!(summary.iterations, 3);
        assert_eq!(lines(&dir.path().join("runs.txt")).len(), 3);
        assert_eq!(lines(&dir.path().join("calls.txt")).len(), 3);
        assert_eq!(
            StatusStore::new(exp.status()).load().unwrap().unwrap().iteration,
            3
        );
    }

    #[tokio::test]
    async fn test_missing_script_reported_and_loop_continues() {
        let (dir, tools, exp) = setup();
        std::fs::remove_file(dir.path().join("train.sh")).unwrap();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 2), Capabilities::default()).unwrap();
        let summary = runner.run(&SignalHandler::new()).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(lines(&dir.path().join("resumes.txt")).len(), 2);
        assert!(!exp.iteration_stdout(1).exists());
    }

    #[tokio::test]
    async fn test_interrupt_aborts_after_status_save() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let signals = SignalHandler::new();
        signals.request_shutdown();

        let mut runner =
            Runner::new(exp.clone(), test_config(&cmd, 5), Capabilities::default()).unwrap();
        let summary = runner.run(&signals).await;

        assert_eq!(summary.exit_reason, ExitReason::Interrupted);
        assert_eq!(summary.final_state, RunState::Aborted);
        assert_eq!(summary.iterations, 0);
        assert!(!dir.path().join("runs.txt").exists());
        assert!(StatusStore::new(exp.status()).load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_interrupt_kills_running_training() {
        let (dir, tools, exp) = setup();
        std::fs::write(exp.plan(), "# Plan").unwrap();
        std::fs::write(dir.path().join("train.sh"), "echo run >> runs.txt\nsleep 30\n").unwrap();
        let cmd = fake_assistant(tools.path(), "s", "");

        let signals = SignalHandler::new();
        let remote = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            remote.request_shutdown();
            remote.request_shutdown();
        });

        let mut config = test_config(&cmd, 5);
        config.computation.timeout_secs = 120;
        let mut runner = Runner::new(exp.clone(), config, Capabilities::default()).unwrap();

        let start = std::time::Instant::now();
        let summary = runner.run(&signals).await;

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(summary.exit_reason, ExitReason::Interrupted);
        assert_eq!(summary.final_state, RunState::Aborted);
        assert_eq!(summary.iterations, 1);
        // Assistant never ran for the killed pass
        assert!(!dir.path().join("resumes.txt").exists());
        assert_eq!(
            StatusStore::new(exp.status()).load().unwrap().unwrap().iteration,
            1
        );
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let exp = ExperimentDir::new(dir.path());
        exp.init().unwrap();

        let held = ExperimentLock::acquire(&exp).unwrap();
        assert!(matches!(
            ExperimentLock::acquire(&exp),
            Err(StartupError::Locked { .. })
        ));
        drop(held);
        assert!(ExperimentLock::acquire(&exp).is_ok());
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_tool() {
        let config = AssistantConfig {
            command: "nonexistent-binary-xyz".to_string(),
            ..AssistantConfig::default()
        };
        let err = preflight(&config).await.unwrap_err();
        assert!(matches!(err, StartupError::ToolUnavailable { .. }));
    }
}
