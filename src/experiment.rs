use std::path::{Path, PathBuf};

/// Manages the experiment directory layout.
///
/// Every document the runner and watchdog touch lives under one experiment
/// directory. This struct provides accessors for each well-known path.
#[derive(Debug, Clone)]
pub struct ExperimentDir {
    root: PathBuf,
}

impl ExperimentDir {
    /// Create a new ExperimentDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The experiment root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The idea document. Required before a run can start.
    pub fn idea(&self) -> PathBuf {
        self.root.join("IDEA.md")
    }

    pub fn plan(&self) -> PathBuf {
        self.root.join("PLAN.md")
    }

    /// The completion artifact. Its existence alone ends the loop.
    pub fn report(&self) -> PathBuf {
        self.root.join("REPORT.md")
    }

    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Rolling text log shared by console and file output.
    pub fn runner_log(&self) -> PathBuf {
        self.logs_dir().join("runner.log")
    }

    /// Singleton lock held by a running orchestrator.
    pub fn lock(&self) -> PathBuf {
        self.logs_dir().join(".lock")
    }

    /// Captured stdout of the computation script (e.g. `logs/iter_3_stdout.txt`).
    pub fn iteration_stdout(&self, iteration: u32) -> PathBuf {
        self.logs_dir().join(format!("iter_{iteration}_stdout.txt"))
    }

    /// Captured stderr of the computation script (e.g. `logs/iter_3_stderr.txt`).
    pub fn iteration_stderr(&self, iteration: u32) -> PathBuf {
        self.logs_dir().join(format!("iter_{iteration}_stderr.txt"))
    }

    /// Full structured assistant response for an iteration.
    pub fn assistant_response(&self, iteration: u32) -> PathBuf {
        self.logs_dir().join(format!("claude_response_{iteration}.json"))
    }

    /// Raw assistant stdout kept when it could not be parsed.
    pub fn assistant_raw_output(&self, iteration: u32) -> PathBuf {
        self.logs_dir().join(format!("claude_raw_output_{iteration}.txt"))
    }

    /// Prompt kept for manual replay after an assistant timeout.
    pub fn timeout_prompt(&self, iteration: u32) -> PathBuf {
        self.logs_dir().join(format!("timeout_prompt_{iteration}.txt"))
    }

    /// Create the logs directory. The experiment root itself must already exist.
    pub fn init(&self) -> std::io::Result<()> {
        if !self.root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("experiment directory {} does not exist", self.root.display()),
            ));
        }
        std::fs::create_dir_all(self.logs_dir())
    }

    /// True once the completion artifact exists, whoever wrote it.
    pub fn is_complete(&self) -> bool {
        self.report().exists()
    }
}
