/// Assistant invocation: build the command line, run it with a timeout,
/// parse the structured response, and retry transient failures.
///
/// Every outcome leaves something in `logs/` for postmortem: the parsed
/// response, the raw unparseable output, or the prompt that timed out.
use crate::config::{AssistantConfig, RetryConfig};
use crate::experiment::ExperimentDir;
use crate::process::{self, ProcessError, ProcessOutcome};
use crate::ratelimit::{self, FailureClass};
use crate::retry::{self, RetryPolicy};
use crate::signals::SignalHandler;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Optional side-effect capabilities granted on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub allow_uv: bool,
    pub allow_pip: bool,
}

impl Capabilities {
    /// The allow-list: the configured base tools plus any enabled installers.
    pub fn allowed_tools(&self, base: &[String]) -> Vec<String> {
        let mut tools = base.to_vec();
        if self.allow_uv {
            tools.push("Bash(uv:*)".to_string());
        }
        if self.allow_pip {
            tools.push("Bash(pip:*)".to_string());
        }
        tools
    }

    /// Prompt lines telling the assistant which installers it may use.
    pub fn install_hints(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        if self.allow_uv {
            hints.push("You can install Python libraries using `uv pip install package_name`");
        }
        if self.allow_pip {
            hints.push("You can install Python libraries using `pip install package_name`");
        }
        hints
    }
}

/// The structured record the assistant prints on stdout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantResponse {
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    #[serde(alias = "total_cost_usd")]
    pub total_cost: Option<f64>,
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub is_error: bool,
    /// The full record as received.
    #[serde(skip)]
    pub record: Value,
}

/// Parse assistant stdout into a response, keeping the full record.
pub fn parse_response(stdout: &str) -> Result<AssistantResponse, serde_json::Error> {
    let record: Value = serde_json::from_str(stdout.trim())?;
    let mut response: AssistantResponse = serde_json::from_value(record.clone())?;
    response.record = record;
    Ok(response)
}

/// Why an assistant call failed. None of these stop the loop.
#[derive(Debug)]
pub enum AssistantError {
    Timeout { secs: u64 },
    /// Exit 0 but stdout was not a structured record.
    MalformedResponse {
        source: serde_json::Error,
        raw: String,
    },
    /// Non-zero exit. `message` is the leading part of the captured error text.
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    /// Killed on a forced stop.
    Interrupted,
    Process(ProcessError),
}

impl AssistantError {
    /// Only failed exits carrying a rate-limit signature are worth retrying.
    pub fn class(&self) -> FailureClass {
        match self {
            AssistantError::Failed { message, .. } => ratelimit::classify(message),
            _ => FailureClass::Fatal,
        }
    }
}

impl std::fmt::Display for AssistantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssistantError::Timeout { secs } => write!(f, "assistant timed out after {secs}s"),
            AssistantError::MalformedResponse { source, .. } => {
                write!(f, "failed to parse assistant JSON output: {source}")
            }
            AssistantError::Failed { exit_code, message } => match exit_code {
                Some(code) => write!(f, "assistant exited with code {code}: {message}"),
                None => write!(f, "assistant killed by signal: {message}"),
            },
            AssistantError::Interrupted => write!(f, "assistant stopped on user request"),
            AssistantError::Process(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AssistantError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssistantError::MalformedResponse { source, .. } => Some(source),
            AssistantError::Process(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs the external assistant CLI.
#[derive(Debug, Clone)]
pub struct AssistantClient {
    command: String,
    timeout: Duration,
    allowed_tools: Vec<String>,
    retry: RetryPolicy,
}

impl AssistantClient {
    pub fn new(config: &AssistantConfig, retry: &RetryConfig, capabilities: Capabilities) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            allowed_tools: capabilities.allowed_tools(&config.allowed_tools),
            retry: RetryPolicy::from_config(retry),
        }
    }

    /// Command arguments: structured output, allow-list, optional resume, prompt.
    pub fn build_args(&self, session_id: Option<&str>, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "--output-format".to_string(),
            "json".to_string(),
            "--allowedTools".to_string(),
            self.allowed_tools.join(","),
        ];
        if let Some(id) = session_id {
            args.push("--resume".to_string());
            args.push(id.to_string());
        }
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    /// Invoke the assistant for `iteration`, retrying rate-limited failures.
    ///
    /// Debug artifacts are written to the experiment's `logs/` directory.
    pub async fn invoke(
        &self,
        exp: &ExperimentDir,
        iteration: u32,
        session_id: Option<&str>,
        prompt: &str,
        abort: &SignalHandler,
    ) -> Result<AssistantResponse, AssistantError> {
        if let Some(id) = session_id {
            tracing::info!(session_id = id, "Resuming session: {id}");
        }
        tracing::info!(iteration, "Iteration {iteration}: Running Claude analysis...");

        let root = exp.root();
        let result = retry::run_with_retry(&self.retry, AssistantError::class, move |attempt| {
            if attempt > 0 {
                tracing::info!(iteration, attempt, "retrying assistant call");
            }
            self.invoke_once(root, session_id, prompt, abort)
        })
        .await;

        match &result {
            Ok(response) => self.record_response(exp, iteration, response),
            Err(AssistantError::MalformedResponse { source, raw }) => {
                let path = exp.assistant_raw_output(iteration);
                tracing::error!(
                    iteration,
                    error = %source,
                    raw_output = %path.display(),
                    "Failed to parse Claude JSON output"
                );
                write_debug_file(&path, raw);
            }
            Err(AssistantError::Timeout { secs }) => {
                let path = exp.timeout_prompt(iteration);
                tracing::error!(
                    iteration,
                    timeout_secs = secs,
                    prompt_file = %path.display(),
                    "Claude command timed out"
                );
                write_debug_file(&path, prompt);
            }
            Err(e) => tracing::error!(iteration, error = %e, "Claude error"),
        }

        result
    }

    async fn invoke_once(
        &self,
        cwd: &Path,
        session_id: Option<&str>,
        prompt: &str,
        abort: &SignalHandler,
    ) -> Result<AssistantResponse, AssistantError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(self.build_args(session_id, prompt)).current_dir(cwd);

        let output = process::run_captured(cmd, self.timeout, abort)
            .await
            .map_err(AssistantError::Process)?;

        match output.outcome {
            ProcessOutcome::TimedOut => Err(AssistantError::Timeout {
                secs: self.timeout.as_secs(),
            }),
            ProcessOutcome::Interrupted => Err(AssistantError::Interrupted),
            ProcessOutcome::Exited(status) if status.success() => parse_response(&output.stdout)
                .map_err(|e| AssistantError::MalformedResponse {
                    source: e,
                    raw: output.stdout,
                }),
            ProcessOutcome::Exited(status) => {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout.as_str()
                } else {
                    output.stderr.as_str()
                };
                let message = match ratelimit::excerpt(text.trim()) {
                    "" => "Unknown error".to_string(),
                    excerpt => excerpt.to_string(),
                };
                tracing::warn!(exit_code = ?status.code(), "Claude error: {message}...");
                Err(AssistantError::Failed {
                    exit_code: status.code(),
                    message,
                })
            }
        }
    }

    fn record_response(&self, exp: &ExperimentDir, iteration: u32, response: &AssistantResponse) {
        if response.is_error {
            tracing::warn!(iteration, "assistant reported an error in its result");
        }
        if let Some(text) = &response.result {
            tracing::info!(iteration, "Claude response:\n{text}");
        }
        tracing::info!(
            iteration,
            "Claude analysis completed, cost: ${} USD, total: {}, turns: {}",
            fmt_opt(response.cost_usd),
            fmt_opt(response.total_cost),
            fmt_opt(response.num_turns)
        );

        match serde_json::to_string_pretty(&response.record) {
            Ok(json) => write_debug_file(&exp.assistant_response(iteration), &json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize assistant response"),
        }
    }
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

fn write_debug_file(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        tracing::warn!(error = %e, path = %path.display(), "failed to write debug file");
    }
}

/// Confirm the assistant CLI can be found and run. Returns its version line.
pub async fn check_available(command: &str) -> Result<String, String> {
    let mut cmd = Command::new(command);
    cmd.arg("--version");
    let output = process::run_captured(cmd, Duration::from_secs(30), &SignalHandler::new())
        .await
        .map_err(|e| e.to_string())?;
    match output.outcome {
        ProcessOutcome::Exited(status) if status.success() => Ok(output.stdout.trim().to_string()),
        ProcessOutcome::Exited(status) => Err(format!(
            "`{command} --version` exited with {:?}",
            status.code()
        )),
        ProcessOutcome::TimedOut => Err(format!("`{command} --version` timed out")),
        ProcessOutcome::Interrupted => Err(format!("`{command} --version` interrupted")),
    }
}
