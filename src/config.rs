use serde::Deserialize;
use std::path::Path;

/// File name of the optional per-experiment config.
pub const CONFIG_FILE: &str = "crucible.toml";

/// Top-level configuration loaded from `crucible.toml` in the experiment directory.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RunnerConfig {
    pub session: SessionConfig,
    pub assistant: AssistantConfig,
    pub retry: RetryConfig,
    pub computation: ComputationConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub iteration_pause_secs: u64,
    pub plan_pause_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub command: String,
    pub timeout_secs: u64,
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComputationConfig {
    /// Program used to run the script. Empty means execute the script directly.
    pub interpreter: String,
    /// Candidate script names, first existing one wins.
    pub scripts: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub max_hours: f64,
    pub max_iterations: u32,
    pub stale_hours: f64,
}

// --- Default implementations ---

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_pause_secs: 3,
            plan_pause_secs: 2,
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: 600,
            allowed_tools: vec![
                "Edit".to_string(),
                "Write".to_string(),
                "WebFetch".to_string(),
                "Bash(ls:*)".to_string(),
            ],
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_secs: 30,
        }
    }
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            scripts: vec!["temp_check.py".to_string(), "train.py".to_string()],
            timeout_secs: 7200,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_hours: 24.0,
            max_iterations: 20,
            stale_hours: 2.0,
        }
    }
}

/// Load `crucible.toml` from the experiment directory, or defaults.
///
/// A file that fails to parse is reported and ignored.
pub fn load_config(dir: &Path) -> RunnerConfig {
    let path = dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                RunnerConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunnerConfig::default(),
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            RunnerConfig::default()
        }
    }
}
