/// Compute-resource detection for prompt enrichment.
///
/// Detection never fails the run: anything unexpected becomes `Unknown`.
use crate::process::{self, ProcessOutcome};
use crate::signals::SignalHandler;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceInfo {
    Gpu {
        name: String,
        memory_gb: f64,
        count: usize,
    },
    CpuOnly,
    /// Not detected (yet), with the reason.
    Unknown(String),
}

impl Default for ResourceInfo {
    fn default() -> Self {
        ResourceInfo::Unknown("not checked".to_string())
    }
}

impl ResourceInfo {
    pub fn is_known(&self) -> bool {
        !matches!(self, ResourceInfo::Unknown(_))
    }
}

impl std::fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceInfo::Gpu {
                name,
                memory_gb,
                count,
            } => {
                write!(f, "GPU: {name} ({memory_gb:.1}GB)")?;
                if *count > 1 {
                    write!(f, " x{count}")?;
                }
                Ok(())
            }
            ResourceInfo::CpuOnly => write!(f, "No GPU available - using CPU"),
            ResourceInfo::Unknown(reason) => write!(f, "GPU status unknown ({reason})"),
        }
    }
}

/// Parse `nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits`.
///
/// Memory is reported in MiB. The first GPU is described; the rest are counted.
pub fn parse_nvidia_smi(stdout: &str) -> ResourceInfo {
    let rows: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some(first) = rows.first() else {
        return ResourceInfo::CpuOnly;
    };

    let Some((name, mem)) = first.rsplit_once(',') else {
        return ResourceInfo::Unknown(format!("unexpected nvidia-smi output: {first}"));
    };
    match mem.trim().parse::<f64>() {
        Ok(mib) => ResourceInfo::Gpu {
            name: name.trim().to_string(),
            memory_gb: mib * 1024.0 * 1024.0 / 1e9,
            count: rows.len(),
        },
        Err(_) => ResourceInfo::Unknown(format!("unexpected nvidia-smi memory value: {mem}")),
    }
}

/// Probe the machine for GPUs via `nvidia-smi`.
pub async fn detect() -> ResourceInfo {
    let mut cmd = Command::new("nvidia-smi");
    cmd.args([
        "--query-gpu=name,memory.total",
        "--format=csv,noheader,nounits",
    ]);

    let output = process::run_captured(cmd, Duration::from_secs(30), &SignalHandler::new()).await;
    let info = match output {
        Ok(output) => match output.outcome {
            ProcessOutcome::Exited(status) if status.success() => parse_nvidia_smi(&output.stdout),
            // nvidia-smi exists but no usable device/driver
            ProcessOutcome::Exited(_) => ResourceInfo::CpuOnly,
            ProcessOutcome::TimedOut => ResourceInfo::Unknown("nvidia-smi timed out".to_string()),
            ProcessOutcome::Interrupted => {
                ResourceInfo::Unknown("nvidia-smi interrupted".to_string())
            }
        },
        Err(e) => ResourceInfo::Unknown(format!("nvidia-smi unavailable: {e}")),
    };

    match &info {
        ResourceInfo::Gpu { .. } => tracing::info!("GPU available: {info}"),
        ResourceInfo::CpuOnly => tracing::info!("No GPU available - will use CPU"),
        ResourceInfo::Unknown(reason) => tracing::warn!(reason = %reason, "resource check inconclusive"),
    }
    info
}
