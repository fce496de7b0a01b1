/// Out-of-band liveness check for an experiment.
///
/// Reads the status document once and decides whether the run crossed one of
/// its ceilings. If so it writes the completion artifact, which the
/// orchestrator notices at its next iteration boundary. It never touches the
/// status document itself.
use crate::config::WatchdogConfig;
use crate::experiment::ExperimentDir;
use crate::status::{StatusDocument, StatusError, StatusStore};
use std::io::Write;

/// Which ceiling was crossed.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Total runtime since the first status write.
    Runtime { hours: f64, limit: f64 },
    Iterations { iteration: u32, limit: u32 },
    /// Time since the last status write.
    Stale { hours: f64, limit: f64 },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Runtime { hours, limit } => {
                write!(f, "Running for {hours:.1} hours (>{limit}h)")
            }
            StopReason::Iterations { limit, .. } => write!(f, "Exceeded {limit} iterations"),
            StopReason::Stale { hours, limit } => {
                write!(f, "No progress for {hours:.1} hours (>{limit}h)")
            }
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// No status document yet; nothing to judge.
    NoStatus,
    /// Already finished; nothing to enforce.
    Complete { iteration: u32 },
    Healthy { iteration: u32, hours: f64 },
    Stop(StopReason),
}

impl Verdict {
    pub fn should_stop(&self) -> bool {
        matches!(self, Verdict::Stop(_))
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::NoStatus => write!(f, "No status file"),
            Verdict::Complete { iteration } => {
                write!(f, "Experiment complete after iteration {iteration}")
            }
            Verdict::Healthy { iteration, hours } => {
                write!(f, "Iteration {iteration}, {hours:.1} hours")
            }
            Verdict::Stop(reason) => write!(f, "{reason}"),
        }
    }
}

/// Judge a status document against the limits at time `now` (epoch seconds).
///
/// Checks run in order: total runtime, iteration ceiling, staleness.
pub fn evaluate(doc: &StatusDocument, limits: &WatchdogConfig, now: f64) -> Verdict {
    if doc.complete {
        return Verdict::Complete {
            iteration: doc.iteration,
        };
    }

    let hours = doc.hours_since_start(now);
    if hours > limits.max_hours {
        return Verdict::Stop(StopReason::Runtime {
            hours,
            limit: limits.max_hours,
        });
    }

    if doc.iteration > limits.max_iterations {
        return Verdict::Stop(StopReason::Iterations {
            iteration: doc.iteration,
            limit: limits.max_iterations,
        });
    }

    let idle = doc.hours_since_update(now);
    if idle > limits.stale_hours {
        return Verdict::Stop(StopReason::Stale {
            hours: idle,
            limit: limits.stale_hours,
        });
    }

    Verdict::Healthy {
        iteration: doc.iteration,
        hours,
    }
}

/// Load the experiment's status and evaluate it.
pub fn check(exp: &ExperimentDir, limits: &WatchdogConfig, now: f64) -> Result<Verdict, StatusError> {
    let store = StatusStore::new(exp.status());
    Ok(match store.load()? {
        Some(doc) => evaluate(&doc, limits, now),
        None => Verdict::NoStatus,
    })
}

fn report_text(reason: &StopReason) -> String {
    format!(
        "# Experiment Report (Watchdog Termination)

## Summary
- **Status**: Stopped by watchdog
- **Reason**: {reason}

## Recommendation
Check logs to understand why the experiment didn't complete naturally.
"
    )
}

/// Create the completion artifact naming `reason`.
///
/// An artifact that already exists is left as is. Returns whether one was written.
pub fn write_report(exp: &ExperimentDir, reason: &StopReason) -> std::io::Result<bool> {
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(exp.report())
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(report_text(reason).as_bytes())?;
    Ok(true)
}

/// What one watchdog invocation found and did.
#[derive(Debug)]
pub struct WatchdogOutcome {
    pub verdict: Result<Verdict, StatusError>,
    pub report: Option<std::io::Result<bool>>,
}

/// Evaluate once and, if a ceiling was crossed, write the completion artifact.
pub fn run(exp: &ExperimentDir, limits: &WatchdogConfig, now: f64) -> WatchdogOutcome {
    let verdict = check(exp, limits, now);
    let report = match &verdict {
        Ok(Verdict::Stop(reason)) => {
            tracing::warn!(reason = %reason, "watchdog forcing experiment stop");
            Some(write_report(exp, reason))
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "status unreadable, taking no action");
            None
        }
    };
    WatchdogOutcome { verdict, report }
}
