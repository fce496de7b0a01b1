use clap::Parser;
use crucible::experiment::ExperimentDir;
use crucible::status::now_epoch_secs;
use crucible::watchdog::{self, Verdict};
use crucible::{config, logging};
use std::path::PathBuf;

/// Check an experiment's status once and stop it if it crossed a runtime,
/// iteration or staleness ceiling.
///
/// Meant to be run periodically (e.g. from cron). Stopping means writing
/// REPORT.md, which the runner notices at its next iteration.
#[derive(Parser, Debug)]
#[command(name = "crucible-watchdog", version, about)]
struct Cli {
    /// Experiment directory to monitor
    #[arg(value_name = "EXPERIMENT_DIR")]
    experiment_dir: PathBuf,

    /// Maximum runtime in hours (default: from crucible.toml, else 24)
    #[arg(long)]
    max_hours: Option<f64>,
}

fn main() {
    let cli = Cli::parse();
    logging::init_stderr();

    let exp = ExperimentDir::new(&cli.experiment_dir);
    let mut limits = config::load_config(exp.root()).watchdog;
    if let Some(hours) = cli.max_hours {
        limits.max_hours = hours;
    }
    tracing::debug!(?limits, dir = %exp.root().display(), "watchdog check");

    let outcome = watchdog::run(&exp, &limits, now_epoch_secs());
    match &outcome.verdict {
        Ok(verdict) => println!("Status: {verdict}"),
        Err(e) => println!("Status: unreadable status file ({e})"),
    }

    if let Ok(Verdict::Stop(_)) = &outcome.verdict {
        println!("Creating REPORT.md to stop experiment...");
        match outcome.report {
            Some(Ok(true)) => println!("Experiment will stop on next iteration"),
            Some(Ok(false)) => println!("REPORT.md already exists; experiment will stop on next iteration"),
            Some(Err(e)) => eprintln!("ERROR: could not write REPORT.md: {e}"),
            None => {}
        }
    }
}
