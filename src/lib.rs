pub mod assistant;
pub mod compute;
pub mod config;
pub mod experiment;
pub mod logging;
pub mod process;
pub mod prompt;
pub mod ratelimit;
pub mod resources;
pub mod retry;
pub mod runner;
pub mod signals;
pub mod status;
pub mod watchdog;
