//! Arbiter Replay - runs session scenarios through the pipe selector.
//!
//! Loads a policy, replays the steps of a scenario file against a fresh
//! registry and prints the resulting pipes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod scenario;

use arbiter_core::StaticPolicy;
use arbiter_pipes::{PipeRegistry, PipeSelector};
use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "arbiter-replay")]
#[command(version, about = "Replay audio session scenarios through pipe selection", long_about = None)]
struct Cli {
    /// Scenario file to replay
    #[arg(value_name = "SCENARIO")]
    scenario: PathBuf,

    /// Policy file, defaults to the user config directory
    #[arg(short = 'p', long = "policy", value_name = "PATH")]
    policy: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long = "log-json")]
    log_json: bool,

    /// Print the final pipes as JSON instead of a dump
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).context("Invalid log level")?,
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting arbiter replay");

    let policy = config::load_policy(cli.policy.as_deref())?;
    info!(adapters = policy.adapters.len(), routes = policy.routes.len(), "Policy loaded");

    let scenario = Scenario::load(&cli.scenario)?;

    // Registry first, then the selector that plans against it
    let registry = Arc::new(PipeRegistry::new());
    let selector = PipeSelector::with_policy(Arc::clone(&registry), Arc::new(StaticPolicy::new(policy)));

    scenario.run(&selector);

    if cli.json {
        let pipes = serde_json::to_string_pretty(&registry.get_all()).context("Failed to serialize pipes")?;
        println!("{pipes}");
    } else {
        print!("{}", registry.dump());
    }

    Ok(())
}
