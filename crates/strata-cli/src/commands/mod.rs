//! CLI command definitions and dispatch.

pub mod outputs;
pub mod plan;
pub mod up;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_common::constants::{DEFAULT_CONFIG_FILE, DEFAULT_STATE_DIR};

/// Strata: infrastructure composition for the workflow-orchestration stack.
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the stack configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory holding published deployment outputs.
    #[arg(long, global = true, env = "STRATA_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Log at debug level regardless of `RUST_LOG`.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration and display the execution plan.
    Plan(plan::PlanArgs),
    /// Provision the stack and publish its outputs.
    Up(up::UpArgs),
    /// Show the outputs published by a deployment.
    Outputs(outputs::OutputsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Plan(args) => plan::execute(args, &cli.config, &cli.state_dir),
        Command::Up(args) => up::execute(args, &cli.config, &cli.state_dir),
        Command::Outputs(args) => outputs::execute(args, &cli.state_dir),
    }
}
