//! `strata outputs`: Show the outputs a deployment published.

use std::collections::BTreeMap;
use std::path::Path;

use clap::Args;
use strata_common::types::DeploymentId;
use strata_core::outputs::{JsonFileStore, OutputStore, StoredOutput};

use crate::output::{BOLD, DIM, RESET, column_width};

/// Arguments for the `outputs` command.
#[derive(Args, Debug)]
pub struct OutputsArgs {
    /// Deployment whose outputs to show.
    #[arg(default_value = "full")]
    pub deployment: String,

    /// Print secret values instead of redacting them.
    #[arg(long)]
    pub reveal: bool,

    /// Print a single output's value only.
    #[arg(long, short)]
    pub name: Option<String>,
}

/// Executes the `outputs` command.
///
/// # Errors
///
/// Returns an error if the state directory cannot be read, the deployment
/// published nothing, or the requested output does not exist.
pub fn execute(args: OutputsArgs, state_dir: &Path) -> anyhow::Result<()> {
    let store = JsonFileStore::open(state_dir).map_err(|e| anyhow::anyhow!("{e}"))?;
    let deployment = DeploymentId::new(args.deployment);
    let runtime = tokio::runtime::Runtime::new()?;
    let outputs = runtime
        .block_on(store.list(&deployment))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if outputs.is_empty() {
        return Err(anyhow::anyhow!(
            "no outputs published for deployment \"{deployment}\" in {}",
            state_dir.display()
        ));
    }

    if let Some(name) = args.name {
        let output = outputs
            .get(&name)
            .ok_or_else(|| anyhow::anyhow!("deployment \"{deployment}\" has no output \"{name}\""))?;
        println!("{}", output.display(args.reveal));
        return Ok(());
    }

    println!("{BOLD}Outputs of {deployment}{RESET}");
    println!();
    for line in render_table(&outputs, args.reveal) {
        println!("{line}");
    }
    Ok(())
}

fn render_table(outputs: &BTreeMap<String, StoredOutput>, reveal: bool) -> Vec<String> {
    let width = column_width(outputs.keys().map(String::as_str));
    outputs
        .iter()
        .map(|(name, output)| {
            let secret = if output.sensitivity.is_secret() {
                format!(" {DIM}(secret){RESET}")
            } else {
                String::new()
            };
            format!("  {name:<width$}  {}{secret}", output.display(reveal))
        })
        .collect()
}
