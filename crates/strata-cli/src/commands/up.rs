//! `strata up`: Provision the stack and publish its outputs.

use std::path::Path;
use std::sync::Arc;

use clap::Args;
use strata_common::types::NodeId;
use strata_core::producer::Collaborators;
use strata_core::render::ValuesRenderer;
use strata_core::report::RunReport;
use strata_core::Executor;
use strata_stack::StackKind;
use strata_stack::simulate::simulated_backend;

use crate::output::{BOLD, DIM, GREEN, RED, RESET, YELLOW, column_width, format_millis, state_marker};
use crate::stackfile::{deployment_id, prepare};

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Part of the stack to deploy.
    #[arg(long, short, default_value = "full")]
    pub stack: StackKind,

    /// Deployment id (defaults to the stack kind).
    #[arg(long, short)]
    pub deployment: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `up` command.
///
/// Runs the plan against the simulated provisioning profile. Ctrl+C
/// cancels the run; nodes already in flight are reported as cancelled.
/// Outputs that resolved are published to the state directory even when
/// part of the run failed.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the outputs cannot
/// be written, or the run did not succeed.
pub fn execute(args: UpArgs, config: &Path, state_dir: &Path) -> anyhow::Result<()> {
    let deployment = deployment_id(args.deployment.as_deref(), args.stack);
    let prepared = prepare(config, state_dir, args.stack, deployment)?;
    let stack = &prepared.deployment;

    eprintln!();
    eprintln!(
        "  {BOLD}Strata{RESET} {DIM}v{}{RESET} deploying {BOLD}{}{RESET} stack {DIM}({}){RESET}",
        env!("CARGO_PKG_VERSION"),
        stack.kind,
        stack.publisher.deployment()
    );
    eprintln!();

    let collaborators =
        Collaborators::new(Arc::new(simulated_backend())).with_renderer(Arc::new(ValuesRenderer));
    let executor = Executor::new(collaborators, prepared.engine.clone());

    let signal = executor.cancel_signal();
    ctrlc::set_handler(move || signal.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let runtime = tokio::runtime::Runtime::new()?;
    let (report, summary) = runtime.block_on(async {
        let report = executor.run(&stack.plan).await;
        let summary = stack
            .publisher
            .flush(prepared.store.as_ref())
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        anyhow::Ok((report, summary))
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, stack.plan.order().into_iter().map(|id| id.as_str()));
    }

    eprintln!();
    let width = column_width(stack.publisher.names());
    for (name, shown) in stack.publisher.render(false) {
        eprintln!("    {name:<width$}  {shown}");
    }
    for (name, reason) in &summary.unresolved {
        eprintln!("  {YELLOW}not published:{RESET} {name} {DIM}({reason}){RESET}");
    }
    eprintln!();
    eprintln!(
        "  {DIM}Outputs: {}{RESET}",
        prepared.store.path_for(stack.publisher.deployment()).display()
    );

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("run {}", report.status))
    }
}

fn print_report<'a>(report: &RunReport, order: impl Iterator<Item = &'a str>) {
    let elapsed = format_millis(report.elapsed().num_milliseconds());
    if report.is_success() {
        eprintln!(
            "  {GREEN}{BOLD}Provisioned {}{RESET} node(s) in {elapsed}:",
            report.succeeded.len()
        );
    } else {
        eprintln!("  {RED}{BOLD}Run {}{RESET} after {elapsed}:", report.status);
    }
    eprintln!();

    for name in order {
        let id = NodeId::new(name);
        let Some(state) = report.state_of(&id) else { continue };
        let detail = report
            .failure_of(&id)
            .map(|f| format!(" {RED}{}{RESET}", f.cause))
            .or_else(|| {
                report
                    .skipped
                    .iter()
                    .find(|s| s.node == id)
                    .map(|s| format!(" {DIM}blocked by {}{RESET}", s.blocked_by))
            })
            .unwrap_or_default();
        eprintln!("    {} {BOLD}{name}{RESET} {DIM}[{state}]{RESET}{detail}", state_marker(state));
    }
}
