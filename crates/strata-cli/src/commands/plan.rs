//! `strata plan`: Display the execution plan without provisioning anything.

use std::path::Path;

use clap::Args;
use strata_core::ExecutionPlan;
use strata_stack::StackKind;

use crate::output::{BOLD, CYAN, DIM, RESET};
use crate::stackfile::{deployment_id, prepare};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Part of the stack to plan.
    #[arg(long, short, default_value = "full")]
    pub stack: StackKind,

    /// Deployment id (defaults to the stack kind).
    #[arg(long, short)]
    pub deployment: Option<String>,
}

/// Executes the `plan` command.
///
/// Validates the configuration, builds the graph, and displays the
/// provisioning order, parent scopes, and teardown order.
///
/// # Errors
///
/// Returns an error if the configuration or the graph is invalid.
pub fn execute(args: PlanArgs, config: &Path, state_dir: &Path) -> anyhow::Result<()> {
    let deployment = deployment_id(args.deployment.as_deref(), args.stack);
    let prepared = prepare(config, state_dir, args.stack, deployment)?;
    let stack = &prepared.deployment;

    println!(
        "{BOLD}Execution plan{RESET} for {} stack {DIM}({}){RESET}",
        stack.kind,
        stack.publisher.deployment()
    );
    println!();
    print_order(&stack.plan);

    println!();
    println!("  {} node(s) will be provisioned.", stack.plan.len());

    println!();
    println!("  {BOLD}Teardown order:{RESET}");
    for id in stack.plan.teardown_order() {
        println!("    - {id}");
    }

    let names: Vec<&str> = stack.publisher.names().collect();
    if !names.is_empty() {
        println!();
        println!("  {BOLD}Outputs:{RESET} {}", names.join(", "));
    }
    Ok(())
}

fn print_order(plan: &ExecutionPlan) {
    for id in plan.order() {
        let Some(node) = plan.node(id) else { continue };
        println!("  + {BOLD}{id}{RESET} {DIM}[{}]{RESET}", node.kind());
        if let Some(parent) = node.parent() {
            println!("      parent: {parent}");
        }
        let deps = plan.dependencies_of(id);
        if !deps.is_empty() {
            let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
            println!("      {CYAN}after:{RESET} {}", deps.join(", "));
        }
    }
}
