//! Component scopes: nodes that own other nodes for teardown ordering.

use strata_common::error::{Result, StrataError};
use strata_common::types::{NodeId, ResourceKind};
use strata_core::ResourceNode;
use strata_core::graph::CompositionGraph;
use strata_core::producer::{ProvisionContext, producer_fn};

/// Registers a scope node and returns its identity.
///
/// The scope provisions nothing; nodes declaring it as their parent are
/// torn down before it.
///
/// # Errors
///
/// Returns an error if the identity is already registered.
pub fn add_scope(graph: &mut CompositionGraph, id: &str) -> Result<NodeId> {
    let node = ResourceNode::builder(id, ResourceKind::Local).build(producer_fn(
        |ctx: ProvisionContext| async move {
            tracing::debug!(scope = %ctx.node(), "component scope opened");
            Ok::<(), StrataError>(())
        },
    ))?;
    let id = node.id().clone();
    graph.add_node(node)?;
    Ok(id)
}
