//! Full and split deployments of the stack.
//!
//! The `full` stack provisions everything in one graph. The split stacks
//! (`cluster`, `orchestration`, `bench`) each provision one stage and read
//! the outputs of the earlier stages through stack references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_common::config::ConfigMap;
use strata_common::error::{Result, StrataError};
use strata_common::types::{DeploymentId, Sensitivity};
use strata_core::graph::{CompositionGraph, ExecutionPlan};
use strata_core::outputs::{OutputLookup, StackOutputPublisher, StackReference};
use strata_core::variant::ConfigVariantResolver;

use crate::bench::add_bench;
use crate::cluster::{
    ClusterOutputs, DATASTORE_POOLS, RegistryOutputs, add_cluster, add_node_pools, add_registry,
    add_resource_group,
};
use crate::datastores::{DatastoreOutputs, add_datastores};
use crate::orchestration::{Backing, add_orchestration, publish_orchestration};
use crate::settings::{BenchSettings, ClusterSettings, OrchestrationSettings, References};
use crate::storage::StorageBackend;
use crate::visibility::Visibility;

/// Which part of the stack a deployment provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    /// Cluster, orchestration, and benchmark in one graph.
    Full,
    /// Resource group, cluster, registry, datastores, and monitoring.
    Cluster,
    /// Orchestration chart on a cluster provisioned by another deployment,
    /// using that deployment's datastores.
    Orchestration,
    /// Benchmark on a cluster and orchestration provisioned elsewhere.
    Bench,
}

impl StackKind {
    /// Every stack kind.
    pub const ALL: [Self; 4] = [Self::Full, Self::Cluster, Self::Orchestration, Self::Bench];

    /// Lowercase name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Cluster => "cluster",
            Self::Orchestration => "orchestration",
            Self::Bench => "bench",
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StrataError::InvalidConfig {
                key: "stack".into(),
                message: format!("unknown stack kind \"{s}\""),
            })
    }
}

/// A planned deployment and the outputs it will publish.
#[derive(Debug)]
pub struct StackDeployment {
    /// Which part of the stack is deployed.
    pub kind: StackKind,
    /// Validated execution plan.
    pub plan: ExecutionPlan,
    /// Outputs published once the run completes.
    pub publisher: StackOutputPublisher,
}

/// Resolver handling every storage and visibility variant.
pub fn default_resolver() -> ConfigVariantResolver {
    ConfigVariantResolver::new()
        .handle::<StorageBackend>()
        .handle::<Visibility>()
}

/// Assembles a deployment with [`default_resolver`].
///
/// # Errors
///
/// See [`assemble_with`].
pub fn assemble(
    kind: StackKind,
    deployment: DeploymentId,
    config: &ConfigMap,
    lookup: &OutputLookup,
) -> Result<StackDeployment> {
    assemble_with(&default_resolver(), kind, deployment, config, lookup)
}

/// Validates the configuration of `kind` and assembles its execution plan.
///
/// No provisioning call is made; `lookup` is only captured by the stack
/// references of the split kinds.
///
/// # Errors
///
/// Returns a build-time error for missing or malformed configuration,
/// unhandled variants, conflicting chart values, or an invalid graph.
pub fn assemble_with(
    resolver: &ConfigVariantResolver,
    kind: StackKind,
    deployment: DeploymentId,
    config: &ConfigMap,
    lookup: &OutputLookup,
) -> Result<StackDeployment> {
    let mut graph = CompositionGraph::new();
    let mut publisher = StackOutputPublisher::new(deployment);

    match kind {
        StackKind::Full => {
            let cluster_settings = ClusterSettings::from_config(config)?;
            let orchestration_settings = OrchestrationSettings::from_config(config)?;
            let bench_settings = BenchSettings::from_config(config)?;

            let group = add_resource_group(&mut graph, cluster_settings.owner.as_deref())?;
            let cluster = add_cluster(&mut graph, &cluster_settings, &group)?;
            let registry = add_registry(&mut graph, &group, &cluster.principal_id)?;
            let orchestration =
                add_orchestration(
                    &mut graph,
                    resolver,
                    &orchestration_settings,
                    &cluster.kubeconfig,
                    Backing::Bundled,
                )?;
            let _ = add_bench(
                &mut graph,
                &bench_settings,
                &cluster.kubeconfig,
                &registry,
                &orchestration.frontend_address,
            )?;
            publish_orchestration(&mut publisher, &orchestration)?;
        }
        StackKind::Cluster => {
            let settings = ClusterSettings::from_config(config)?;

            let group = add_resource_group(&mut graph, settings.owner.as_deref())?;
            let cluster = add_cluster(&mut graph, &settings, &group)?;
            let registry = add_registry(&mut graph, &group, &cluster.principal_id)?;
            let pools = add_node_pools(&mut graph, &group, &cluster, &DATASTORE_POOLS)?;
            let datastores = add_datastores(&mut graph, &cluster.kubeconfig, &pools)?;
            publish_cluster(&mut publisher, &cluster, &registry, &datastores)?;
        }
        StackKind::Orchestration => {
            let references = References::from_config(config, false)?;
            let settings = OrchestrationSettings::from_config(config)?;

            let mut k8s = StackReference::new("k8s-stack", references.cluster, lookup.clone());
            let kubeconfig = k8s.require_secret::<String>("kubeconfig");
            graph.add_node(k8s.into_node()?)?;

            let orchestration =
                add_orchestration(&mut graph, resolver, &settings, &kubeconfig, Backing::Shared)?;
            publish_orchestration(&mut publisher, &orchestration)?;
        }
        StackKind::Bench => {
            let references = References::from_config(config, true)?;
            let settings = BenchSettings::from_config(config)?;
            let orchestration_ref = references.orchestration.ok_or_else(|| StrataError::MissingConfig {
                key: "orchestration-stack-ref".into(),
            })?;

            let mut k8s = StackReference::new("k8s-stack", references.cluster, lookup.clone());
            let kubeconfig = k8s.require_secret::<String>("kubeconfig");
            let registry = RegistryOutputs {
                login_server: k8s.require_output("registryLoginServer"),
                admin_username: k8s.require_output("registryAdminUsername"),
                admin_password: k8s.require_secret("registryAdminPassword"),
            };
            graph.add_node(k8s.into_node()?)?;

            let mut temporal = StackReference::new("orchestration-stack", orchestration_ref, lookup.clone());
            let frontend_address = temporal.require_output::<String>("frontendAddress");
            graph.add_node(temporal.into_node()?)?;

            let _ = add_bench(&mut graph, &settings, &kubeconfig, &registry, &frontend_address)?;
        }
    }

    let plan = graph.build()?;
    tracing::info!(
        stack = %kind,
        deployment = %publisher.deployment(),
        nodes = plan.len(),
        "stack assembled"
    );
    Ok(StackDeployment {
        kind,
        plan,
        publisher,
    })
}

fn publish_cluster(
    publisher: &mut StackOutputPublisher,
    cluster: &ClusterOutputs,
    registry: &RegistryOutputs,
    datastores: &DatastoreOutputs,
) -> Result<()> {
    publisher.publish("kubeconfig", &cluster.kubeconfig, Sensitivity::Secret)?;
    publisher.publish("kubeletPrincipalId", &cluster.principal_id, Sensitivity::Plain)?;
    publisher.publish("registryLoginServer", &registry.login_server, Sensitivity::Plain)?;
    publisher.publish("registryAdminUsername", &registry.admin_username, Sensitivity::Plain)?;
    publisher.publish("registryAdminPassword", &registry.admin_password, Sensitivity::Secret)?;
    publisher.publish("grafanaPassword", &datastores.grafana_password, Sensitivity::Secret)?;
    Ok(())
}
