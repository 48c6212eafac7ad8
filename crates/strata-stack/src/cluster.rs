//! Resource group, managed cluster with its identity and insights, node pools, and container registry.

use strata_common::error::Result;
use strata_common::types::{NodeId, ResourceKind};
use strata_core::graph::CompositionGraph;
use strata_core::{Deferred, ResourceNode, Sensitive};

use crate::scope::add_scope;
use crate::settings::ClusterSettings;

/// Scope owning the cluster and its credentials.
pub const CLUSTER_SCOPE: &str = "aks";

/// Name of the cluster's agent pool, also used as the node selector of workloads.
pub const AGENT_POOL: &str = "agentpool";

/// Built-in role allowing image pulls from a registry.
const ACR_PULL_ROLE: &str =
    "/providers/Microsoft.Authorization/roleDefinitions/7f951dda-4ed3-4680-a7ca-43fe172d538d";

/// Admin user of the cluster's Linux nodes.
const ADMIN_USER: &str = "adminuser";

/// Expiry of the service principal password.
const SP_PASSWORD_END_DATE: &str = "2099-01-01T00:00:00Z";

/// Values the managed cluster exposes to later stages.
#[derive(Debug, Clone)]
pub struct ClusterOutputs {
    /// Identity of the cluster node.
    pub id: NodeId,
    /// Scope owning the cluster.
    pub scope: NodeId,
    /// Admin kubeconfig, fetched once the cluster exists.
    pub kubeconfig: Sensitive<String>,
    /// Object id of the kubelet identity.
    pub principal_id: Deferred<String>,
}

/// Values the container registry exposes to later stages.
#[derive(Debug, Clone)]
pub struct RegistryOutputs {
    /// Registry login server host.
    pub login_server: Deferred<String>,
    /// Admin user name.
    pub admin_username: Deferred<String>,
    /// Admin password.
    pub admin_password: Sensitive<String>,
}

/// Registers the generated resource group and returns its name.
///
/// The name is `t-` followed by a generated six-character suffix.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_resource_group(graph: &mut CompositionGraph, owner: Option<&str>) -> Result<Deferred<String>> {
    let mut suffix = ResourceNode::builder("resource-group-name", ResourceKind::RandomString)
        .input("length", 6u32)
        .input("special", false)
        .input("upper", false);
    let generated: Deferred<String> = suffix.output("result");
    graph.add_node(suffix.build_resource()?)?;

    let mut group = ResourceNode::builder("resource-group", ResourceKind::ResourceGroup)
        .input("resourceGroupName", &generated.map(|s| format!("t-{s}")));
    if let Some(owner) = owner {
        group = group.input("tags.Owner", owner);
    }
    let name: Deferred<String> = group.output("name");
    graph.add_node(group.build_resource()?)?;
    Ok(name)
}

/// Registers the managed cluster with its identity, SSH key and insights.
///
/// The cluster authenticates as a directory application whose service
/// principal password is generated. Container insights go to a log
/// workspace named after the resource group.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_cluster(
    graph: &mut CompositionGraph,
    settings: &ClusterSettings,
    resource_group: &Deferred<String>,
) -> Result<ClusterOutputs> {
    let scope = add_scope(graph, CLUSTER_SCOPE)?;

    let mut app = ResourceNode::builder("aks-app", ResourceKind::DirectoryApplication).parent(&scope);
    let application_id: Deferred<String> = app.output("applicationId");
    graph.add_node(app.build_resource()?)?;

    let mut principal = ResourceNode::builder("aks-sp", ResourceKind::ServicePrincipal)
        .parent(&scope)
        .input("applicationId", &application_id);
    let principal_id: Deferred<String> = principal.output("id");
    graph.add_node(principal.build_resource()?)?;

    let mut password = ResourceNode::builder("aks-password", ResourceKind::RandomPassword)
        .parent(&scope)
        .input("length", 20u32)
        .input("special", true);
    let generated: Sensitive<String> = password.secret_output("result");
    graph.add_node(password.build_resource()?)?;

    let mut credential = ResourceNode::builder("aks-sp-password", ResourceKind::ServicePrincipalPassword)
        .parent(&scope)
        .input("servicePrincipalId", &principal_id)
        .input("value", &generated)
        .input("endDate", SP_PASSWORD_END_DATE);
    let sp_password: Sensitive<String> = credential.secret_output("value");
    graph.add_node(credential.build_resource()?)?;

    let mut key = ResourceNode::builder("aks-ssh-key", ResourceKind::PrivateKey)
        .parent(&scope)
        .input("algorithm", "RSA")
        .input("rsaBits", 4096u32);
    let public_key: Deferred<String> = key.output("publicKeyOpenssh");
    graph.add_node(key.build_resource()?)?;

    let mut cluster = ResourceNode::builder("aks-cluster", ResourceKind::ManagedCluster)
        .parent(&scope)
        .input("resourceGroupName", resource_group)
        .input("resourceName", &cluster_name(resource_group))
        .input("dnsPrefix", &resource_group.map(|rg| format!("{rg}aks")))
        .input("nodeResourceGroup", &resource_group.map(|rg| format!("MC_{rg}-aks")))
        .input("kubernetesVersion", settings.kubernetes_version.as_str())
        .input("enableRBAC", true)
        .input("identity.type", "SystemAssigned")
        .input("addonProfiles.KubeDashboard.enabled", true)
        .input("agentPool.name", AGENT_POOL)
        .input("agentPool.count", settings.vm_count)
        .input("agentPool.vmSize", settings.vm_size.as_str())
        .input("agentPool.maxPods", 110u32)
        .input("agentPool.osDiskSizeGB", 30u32)
        .input("agentPool.mode", "System")
        .input("agentPool.osType", "Linux")
        .input("agentPool.type", "VirtualMachineScaleSets")
        .input("linuxProfile.adminUsername", ADMIN_USER)
        .input("linuxProfile.ssh.publicKey", &public_key)
        .input("servicePrincipal.clientId", &application_id)
        .input("servicePrincipal.secret", &sp_password);
    let kubelet_id: Deferred<String> = cluster.output("kubeletPrincipalId");
    let kubeconfig: Sensitive<String> = cluster.secret_read_output("kubeconfig");
    let cluster = cluster.build_resource()?;
    let id = cluster.id().clone();
    graph.add_node(cluster)?;

    add_insights(graph, &scope, resource_group)?;

    Ok(ClusterOutputs {
        id,
        scope,
        kubeconfig,
        principal_id: kubelet_id,
    })
}

fn add_insights(graph: &mut CompositionGraph, scope: &NodeId, resource_group: &Deferred<String>) -> Result<()> {
    let mut workspace = ResourceNode::builder("aks-workspace", ResourceKind::LogWorkspace)
        .parent(scope)
        .input("resourceGroupName", resource_group)
        .input("workspaceName", resource_group)
        .input("retentionInDays", 30u32)
        .input("sku.name", "PerGB2018");
    let workspace_id: Deferred<String> = workspace.output("id");
    let workspace_name: Deferred<String> = workspace.output("name");
    graph.add_node(workspace.build_resource()?)?;

    let solution_name = workspace_name.map(|name| format!("ContainerInsights({name})"));
    let solution = ResourceNode::builder("aks-insights", ResourceKind::MonitoringSolution)
        .parent(scope)
        .input("solutionName", &solution_name)
        .input("resourceGroupName", resource_group)
        .input("properties.workspaceResourceId", &workspace_id)
        .input("plan.name", &solution_name)
        .input("plan.publisher", "Microsoft")
        .input("plan.product", "OMSGallery/ContainerInsights")
        .input("plan.promotionCode", "");
    graph.add_node(solution.build_resource()?)?;
    Ok(())
}

/// An extra node pool reserved for one workload through a `target` taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePool {
    /// Pool name.
    pub name: &'static str,
    /// Value of the `target` label and taint.
    pub target: &'static str,
    /// VM size of the pool.
    pub vm_size: &'static str,
    /// Number of VMs.
    pub vm_count: u32,
}

/// Pools of the datastore stage.
pub const DATASTORE_POOLS: [NodePool; 2] = [
    NodePool {
        name: "casspool",
        target: "cassandra",
        vm_size: "Standard_DS4_v2",
        vm_count: 3,
    },
    NodePool {
        name: "elasticpool",
        target: "elastic",
        vm_size: "Standard_DS2_v2",
        vm_count: 3,
    },
];

/// Registers `pools` on the cluster and returns their identities, in order.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_node_pools(
    graph: &mut CompositionGraph,
    resource_group: &Deferred<String>,
    cluster: &ClusterOutputs,
    pools: &[NodePool],
) -> Result<Vec<NodeId>> {
    let mut ids = Vec::with_capacity(pools.len());
    for pool in pools {
        let node = ResourceNode::builder(pool.name, ResourceKind::AgentPool)
            .parent(&cluster.scope)
            .after(&cluster.id)
            .input("resourceGroupName", resource_group)
            .input("resourceName", &cluster_name(resource_group))
            .input("agentPoolName", pool.name)
            .input("count", pool.vm_count)
            .input("vmSize", pool.vm_size)
            .input("mode", "User")
            .input("osType", "Linux")
            .input("nodeLabels.target", pool.target)
            .input("nodeTaints", serde_json::json!([format!("target={}:NoSchedule", pool.target)]))
            .build_resource()?;
        ids.push(node.id().clone());
        graph.add_node(node)?;
    }
    Ok(ids)
}

fn cluster_name(resource_group: &Deferred<String>) -> Deferred<String> {
    resource_group.map(|rg| format!("{rg}-aks"))
}

/// Registers the container registry and grants the cluster pull access to it.
///
/// The registry is named after the resource group with dashes removed.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_registry(
    graph: &mut CompositionGraph,
    resource_group: &Deferred<String>,
    principal_id: &Deferred<String>,
) -> Result<RegistryOutputs> {
    let mut registry = ResourceNode::builder("registry", ResourceKind::ContainerRegistry)
        .input("resourceGroupName", resource_group)
        .input("registryName", &resource_group.map(|rg| rg.replace('-', "")))
        .input("sku.name", "Basic")
        .input("adminUserEnabled", true);
    let registry_id: Deferred<String> = registry.output("id");
    let login_server: Deferred<String> = registry.output("loginServer");
    let admin_username: Deferred<String> = registry.read_output("adminUsername");
    let admin_password: Sensitive<String> = registry.secret_read_output("adminPassword");
    graph.add_node(registry.build_resource()?)?;

    let access = ResourceNode::builder("registry-access", ResourceKind::RoleAssignment)
        .input("principalId", principal_id)
        .input("principalType", "ServicePrincipal")
        .input("roleDefinitionId", ACR_PULL_ROLE)
        .input("scope", &registry_id);
    graph.add_node(access.build_resource()?)?;

    Ok(RegistryOutputs {
        login_server,
        admin_username,
        admin_password,
    })
}
