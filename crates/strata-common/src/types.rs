//! Domain primitive types used across the Strata workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// JSON value used as the universal wire form for inputs, outputs and configs.
pub type Value = serde_json::Value;

/// Stable identity of a resource node, unique within a graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of one deployment (one independently-run graph).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Creates a deployment ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random deployment ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Execution state of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Registered but not yet attempted.
    NotStarted,
    /// The producer is running.
    Running,
    /// The producer finished and every declared output settled.
    Done,
    /// The producer failed, timed out, or was cancelled mid-flight.
    Failed,
    /// Not attempted because an upstream node failed.
    Skipped,
    /// Not attempted because the run was cancelled.
    Cancelled,
}

impl NodeState {
    /// Returns whether the node reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a value may be printed or must be redacted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Safe to print.
    #[default]
    Plain,
    /// Must be redacted unless explicitly revealed.
    Secret,
}

impl Sensitivity {
    /// Returns whether this is [`Sensitivity::Secret`].
    #[must_use]
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::Secret)
    }
}

/// Kind of resource a node provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A cloud resource group.
    ResourceGroup,
    /// A managed Kubernetes cluster.
    ManagedCluster,
    /// An extra node pool of a managed cluster.
    AgentPool,
    /// A directory application the cluster authenticates as.
    DirectoryApplication,
    /// The service principal of a directory application.
    ServicePrincipal,
    /// A password credential of a service principal.
    ServicePrincipalPassword,
    /// A generated key pair.
    PrivateKey,
    /// A log analytics workspace.
    LogWorkspace,
    /// A monitoring solution installed into a log workspace.
    MonitoringSolution,
    /// A container registry.
    ContainerRegistry,
    /// A container image built and pushed to a registry.
    ContainerImage,
    /// A role assignment granting one principal access to a resource.
    RoleAssignment,
    /// A managed database server.
    Database,
    /// A chart release installed into a cluster.
    ChartRelease,
    /// A cluster secret object.
    ClusterSecret,
    /// A generated random string (names, suffixes).
    RandomString,
    /// A generated random password.
    RandomPassword,
    /// A read of outputs published by another deployment.
    StackReference,
    /// A node whose producer does not talk to the backend.
    Local,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResourceGroup => "resource-group",
            Self::ManagedCluster => "managed-cluster",
            Self::AgentPool => "agent-pool",
            Self::DirectoryApplication => "directory-application",
            Self::ServicePrincipal => "service-principal",
            Self::ServicePrincipalPassword => "service-principal-password",
            Self::PrivateKey => "private-key",
            Self::LogWorkspace => "log-workspace",
            Self::MonitoringSolution => "monitoring-solution",
            Self::ContainerRegistry => "container-registry",
            Self::ContainerImage => "container-image",
            Self::RoleAssignment => "role-assignment",
            Self::Database => "database",
            Self::ChartRelease => "chart-release",
            Self::ClusterSecret => "cluster-secret",
            Self::RandomString => "random-string",
            Self::RandomPassword => "random-password",
            Self::StackReference => "stack-reference",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}
