//! Typed views of the flat stack configuration.
//!
//! Every stage reads its settings before any node is registered, so a
//! missing or malformed key fails the deployment before provisioning starts.

use std::path::PathBuf;

use strata_common::config::ConfigMap;
use strata_common::error::Result;
use strata_common::types::DeploymentId;

use crate::storage::StorageBackend;
use crate::visibility::Visibility;

/// Default location of the orchestration chart.
pub const DEFAULT_TEMPORAL_CHART: &str = "../helm-charts";

/// Default location of the benchmark chart.
pub const DEFAULT_BENCH_CHART: &str = "../helm-chart";

/// Default build context of the benchmark image.
pub const DEFAULT_BENCH_CONTEXT: &str = "../worker";

/// Managed cluster settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Kubernetes version of the cluster.
    pub kubernetes_version: String,
    /// VM size of the agent pool.
    pub vm_size: String,
    /// Number of agent pool VMs.
    pub vm_count: u32,
    /// Owner tag put on the resource group.
    pub owner: Option<String>,
}

impl ClusterSettings {
    /// Reads `aks.version`, `aks.vmsize`, `aks.vmcount` and the optional `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is absent or malformed.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        Ok(Self {
            kubernetes_version: config.require_str("aks.version")?,
            vm_size: config.require_str("aks.vmsize")?,
            vm_count: config.require_u32("aks.vmcount")?,
            owner: config.get_str("owner")?,
        })
    }
}

/// Orchestration chart settings.
#[derive(Debug, Clone)]
pub struct OrchestrationSettings {
    /// Orchestration server version.
    pub version: String,
    /// Persistence backend.
    pub storage: StorageBackend,
    /// Visibility store.
    pub visibility: Visibility,
    /// History shard count, left to the chart when unset.
    pub num_history_shards: Option<u32>,
    /// Local chart path.
    pub chart: PathBuf,
}

impl OrchestrationSettings {
    /// Reads `temporal.version`, the storage and visibility axes,
    /// `server.numHistoryShards` and `charts.temporal`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is absent, malformed, or names an
    /// unknown variant.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        Ok(Self {
            version: config.require_str("temporal.version")?,
            storage: StorageBackend::from_config(config)?,
            visibility: Visibility::from_config(config)?,
            num_history_shards: config.get_u32("server.numHistoryShards")?,
            chart: chart_path(config, "charts.temporal", DEFAULT_TEMPORAL_CHART)?,
        })
    }
}

/// Benchmark workload settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchSettings {
    /// Local chart path.
    pub chart: PathBuf,
    /// Build context of the benchmark image.
    pub context: String,
}

impl BenchSettings {
    /// Reads the optional `charts.bench` and `bench.context`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is malformed.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        Ok(Self {
            chart: chart_path(config, "charts.bench", DEFAULT_BENCH_CHART)?,
            context: config
                .get_str("bench.context")?
                .unwrap_or_else(|| DEFAULT_BENCH_CONTEXT.to_owned()),
        })
    }
}

/// Deployments a split stack reads outputs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct References {
    /// Deployment holding the cluster and registry (`k8s-stack-ref`).
    pub cluster: DeploymentId,
    /// Deployment holding the orchestration chart (`orchestration-stack-ref`).
    pub orchestration: Option<DeploymentId>,
}

impl References {
    /// Reads `k8s-stack-ref`, and `orchestration-stack-ref` when `with_orchestration`.
    ///
    /// # Errors
    ///
    /// Returns [`strata_common::error::StrataError::MissingConfig`] for an
    /// absent reference.
    pub fn from_config(config: &ConfigMap, with_orchestration: bool) -> Result<Self> {
        let cluster = DeploymentId::new(config.require_str("k8s-stack-ref")?);
        let orchestration = if with_orchestration {
            Some(DeploymentId::new(config.require_str("orchestration-stack-ref")?))
        } else {
            None
        };
        Ok(Self {
            cluster,
            orchestration,
        })
    }
}

fn chart_path(config: &ConfigMap, key: &str, default: &str) -> Result<PathBuf> {
    Ok(config
        .get_str(key)?
        .map_or_else(|| PathBuf::from(default), PathBuf::from))
}
