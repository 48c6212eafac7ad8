//! The orchestration chart, its storage secret, and its endpoints.

use strata_common::error::Result;
use strata_common::types::{NodeId, ResourceKind, Sensitivity};
use strata_core::graph::CompositionGraph;
use strata_core::outputs::StackOutputPublisher;
use strata_core::producer::InstallChart;
use strata_core::variant::{ConfigVariantResolver, InputBundle};
use strata_core::{Deferred, ResourceNode, Sensitive};

use crate::cluster::AGENT_POOL;
use crate::datastores::{CASSANDRA_HOST, CASSANDRA_PORT, ELASTICSEARCH_HOST};
use crate::scope::add_scope;
use crate::settings::OrchestrationSettings;
use crate::storage::{MySqlStore, StorageBackend};

/// Scope owning the chart and its generated credentials.
pub const ORCHESTRATION_SCOPE: &str = "temporal";

/// Frontend gRPC port.
pub const FRONTEND_PORT: u16 = 7233;

/// Web UI port.
pub const WEB_PORT: u16 = 8088;

/// Name of the secret holding the MySQL password.
pub const STORE_SECRET: &str = "temporal-default-store";

/// Operator commands published when the chart bundles its own datastores.
pub const BUNDLED_KUBECTL_COMMANDS: &[(&str, &str)] = &[
    (
        "kubectl.frontendPortForward",
        "kubectl port-forward services/helm-temporal-frontend 7000:7233",
    ),
    (
        "kubectl.grafanaPortForward",
        "kubectl port-forward services/helm-grafana 8081:80",
    ),
    (
        "kubectl.elasticSearchPortForward",
        "kubectl port-forward services/elasticsearch-master 9200:9200",
    ),
    (
        "kubectl.logs",
        "kubectl logs -l app.kubernetes.io/name=temporal-bench --follow",
    ),
];

/// Operator commands published when the chart uses the cluster's datastores.
pub const KUBECTL_COMMANDS: &[(&str, &str)] = &[
    (
        "kubectl.frontendPortForward",
        "kubectl port-forward services/helm-temporal-frontend 7000:7233",
    ),
    (
        "kubectl.grafanaPortForward",
        "kubectl port-forward services/grafana 8081:80",
    ),
    (
        "kubectl.prometheusPortForward",
        "kubectl port-forward services/prometheus-server 9090:80",
    ),
    (
        "kubectl.elasticSearchPortForward",
        "kubectl port-forward services/elasticsearch-master 9200:9200",
    ),
    (
        "kubectl.cassandraPortForward",
        "kubectl port-forward services/cass-cassandra 9042:9042",
    ),
    (
        "kubectl.logs",
        "kubectl logs -l app.kubernetes.io/name=temporal-bench --follow",
    ),
];

/// Local Grafana endpoint reached through the port-forward.
pub const GRAFANA_ENDPOINT: &str = "http://localhost:8081";

/// Where the chart finds its datastores and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// The chart installs its own Cassandra, Elasticsearch and Grafana.
    Bundled,
    /// The services of [`crate::datastores`], installed by the cluster stack.
    Shared,
}

impl Backing {
    /// Operator commands matching the services of this backing.
    pub const fn kubectl_commands(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Bundled => BUNDLED_KUBECTL_COMMANDS,
            Self::Shared => KUBECTL_COMMANDS,
        }
    }
}

/// Values the orchestration chart exposes.
#[derive(Debug, Clone)]
pub struct OrchestrationOutputs {
    /// Datastores the chart was configured against.
    pub backing: Backing,
    /// `<frontend cluster IP>:7233`.
    pub frontend_address: Deferred<String>,
    /// `http://<web load balancer IP>:8088`.
    pub web_endpoint: Deferred<String>,
    /// Generated Grafana admin password; the cluster stack owns it when shared.
    pub grafana_password: Option<Sensitive<String>>,
}

/// Registers the orchestration chart.
///
/// Storage and visibility are resolved through `resolver` and merged with
/// the base chart values; a key set to two different values fails the build.
/// With [`Backing::Shared`] the chart's own datastores and monitoring are
/// disabled and persistence points at the cluster's Cassandra.
///
/// # Errors
///
/// Returns [`strata_common::error::StrataError::UnhandledVariant`] if the
/// resolver does not handle a configured variant,
/// [`strata_common::error::StrataError::ConflictingKey`] on clashing values,
/// or an error if a node cannot be registered.
pub fn add_orchestration(
    graph: &mut CompositionGraph,
    resolver: &ConfigVariantResolver,
    settings: &OrchestrationSettings,
    kubeconfig: &Sensitive<String>,
    backing: Backing,
) -> Result<OrchestrationOutputs> {
    let storage = resolver.resolve(&settings.storage)?;
    let visibility = resolver.resolve(&settings.visibility)?;

    let scope = add_scope(graph, ORCHESTRATION_SCOPE)?;

    let (grafana_password, backing_values) = match backing {
        Backing::Bundled => {
            let mut password = ResourceNode::builder("grafana-password", ResourceKind::RandomPassword)
                .parent(&scope)
                .input("length", 12u32);
            let grafana_password: Sensitive<String> = password.secret_output("result");
            graph.add_node(password.build_resource()?)?;
            let values = InputBundle::new().with("grafana.adminPassword", &grafana_password);
            (Some(grafana_password), values)
        }
        Backing::Shared => (None, shared_values(settings)),
    };

    let values = ConfigVariantResolver::merge([base_values(settings), backing_values, storage, visibility])?;

    let mut chart = ResourceNode::builder("temporal-chart", ResourceKind::ChartRelease)
        .parent(&scope)
        .input("kubeconfig", kubeconfig)
        .input("version", settings.version.as_str())
        .values(values);
    match &settings.storage {
        StorageBackend::MySql(store) => {
            let secret = add_store_secret(graph, &scope, kubeconfig, store)?;
            chart = chart.after(&secret);
        }
        StorageBackend::Cassandra { .. } => {}
    }
    let frontend_ip: Deferred<String> = chart.output("frontendIp");
    let web_ip: Deferred<String> = chart.read_output("webIp");
    graph.add_node(chart.build(InstallChart::new(settings.chart.clone()))?)?;

    Ok(OrchestrationOutputs {
        backing,
        frontend_address: frontend_ip.map(|ip| format!("{ip}:{FRONTEND_PORT}")),
        web_endpoint: web_ip.map(|ip| format!("http://{ip}:{WEB_PORT}")),
        grafana_password,
    })
}

/// Publishes the endpoints, the Grafana password and the operator commands.
///
/// # Errors
///
/// Returns an error if a name is already published.
pub fn publish_orchestration(
    publisher: &mut StackOutputPublisher,
    outputs: &OrchestrationOutputs,
) -> Result<()> {
    publisher.publish("frontendAddress", &outputs.frontend_address, Sensitivity::Plain)?;
    publisher.publish("webEndpoint", &outputs.web_endpoint, Sensitivity::Plain)?;
    publisher.publish_static("grafanaEndpoint", GRAFANA_ENDPOINT)?;
    if let Some(password) = &outputs.grafana_password {
        publisher.publish("grafanaPassword", password, Sensitivity::Secret)?;
    }
    for (name, command) in outputs.backing.kubectl_commands() {
        publisher.publish_static(name, *command)?;
    }
    Ok(())
}

fn base_values(settings: &OrchestrationSettings) -> InputBundle {
    let bundle = InputBundle::new()
        .with("web.service.type", "LoadBalancer")
        .with("server.nodeSelector.agentpool", AGENT_POOL)
        .with("kafka.enabled", false);
    match settings.num_history_shards {
        Some(shards) => bundle.with("server.config.numHistoryShards", shards),
        None => bundle,
    }
}

fn shared_values(settings: &OrchestrationSettings) -> InputBundle {
    let mut bundle = InputBundle::new()
        .with("cassandra.enabled", false)
        .with("prometheus.enabled", false)
        .with("grafana.enabled", false)
        .with("elasticsearch.external", true)
        .with("elasticsearch.host", ELASTICSEARCH_HOST)
        .with("elasticsearch.port", "9200")
        .with("elasticsearch.version", "v7")
        .with("elasticsearch.scheme", "http")
        .with("elasticsearch.logLevel", "error");
    if matches!(settings.storage, StorageBackend::Cassandra { .. }) {
        let keyspace = settings
            .num_history_shards
            .map_or_else(|| "temporal".to_owned(), |shards| format!("temporal{shards}"));
        for (store, keyspace) in [("default", keyspace.as_str()), ("visibility", "temporal_visibility")] {
            let prefix = format!("server.config.persistence.{store}.cassandra");
            bundle = bundle
                .with(format!("{prefix}.hosts"), serde_json::json!([CASSANDRA_HOST]))
                .with(format!("{prefix}.port"), u32::from(CASSANDRA_PORT))
                .with(format!("{prefix}.keyspace"), keyspace)
                .with(format!("{prefix}.user"), "user")
                .with(format!("{prefix}.password"), "password")
                .with(format!("{prefix}.existingSecret"), "")
                .with(format!("{prefix}.replicationFactor"), 1u32)
                .with(format!("{prefix}.consistency.default.consistency"), "local_quorum")
                .with(format!("{prefix}.consistency.default.serialConsistency"), "local_serial");
        }
    }
    bundle
}

fn add_store_secret(
    graph: &mut CompositionGraph,
    scope: &NodeId,
    kubeconfig: &Sensitive<String>,
    store: &MySqlStore,
) -> Result<NodeId> {
    let secret = ResourceNode::builder(STORE_SECRET, ResourceKind::ClusterSecret)
        .parent(scope)
        .input("kubeconfig", kubeconfig)
        .input("metadata.name", STORE_SECRET)
        .input("metadata.namespace", "default")
        .input(
            "metadata.labels",
            serde_json::json!({ "app.kubernetes.io/name": "temporal" }),
        )
        .input("type", "Opaque")
        .input("stringData.password", &store.password)
        .build_resource()?;
    let id = secret.id().clone();
    graph.add_node(secret)?;
    Ok(id)
}
