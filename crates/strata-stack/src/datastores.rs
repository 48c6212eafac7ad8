//! Datastores and monitoring deployed next to the cluster.
//!
//! The split `cluster` stack installs Cassandra and Elasticsearch on their
//! dedicated node pools, plus Prometheus and a Grafana preloaded with the
//! orchestration dashboards. The split `orchestration` stack then points its
//! chart at these services instead of bundling its own.

use serde_json::json;
use strata_common::error::Result;
use strata_common::types::{NodeId, ResourceKind};
use strata_core::graph::CompositionGraph;
use strata_core::variant::InputBundle;
use strata_core::{ResourceNode, Sensitive};

use crate::scope::add_scope;

/// Scope owning the datastore and monitoring charts.
pub const DATASTORE_SCOPE: &str = "datastores";

/// Cassandra service the orchestration chart connects to.
pub const CASSANDRA_HOST: &str = "cass-cassandra.default.svc.cluster.local";

/// Cassandra native protocol port.
pub const CASSANDRA_PORT: u16 = 9042;

/// Headless Elasticsearch service used for visibility.
pub const ELASTICSEARCH_HOST: &str = "elasticsearch-master-headless";

/// Name of the Prometheus datasource the dashboards read from.
const METRICS_DATASOURCE: &str = "TemporalMetrics";

const DASHBOARD_BASE: &str = "https://raw.githubusercontent.com/temporalio/temporal-dashboards/master/dashboards";

/// Dashboards provisioned into Grafana, by name and file.
const DASHBOARDS: &[(&str, &str)] = &[
    ("frontend-github", "frontend.json"),
    ("temporal-github", "temporal.json"),
    ("history-github", "history.json"),
    ("matching-github", "matching.json"),
    ("clusteroverview-github", "10000.json"),
    ("common-github", "common.json"),
];

/// A chart fetched from a remote repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChart {
    /// Node identity and release name.
    pub release: &'static str,
    /// Repository URL.
    pub repo: &'static str,
    /// Chart name within the repository.
    pub chart: &'static str,
    /// Pinned chart version.
    pub version: &'static str,
}

/// Cassandra release; its service is `cass-cassandra`.
pub const CASSANDRA_CHART: RemoteChart = RemoteChart {
    release: "cass",
    repo: "https://charts.helm.sh/incubator",
    chart: "cassandra",
    version: "0.14.3",
};

/// Elasticsearch release.
pub const ELASTICSEARCH_CHART: RemoteChart = RemoteChart {
    release: "elastic",
    repo: "https://helm.elastic.co",
    chart: "elasticsearch",
    version: "7.12.0",
};

/// Prometheus release; its server is `prometheus-server`.
pub const PROMETHEUS_CHART: RemoteChart = RemoteChart {
    release: "prometheus",
    repo: "https://prometheus-community.github.io/helm-charts",
    chart: "prometheus",
    version: "11.0.4",
};

/// Grafana release.
pub const GRAFANA_CHART: RemoteChart = RemoteChart {
    release: "grafana",
    repo: "https://grafana.github.io/helm-charts",
    chart: "grafana",
    version: "5.0.10",
};

/// Values the datastore stage exposes.
#[derive(Debug, Clone)]
pub struct DatastoreOutputs {
    /// Generated Grafana admin password.
    pub grafana_password: Sensitive<String>,
}

/// Registers the datastore and monitoring charts.
///
/// `pools` are the node pools the datastores are scheduled on; every chart
/// waits for them.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_datastores(
    graph: &mut CompositionGraph,
    kubeconfig: &Sensitive<String>,
    pools: &[NodeId],
) -> Result<DatastoreOutputs> {
    let scope = add_scope(graph, DATASTORE_SCOPE)?;

    add_chart(graph, &scope, kubeconfig, pools, CASSANDRA_CHART, cassandra_values())?;
    add_chart(graph, &scope, kubeconfig, pools, ELASTICSEARCH_CHART, elasticsearch_values())?;
    add_chart(graph, &scope, kubeconfig, pools, PROMETHEUS_CHART, InputBundle::new())?;

    let mut password = ResourceNode::builder("grafana-admin-password", ResourceKind::RandomPassword)
        .parent(&scope)
        .input("length", 12u32);
    let grafana_password: Sensitive<String> = password.secret_output("result");
    graph.add_node(password.build_resource()?)?;

    add_chart(
        graph,
        &scope,
        kubeconfig,
        pools,
        GRAFANA_CHART,
        grafana_values(&grafana_password),
    )?;

    Ok(DatastoreOutputs { grafana_password })
}

fn add_chart(
    graph: &mut CompositionGraph,
    scope: &NodeId,
    kubeconfig: &Sensitive<String>,
    pools: &[NodeId],
    chart: RemoteChart,
    values: InputBundle,
) -> Result<()> {
    let mut builder = ResourceNode::builder(chart.release, ResourceKind::ChartRelease)
        .parent(scope)
        .input("kubeconfig", kubeconfig)
        .input("repo", chart.repo)
        .input("chart", chart.chart)
        .input("version", chart.version)
        .values(values);
    for pool in pools {
        builder = builder.after(pool);
    }
    graph.add_node(builder.build_resource()?)?;
    tracing::debug!(release = chart.release, chart = chart.chart, "datastore chart registered");
    Ok(())
}

fn toleration(target: &str) -> serde_json::Value {
    json!([{ "key": "target", "operator": "Equal", "value": target, "effect": "NoSchedule" }])
}

fn cassandra_values() -> InputBundle {
    InputBundle::new()
        .with("service.type", "ClusterIP")
        .with("selector.nodeSelector.target", "cassandra")
        .with("tolerations", toleration("cassandra"))
}

fn elasticsearch_values() -> InputBundle {
    InputBundle::new()
        .with("nodeSelector.target", "elastic")
        .with("tolerations", toleration("elastic"))
}

fn grafana_values(admin_password: &Sensitive<String>) -> InputBundle {
    let dashboards: serde_json::Map<String, serde_json::Value> = DASHBOARDS
        .iter()
        .map(|(name, file)| {
            let dashboard = json!({ "url": format!("{DASHBOARD_BASE}/{file}"), "datasource": METRICS_DATASOURCE });
            ((*name).to_owned(), dashboard)
        })
        .collect();

    InputBundle::new()
        .with("replicas", 1u32)
        .with("adminPassword", admin_password)
        .with("testFramework.enabled", false)
        .with("rbac.create", false)
        .with("rbac.pspEnabled", false)
        .with("rbac.namespaced", true)
        .with(
            "dashboardProviders",
            json!({
                "dashboardproviders.yaml": {
                    "apiVersion": 1,
                    "providers": [{
                        "name": "default",
                        "orgId": 1,
                        "folder": "",
                        "type": "file",
                        "disableDeletion": false,
                        "editable": true,
                        "options": { "path": "/var/lib/grafana/dashboards/default" },
                    }],
                },
            }),
        )
        .with(
            "datasources",
            json!({
                "datasources.yaml": {
                    "apiVersion": 1,
                    "datasources": [{
                        "name": METRICS_DATASOURCE,
                        "type": "prometheus",
                        "url": "http://prometheus-server",
                        "access": "proxy",
                        "isDefault": true,
                    }],
                },
            }),
        )
        .with("dashboards.default", serde_json::Value::Object(dashboards))
}

#[cfg(test)]
mod tests {
    use strata_core::Input;

    use super::*;

    fn kubeconfig() -> Sensitive<String> {
        Sensitive::literal("kubeconfig", "apiVersion: v1".to_string())
    }

    fn literal<'a>(graph: &'a CompositionGraph, node: &str, key: &str) -> Option<&'a serde_json::Value> {
        let node = graph.node(&NodeId::new(node))?;
        node.inputs().iter().find(|(k, _)| k == key).and_then(|(_, input)| match input {
            Input::Literal(value) => Some(value),
            Input::Deferred(_) => None,
        })
    }

    #[test]
    fn every_chart_waits_for_the_pools() {
        let mut graph = CompositionGraph::new();
        let pools = [NodeId::new("casspool"), NodeId::new("elasticpool")];
        let _ = add_datastores(&mut graph, &kubeconfig(), &pools).expect("datastores");

        for release in ["cass", "elastic", "prometheus", "grafana"] {
            let chart = graph.node(&NodeId::new(release)).expect("registered");
            assert_eq!(chart.parent(), Some(&NodeId::new(DATASTORE_SCOPE)));
            for pool in &pools {
                assert!(chart.dependencies().contains(pool), "{release} before {pool}");
            }
        }
    }

    #[test]
    fn datastores_tolerate_their_pool_taint() {
        let mut graph = CompositionGraph::new();
        let _ = add_datastores(&mut graph, &kubeconfig(), &[]).expect("datastores");
        assert_eq!(
            literal(&graph, "cass", "values.selector.nodeSelector.target"),
            Some(&json!("cassandra"))
        );
        assert_eq!(
            literal(&graph, "elastic", "values.tolerations"),
            Some(&toleration("elastic"))
        );
        assert_eq!(literal(&graph, "elastic", "version"), Some(&json!("7.12.0")));
    }

    #[test]
    fn grafana_is_preloaded_with_dashboards() {
        let mut graph = CompositionGraph::new();
        let outputs = add_datastores(&mut graph, &kubeconfig(), &[]).expect("datastores");

        let dashboards = literal(&graph, "grafana", "values.dashboards.default").expect("dashboards");
        assert_eq!(dashboards.as_object().map(serde_json::Map::len), Some(DASHBOARDS.len()));
        assert_eq!(
            dashboards["clusteroverview-github"]["url"],
            json!(format!("{DASHBOARD_BASE}/10000.json"))
        );

        let grafana = graph.node(&NodeId::new("grafana")).expect("grafana");
        assert!(grafana.dependencies().contains(&NodeId::new("grafana-admin-password")));
        assert!(outputs.grafana_password.is_pending());
        let password = grafana
            .inputs()
            .iter()
            .find(|(k, _)| k == "values.adminPassword")
            .map(|(_, input)| input.is_sensitive());
        assert_eq!(password, Some(true));
    }
}
