//! End-to-end tests of the stack against the simulated provisioning profile.
//!
//! Tests cover:
//! 1. Full stack planning (order, scopes, teardown)
//! 2. Full stack run and published outputs
//! 3. Storage variants (MySQL secret, unhandled variants)
//! 4. Partial failure of the cluster stage
//! 5. Split deployments through a shared output store, including the
//!    cluster stack's datastores

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::json;
use strata_common::config::{ConfigMap, EngineConfig, RetryPolicy};
use strata_common::error::StrataError;
use strata_common::types::{DeploymentId, NodeId, NodeState};
use strata_core::backend::memory::MemoryBackend;
use strata_core::outputs::{JsonFileStore, MemoryOutputStore, OutputLookup, OutputStore};
use strata_core::producer::Collaborators;
use strata_core::render::ValuesRenderer;
use strata_core::variant::ConfigVariantResolver;
use strata_core::{Executor, RunReport};
use strata_stack::simulate::{FRONTEND_IP, WEB_IP, simulated_backend};
use strata_stack::storage::StorageBackend;
use strata_stack::visibility::Visibility;
use strata_stack::{StackDeployment, StackKind, assemble, assemble_with};

fn cassandra_config() -> ConfigMap {
    ConfigMap::new()
        .with("aks.version", "1.29")
        .with("aks.vmsize", "Standard_DS2_v2")
        .with("aks.vmcount", 3)
        .with("owner", "platform")
        .with("temporal.version", "1.22.0")
        .with("temporal.visibility", "default")
        .with("storage.type", "cassandra")
        .with("cassandra.clustersize", 3)
        .with("server.numHistoryShards", 512)
}

fn mysql_config() -> ConfigMap {
    cassandra_config()
        .with("storage.type", "mysql")
        .with("mysql.hostname", "db.internal")
        .with("mysql.login", "temporal")
        .with("mysql.password", "s3cret")
}

fn memory_lookup(store: Arc<dyn OutputStore>) -> OutputLookup {
    OutputLookup::new(
        store,
        RetryPolicy {
            attempts: 2,
            backoff_ms: 10,
        },
    )
}

fn no_lookup() -> OutputLookup {
    memory_lookup(Arc::new(MemoryOutputStore::new()))
}

async fn run(deployment: &StackDeployment, backend: &Arc<MemoryBackend>) -> RunReport {
    let collaborators =
        Collaborators::new(Arc::clone(backend) as _).with_renderer(Arc::new(ValuesRenderer));
    Executor::new(collaborators, EngineConfig::default())
        .run(&deployment.plan)
        .await
}

fn ids(nodes: &[&NodeId]) -> Vec<String> {
    nodes.iter().map(ToString::to_string).collect()
}

// ── Planning ─────────────────────────────────────────────────────

#[test]
fn full_stack_plan_orders_stages() {
    let deployment = assemble(
        StackKind::Full,
        DeploymentId::new("dev"),
        &cassandra_config(),
        &no_lookup(),
    )
    .expect("assemble");
    let order = ids(&deployment.plan.order());
    let at = |id: &str| order.iter().position(|n| n == id).expect("planned");

    assert!(at("resource-group-name") < at("resource-group"));
    assert!(at("resource-group") < at("aks-cluster"));
    assert!(at("aks-sp-password") < at("aks-cluster"));
    assert!(at("aks-cluster") < at("temporal-chart"));
    assert!(at("registry") < at("bench-image"));
    assert!(at("temporal-chart") < at("bench-chart"));
    assert!(at("bench-image") < at("bench-chart"));
}

#[test]
fn full_stack_teardown_releases_children_before_scopes() {
    let deployment = assemble(
        StackKind::Full,
        DeploymentId::new("dev"),
        &cassandra_config(),
        &no_lookup(),
    )
    .expect("assemble");
    let teardown = ids(&deployment.plan.teardown_order());
    let at = |id: &str| teardown.iter().position(|n| n == id).expect("planned");

    assert!(at("aks-cluster") < at("aks"));
    assert!(at("aks-sp-password") < at("aks"));
    assert!(at("bench-chart") < at("temporal-chart"));
    assert!(at("aks-cluster") < at("resource-group"));
    assert_eq!(
        ids(&deployment.plan.children_of(&NodeId::new("temporal"))),
        vec!["grafana-password", "temporal-chart"]
    );
}

#[test]
fn missing_key_fails_before_any_node_is_built() {
    let config = cassandra_config().with("aks.vmcount", serde_json::Value::Null);
    let err = assemble(StackKind::Full, DeploymentId::new("dev"), &config, &no_lookup())
        .expect_err("missing");
    assert!(matches!(err, StrataError::MissingConfig { ref key } if key == "aks.vmcount"));
    assert!(err.is_build_time());
}

// ── Full stack run ───────────────────────────────────────────────

#[tokio::test]
async fn full_stack_runs_and_publishes_endpoints() {
    let backend = Arc::new(simulated_backend());
    let deployment = assemble(
        StackKind::Full,
        DeploymentId::new("dev"),
        &cassandra_config(),
        &no_lookup(),
    )
    .expect("assemble");

    let report = run(&deployment, &backend).await;
    assert!(report.is_success(), "{report}");
    assert_eq!(report.succeeded.len(), deployment.plan.len());

    let rendered = deployment.publisher.render(false);
    let get = |name: &str| {
        rendered
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .expect("published")
    };
    assert_eq!(get("frontendAddress"), format!("{FRONTEND_IP}:7233"));
    assert_eq!(get("webEndpoint"), format!("http://{WEB_IP}:8088"));
    assert_eq!(get("grafanaPassword"), "[secret]");

    let revealed = deployment.publisher.render(true);
    let password = revealed
        .iter()
        .find(|(n, _)| n == "grafanaPassword")
        .map(|(_, v)| v.len());
    assert_eq!(password, Some(12));

    let registry = backend.config_of("registry").expect("registry created");
    let name = registry["registryName"].as_str().expect("name");
    assert!(name.starts_with('t') && !name.contains('-'), "got: {name}");

    let chart = backend.config_of("temporal-chart").expect("chart created");
    let values = &chart["manifests"][0]["body"]["data"];
    assert_eq!(values["cassandra"]["config"]["cluster_size"], json!(3));
    assert_eq!(values["server"]["config"]["numHistoryShards"], json!(512));
    assert_eq!(values["elasticsearch"]["enabled"], json!(false));
    assert_eq!(values["web"]["service"]["type"], json!("LoadBalancer"));

    let bench = backend.config_of("bench-chart").expect("bench created");
    let bench_values = &bench["manifests"][0]["body"]["data"];
    assert_eq!(bench_values["tests"]["frontendAddress"], json!(format!("{FRONTEND_IP}:7233")));
    assert_eq!(bench_values["image"]["tag"], json!("latest"));
    assert!(
        bench_values["image"]["repository"]
            .as_str()
            .is_some_and(|r| r.ends_with(".azurecr.io/temporal-bench-go"))
    );
}

// ── Storage variants ─────────────────────────────────────────────

#[tokio::test]
async fn mysql_store_secret_is_created_before_chart() {
    let backend = Arc::new(simulated_backend());
    let deployment = assemble(
        StackKind::Full,
        DeploymentId::new("dev"),
        &mysql_config(),
        &no_lookup(),
    )
    .expect("assemble");

    let report = run(&deployment, &backend).await;
    assert!(report.is_success(), "{report}");

    let created = backend.created();
    let at = |id: &str| created.iter().position(|n| n == id).expect("created");
    assert!(at("temporal-default-store") < at("temporal-chart"));

    let chart = backend.config_of("temporal-chart").expect("chart created");
    let persistence = &chart["manifests"][0]["body"]["data"]["server"]["config"]["persistence"];
    assert_eq!(persistence["default"]["sql"]["driver"], json!("mysql"));
    assert_eq!(persistence["visibility"]["sql"]["database"], json!("temporal_visibility"));
    assert_eq!(persistence["default"]["sql"]["password"], json!("s3cret"));

    assert!(!format!("{:?}", deployment.plan).contains("s3cret"));
    assert!(!report.to_string().contains("s3cret"));
}

#[test]
fn storage_variant_outside_resolver_is_rejected() {
    let resolver = ConfigVariantResolver::new()
        .handle_tags::<StorageBackend>(&["cassandra"])
        .handle::<Visibility>();
    let err = assemble_with(
        &resolver,
        StackKind::Full,
        DeploymentId::new("dev"),
        &mysql_config(),
        &no_lookup(),
    )
    .expect_err("unhandled");
    assert!(matches!(err, StrataError::UnhandledVariant { ref tag, .. } if tag == "mysql"));
}

#[test]
fn unknown_storage_type_is_rejected() {
    let config = cassandra_config().with("storage.type", "postgres");
    let err = assemble(StackKind::Full, DeploymentId::new("dev"), &config, &no_lookup())
        .expect_err("unknown");
    assert!(matches!(err, StrataError::UnhandledVariant { ref axis, .. } if axis == "storage"));
}

// ── Partial failure ──────────────────────────────────────────────

#[tokio::test]
async fn cluster_failure_skips_only_its_dependents() {
    let backend = Arc::new(simulated_backend().fail("aks-cluster", "quota exceeded"));
    let deployment = assemble(
        StackKind::Full,
        DeploymentId::new("dev"),
        &cassandra_config(),
        &no_lookup(),
    )
    .expect("assemble");

    let report = run(&deployment, &backend).await;
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].node, NodeId::new("aks-cluster"));
    assert!(report.failed[0].cause.contains("quota exceeded"));

    for skipped in ["registry-access", "temporal-chart", "bench-chart"] {
        let node = NodeId::new(skipped);
        assert_eq!(report.state_of(&node), Some(NodeState::Skipped), "{skipped}");
    }
    assert!(report.skipped.iter().all(|s| s.blocked_by == "aks-cluster"));
    for done in ["resource-group", "registry", "grafana-password", "bench-image"] {
        assert_eq!(report.state_of(&NodeId::new(done)), Some(NodeState::Done), "{done}");
    }

    let store = MemoryOutputStore::new();
    let summary = deployment.publisher.flush(&store).await.expect("flush");
    assert!(summary.unresolved.iter().any(|(name, _)| name == "frontendAddress"));
    assert!(summary.published.iter().any(|name| name == "kubectl.logs"));
}

// ── Split deployments ────────────────────────────────────────────

#[test]
fn cluster_stack_schedules_datastores_after_their_pools() {
    let deployment = assemble(
        StackKind::Cluster,
        DeploymentId::new("dev-k8s"),
        &cassandra_config(),
        &no_lookup(),
    )
    .expect("assemble");
    let order = ids(&deployment.plan.order());
    let at = |id: &str| order.iter().position(|n| n == id).expect("planned");

    assert!(at("aks-app") < at("aks-sp"));
    assert!(at("aks-sp-password") < at("aks-cluster"));
    assert!(at("aks-workspace") < at("aks-insights"));
    assert!(at("aks-cluster") < at("casspool"));
    assert!(at("casspool") < at("cass"));
    assert!(at("elasticpool") < at("elastic"));
    assert!(at("grafana-admin-password") < at("grafana"));

    let teardown = ids(&deployment.plan.teardown_order());
    let down = |id: &str| teardown.iter().position(|n| n == id).expect("planned");
    assert!(down("casspool") < down("aks"));
    assert!(down("grafana") < down("datastores"));
    let mut children = ids(&deployment.plan.children_of(&NodeId::new("datastores")));
    children.sort();
    assert_eq!(
        children,
        vec!["cass", "elastic", "grafana", "grafana-admin-password", "prometheus"]
    );
}

#[tokio::test]
async fn split_stacks_share_outputs_through_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::open(dir.path()).expect("store"));
    let lookup = memory_lookup(Arc::clone(&store) as _);
    let backend = Arc::new(simulated_backend());

    let cluster = assemble(
        StackKind::Cluster,
        DeploymentId::new("dev-k8s"),
        &cassandra_config(),
        &lookup,
    )
    .expect("cluster");
    let report = run(&cluster, &backend).await;
    assert!(report.is_success(), "{report}");
    let _ = cluster.publisher.flush(store.as_ref()).await.expect("flush");

    let config = cassandra_config()
        .with("k8s-stack-ref", "dev-k8s")
        .with("orchestration-stack-ref", "dev-temporal");
    let orchestration = assemble(
        StackKind::Orchestration,
        DeploymentId::new("dev-temporal"),
        &config,
        &lookup,
    )
    .expect("orchestration");
    let report = run(&orchestration, &backend).await;
    assert!(report.is_success(), "{report}");
    let _ = orchestration.publisher.flush(store.as_ref()).await.expect("flush");

    let bench = assemble(StackKind::Bench, DeploymentId::new("dev-bench"), &config, &lookup)
        .expect("bench");
    let report = run(&bench, &backend).await;
    assert!(report.is_success(), "{report}");

    let published_kubeconfig = store
        .get(&DeploymentId::new("dev-k8s"), "kubeconfig")
        .await
        .expect("read")
        .expect("published");
    assert!(published_kubeconfig.sensitivity.is_secret());
    let chart = backend.config_of("temporal-chart").expect("chart created");
    assert_eq!(chart["kubeconfig"], published_kubeconfig.value);
    let values = &chart["manifests"][0]["body"]["data"];
    assert_eq!(values["cassandra"]["enabled"], json!(false));
    assert_eq!(values["elasticsearch"]["external"], json!(true));
    assert_eq!(
        values["server"]["config"]["persistence"]["default"]["cassandra"]["hosts"],
        json!(["cass-cassandra.default.svc.cluster.local"])
    );

    let grafana_password = store
        .get(&DeploymentId::new("dev-k8s"), "grafanaPassword")
        .await
        .expect("read")
        .expect("published");
    assert!(grafana_password.sensitivity.is_secret());
    let grafana = backend.config_of("grafana").expect("grafana created");
    assert_eq!(grafana["values"]["adminPassword"], grafana_password.value);
    assert!(
        store
            .get(&DeploymentId::new("dev-temporal"), "kubectl.cassandraPortForward")
            .await
            .expect("read")
            .is_some()
    );

    let bench_chart = backend.config_of("bench-chart").expect("bench created");
    assert_eq!(
        bench_chart["manifests"][0]["body"]["data"]["tests"]["frontendAddress"],
        json!(format!("{FRONTEND_IP}:7233"))
    );
}

#[tokio::test]
async fn bench_without_orchestration_outputs_is_skipped() {
    let store: Arc<dyn OutputStore> = Arc::new(MemoryOutputStore::new());
    let lookup = memory_lookup(Arc::clone(&store));
    let backend = Arc::new(simulated_backend());

    let cluster = assemble(
        StackKind::Cluster,
        DeploymentId::new("dev-k8s"),
        &cassandra_config(),
        &lookup,
    )
    .expect("cluster");
    assert!(run(&cluster, &backend).await.is_success());
    let _ = cluster.publisher.flush(store.as_ref()).await.expect("flush");

    let config = ConfigMap::new()
        .with("k8s-stack-ref", "dev-k8s")
        .with("orchestration-stack-ref", "never-deployed");
    let bench = assemble(StackKind::Bench, DeploymentId::new("dev-bench"), &config, &lookup)
        .expect("bench");
    let report = run(&bench, &backend).await;

    let failure = report
        .failure_of(&NodeId::new("orchestration-stack"))
        .expect("lookup failed");
    assert!(failure.cause.contains("not found"), "got: {}", failure.cause);
    assert_eq!(
        report.state_of(&NodeId::new("bench-chart")),
        Some(NodeState::Skipped)
    );
    assert_eq!(
        report.state_of(&NodeId::new("bench-image")),
        Some(NodeState::Done)
    );
}
