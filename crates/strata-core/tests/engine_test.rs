//! End-to-end tests for the composition engine.
//!
//! These tests drive whole graphs through the executor against the
//! in-memory backend:
//! 1. Failure isolation (skip propagation, independent branches)
//! 2. Timeouts and cancellation
//! 3. Concurrency of independent nodes
//! 4. Cross-deployment outputs (publish, reference, `NotFound`)
//! 5. Build-time rejection before any side effect

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use strata_common::config::{EngineConfig, RetryPolicy};
use strata_common::error::{Result, StrataError};
use strata_common::types::{DeploymentId, NodeId, NodeState, ResourceKind, Sensitivity};
use strata_core::backend::OutputMap;
use strata_core::backend::memory::MemoryBackend;
use strata_core::executor::Executor;
use strata_core::outputs::{JsonFileStore, OutputLookup, OutputStore, StackOutputPublisher, StackReference};
use strata_core::producer::{Collaborators, ProvisionContext, producer_fn};
use strata_core::report::{FailureKind, RunStatus};
use strata_core::variant::{ConfigVariantResolver, InputBundle};
use strata_core::{CompositionGraph, Deferred, ExecutionPlan, ResourceNode, Sensitive, reveal};

fn run_with(backend: MemoryBackend, config: EngineConfig) -> (Executor, Arc<MemoryBackend>) {
    let backend = Arc::new(backend);
    let executor = Executor::new(Collaborators::new(Arc::clone(&backend) as _), config);
    (executor, backend)
}

fn ids(nodes: &[NodeId]) -> Vec<&str> {
    nodes.iter().map(NodeId::as_str).collect()
}

/// resource group -> cluster -> {database, app}, plus a registry that only
/// needs the resource group.
fn platform_plan() -> (ExecutionPlan, Sensitive<String>) {
    let mut rg = ResourceNode::builder("resource-group", ResourceKind::ResourceGroup);
    let rg_name: Deferred<String> = rg.output("name");

    let mut cluster = ResourceNode::builder("cluster", ResourceKind::ManagedCluster)
        .input("resourceGroupName", &rg_name);
    let credentials: Sensitive<String> = cluster.secret_read_output("credentials");

    let mut database = ResourceNode::builder("database", ResourceKind::Database)
        .input("credentials", &credentials);
    let address: Deferred<String> = database.output("address");

    let app = ResourceNode::builder("app", ResourceKind::ChartRelease)
        .input("credentials", &credentials)
        .input("databaseAddress", &address);

    let registry = ResourceNode::builder("registry", ResourceKind::ContainerRegistry)
        .input("resourceGroupName", &rg_name);

    let mut graph = CompositionGraph::new();
    graph.add_node(rg.build_resource().expect("rg")).expect("rg");
    graph.add_node(cluster.build_resource().expect("cluster")).expect("cluster");
    graph.add_node(database.build_resource().expect("db")).expect("db");
    graph.add_node(app.build_resource().expect("app")).expect("app");
    graph.add_node(registry.build_resource().expect("registry")).expect("registry");
    (graph.build().expect("plan"), credentials)
}

fn platform_backend() -> MemoryBackend {
    MemoryBackend::new()
        .on_read(ResourceKind::ManagedCluster, |_, _| {
            Ok(OutputMap::from([("credentials".into(), json!("apiVersion: v1"))]))
        })
        .on_create(ResourceKind::Database, |name, _| {
            Ok(OutputMap::from([("address".into(), json!(format!("{name}.mysql.local")))]))
        })
}

// ── Failure isolation ───────────────────────────────────────────────

#[tokio::test]
async fn failed_database_skips_app_only() {
    let (plan, _) = platform_plan();
    let (executor, backend) = run_with(
        platform_backend().fail("database", "server quota exceeded"),
        EngineConfig::default(),
    );

    let report = executor.run(&plan).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(ids(&report.succeeded), vec!["resource-group", "cluster", "registry"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].node.as_str(), "database");
    assert_eq!(report.failed[0].kind, FailureKind::Provisioning);
    assert!(report.failed[0].cause.contains("server quota exceeded"));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].node.as_str(), "app");
    assert_eq!(report.skipped[0].blocked_by, "database");
    assert!(!backend.created().contains(&"app".to_string()));
}

#[tokio::test]
async fn failure_propagates_transitively_with_root_cause() {
    let (plan, _) = platform_plan();
    let (executor, _) = run_with(platform_backend().fail("cluster", "no capacity"), EngineConfig::default());

    let report = executor.run(&plan).await;

    assert_eq!(ids(&report.succeeded), vec!["resource-group", "registry"]);
    let skipped: Vec<_> = report
        .skipped
        .iter()
        .map(|s| (s.node.as_str(), s.blocked_by.as_str()))
        .collect();
    assert_eq!(skipped, vec![("database", "cluster"), ("app", "cluster")]);
    assert_eq!(report.state_of(&NodeId::new("app")), Some(NodeState::Skipped));
}

#[tokio::test]
async fn successful_run_resolves_sensitive_outputs_without_leaking_them() {
    let (plan, credentials) = platform_plan();
    let (executor, _) = run_with(platform_backend(), EngineConfig::default());

    let report = executor.run(&plan).await;

    assert!(report.is_success(), "{report}");
    assert_eq!(reveal(&credentials).peek(), Some(Ok("apiVersion: v1".to_string())));
    let printed = format!("{report} {report:?} {credentials:?} {credentials}");
    assert!(!printed.contains("apiVersion"), "secret leaked: {printed}");
}

// ── Timeouts and cancellation ───────────────────────────────────────

#[tokio::test]
async fn timeout_behaves_like_failure() {
    let mut chart = ResourceNode::builder("chart", ResourceKind::ChartRelease)
        .timeout(Duration::from_millis(30));
    let address: Deferred<String> = chart.output("address");
    let consumer = ResourceNode::builder("bench", ResourceKind::ChartRelease).input("address", &address);

    let mut graph = CompositionGraph::new();
    graph.add_node(chart.build_resource().expect("chart")).expect("chart");
    graph.add_node(consumer.build_resource().expect("bench")).expect("bench");
    let plan = graph.build().expect("plan");

    let (executor, _) = run_with(
        MemoryBackend::new().delay("chart", Duration::from_secs(5)),
        EngineConfig::default(),
    );
    let started = Instant::now();
    let report = executor.run(&plan).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.failed[0].kind, FailureKind::Timeout);
    assert!(matches!(report.failed[0].to_error(), StrataError::Timeout { .. }));
    assert_eq!(report.skipped[0].node.as_str(), "bench");
    assert!(address.peek().expect("settled").is_err());
}

#[tokio::test]
async fn cancellation_reaches_running_producer() {
    let slow = ResourceNode::builder("slow", ResourceKind::Local)
        .build(producer_fn(|ctx: ProvisionContext| async move {
            ctx.until_cancelled(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
        }))
        .expect("slow");
    let after = ResourceNode::builder("after", ResourceKind::Local)
        .after(&NodeId::new("slow"))
        .build_resource()
        .expect("after");
    let mut graph = CompositionGraph::new();
    graph.add_node(slow).expect("slow");
    graph.add_node(after).expect("after");
    let plan = graph.build().expect("plan");

    let (executor, backend) = run_with(MemoryBackend::new(), EngineConfig::default());
    let cancel = executor.cancel_signal();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let report = executor.run(&plan).await;
    canceller.await.expect("join");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(ids(&report.cancelled), vec!["slow"]);
    assert_eq!(ids(&report.untouched), vec!["after"]);
    assert!(backend.created().is_empty());
}

/// A cluster whose producer returns before its credentials are settled;
/// they arrive `late` afterwards, or never when `late` is `None`.
fn staggered_cluster(late: Option<Duration>) -> (ResourceNode, Deferred<String>) {
    let mut cluster = ResourceNode::builder("cluster", ResourceKind::ManagedCluster)
        .timeout(Duration::from_millis(200));
    let credentials: Deferred<String> = cluster.output("credentials");
    let cluster = cluster
        .build(producer_fn(move |ctx: ProvisionContext| async move {
            let output = Arc::clone(ctx.outputs()[0].value());
            if let Some(late) = late {
                drop(tokio::spawn(async move {
                    tokio::time::sleep(late).await;
                    let _ = output.settle_json(json!("token"));
                }));
            }
            Ok::<(), StrataError>(())
        }))
        .expect("cluster");
    (cluster, credentials)
}

#[tokio::test]
async fn output_settled_after_producer_returns_feeds_dependents() {
    let (cluster, credentials) = staggered_cluster(Some(Duration::from_millis(20)));
    let app = ResourceNode::builder("app", ResourceKind::ChartRelease)
        .input("credentials", &credentials)
        .build_resource()
        .expect("app");
    let mut graph = CompositionGraph::new();
    graph.add_node(cluster).expect("cluster");
    graph.add_node(app).expect("app");
    let plan = graph.build().expect("plan");

    let (executor, backend) = run_with(MemoryBackend::new(), EngineConfig::default());
    let report = executor.run(&plan).await;

    assert!(report.is_success(), "{report}");
    assert_eq!(credentials.peek(), Some(Ok("token".to_string())));
    assert_eq!(backend.config_of("app").expect("app created")["credentials"], json!("token"));
}

#[tokio::test]
async fn output_never_settled_is_a_timeout() {
    let mut graph = CompositionGraph::new();
    let (cluster, credentials) = staggered_cluster(None);
    graph.add_node(cluster).expect("cluster");
    let plan = graph.build().expect("plan");

    let (executor, _) = run_with(MemoryBackend::new(), EngineConfig::default());
    let report = executor.run(&plan).await;

    assert_eq!(report.failed[0].kind, FailureKind::Timeout);
    assert_eq!(report.state_of(&NodeId::new("cluster")), Some(NodeState::Failed));
    assert!(credentials.peek().expect("settled").is_err());
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test]
async fn independent_nodes_run_concurrently() {
    let mut backend = MemoryBackend::new();
    let mut graph = CompositionGraph::new();
    for i in 0..4 {
        let name = format!("branch-{i}");
        backend = backend.delay(name.clone(), Duration::from_millis(200));
        graph
            .add_node(
                ResourceNode::builder(name, ResourceKind::Local)
                    .build_resource()
                    .expect("node"),
            )
            .expect("add");
    }
    let plan = graph.build().expect("plan");
    let (executor, _) = run_with(backend, EngineConfig::default());

    let started = Instant::now();
    let report = executor.run(&plan).await;

    assert!(report.is_success());
    assert!(
        started.elapsed() < Duration::from_millis(700),
        "took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn dependent_never_starts_before_its_dependency_finishes() {
    let mut first = ResourceNode::builder("first", ResourceKind::Local);
    let token: Deferred<String> = first.output("token");
    let first = first
        .build(producer_fn(|ctx: ProvisionContext| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.settle_output("token", json!("ready"))
        }))
        .expect("first");
    let second = ResourceNode::builder("second", ResourceKind::Local)
        .input("token", &token)
        .build(producer_fn(|ctx: ProvisionContext| async move {
            assert_eq!(ctx.inputs().require_str("token")?, "ready");
            Ok::<(), StrataError>(())
        }))
        .expect("second");

    let mut graph = CompositionGraph::new();
    graph.add_node(second).expect("second");
    graph.add_node(first).expect("first");
    let plan = graph.build().expect("plan");
    assert_eq!(
        plan.order().iter().map(|n| n.as_str()).collect::<Vec<_>>(),
        vec!["first", "second"]
    );

    let (executor, _) = run_with(MemoryBackend::new(), EngineConfig::default());
    assert!(executor.run(&plan).await.is_success());
}

// ── Cross-deployment outputs ────────────────────────────────────────

async fn publish_cluster_outputs(store: &dyn OutputStore) -> Result<()> {
    let mut registry = ResourceNode::builder("registry", ResourceKind::ContainerRegistry);
    let login: Deferred<String> = registry.output("loginServer");
    let password: Sensitive<String> = registry.secret_read_output("adminPassword");
    let mut graph = CompositionGraph::new();
    graph.add_node(registry.build_resource()?)?;
    let plan = graph.build()?;

    let (executor, _) = run_with(
        MemoryBackend::new()
            .on_create(ResourceKind::ContainerRegistry, |_, _| {
                Ok(OutputMap::from([("loginServer".into(), json!("t-abcdef.azurecr.io"))]))
            })
            .on_read(ResourceKind::ContainerRegistry, |_, _| {
                Ok(OutputMap::from([("adminPassword".into(), json!("p@ss"))]))
            }),
        EngineConfig::default(),
    );
    assert!(executor.run(&plan).await.is_success());

    let mut publisher = StackOutputPublisher::new(DeploymentId::new("k8s"));
    publisher.publish("registryLoginServer", &login, Sensitivity::Plain)?;
    publisher.publish("registryAdminPassword", &password, Sensitivity::Plain)?;
    let summary = publisher.flush(store).await?;
    assert!(summary.unresolved.is_empty());
    Ok(())
}

#[tokio::test]
async fn reference_reads_outputs_published_by_another_deployment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::open(dir.path()).expect("store"));
    publish_cluster_outputs(store.as_ref()).await.expect("publish");

    let lookup = OutputLookup::new(store, RetryPolicy { attempts: 2, backoff_ms: 1 });
    let mut reference = StackReference::new("k8s-stack", DeploymentId::new("k8s"), lookup);
    let login: Deferred<String> = reference.require_output("registryLoginServer");
    let password: Sensitive<String> = reference.require_secret("registryAdminPassword");
    let image = ResourceNode::builder("bench-image", ResourceKind::ContainerImage)
        .input("registry.server", &login)
        .input("registry.password", &reveal(&password));

    let mut graph = CompositionGraph::new();
    graph.add_node(reference.into_node().expect("reference")).expect("reference");
    graph.add_node(image.build_resource().expect("image")).expect("image");
    let plan = graph.build().expect("plan");
    let (executor, backend) = run_with(MemoryBackend::new(), EngineConfig::default());

    let report = executor.run(&plan).await;
    assert!(report.is_success(), "{report}");
    let config = backend.config_of("bench-image").expect("image created");
    assert_eq!(config["registry"]["server"], json!("t-abcdef.azurecr.io"));
    assert_eq!(config["registry"]["password"], json!("p@ss"));
}

#[tokio::test]
async fn missing_reference_output_is_not_found_after_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::open(dir.path()).expect("store"));
    let lookup = OutputLookup::new(store, RetryPolicy { attempts: 3, backoff_ms: 1 });
    let mut reference = StackReference::new("orchestration-stack", DeploymentId::new("temporal"), lookup);
    let frontend: Deferred<String> = reference.require_output("frontendAddress");
    let bench = ResourceNode::builder("bench", ResourceKind::ChartRelease).input("frontendAddress", &frontend);

    let mut graph = CompositionGraph::new();
    graph.add_node(reference.into_node().expect("reference")).expect("reference");
    graph.add_node(bench.build_resource().expect("bench")).expect("bench");
    let plan = graph.build().expect("plan");
    let (executor, backend) = run_with(MemoryBackend::new(), EngineConfig::default());

    let report = executor.run(&plan).await;
    assert_eq!(report.failed[0].node.as_str(), "orchestration-stack");
    assert!(report.failed[0].cause.contains("after 3 attempt(s)"), "{}", report.failed[0].cause);
    assert_eq!(report.skipped[0].node.as_str(), "bench");
    assert!(backend.created().is_empty());
}

// ── Build-time rejection ────────────────────────────────────────────

#[test]
fn conflicting_variant_bundles_fail_before_any_node_exists() {
    let err = ConfigVariantResolver::merge([
        InputBundle::new().with("elasticsearch.enabled", false),
        InputBundle::new().with("elasticsearch.enabled", true),
    ])
    .expect_err("conflict");
    assert!(err.is_build_time());
}

#[test]
fn cycle_through_outputs_is_rejected() {
    let mut a = ResourceNode::builder("a", ResourceKind::Local);
    let from_a: Deferred<String> = a.output("value");
    let mut b = ResourceNode::builder("b", ResourceKind::Local).input("x", &from_a);
    let from_b: Deferred<String> = b.output("value");
    let a = a.input("y", &from_b);

    let mut graph = CompositionGraph::new();
    graph.add_node(b.build_resource().expect("b")).expect("b");
    let err = graph.add_node(a.build_resource().expect("a")).expect_err("cycle");
    assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
}
