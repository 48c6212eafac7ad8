//! Benchmark image and chart.

use strata_common::error::Result;
use strata_common::types::ResourceKind;
use strata_core::graph::CompositionGraph;
use strata_core::producer::InstallChart;
use strata_core::variant::InputBundle;
use strata_core::{Deferred, ResourceNode, Sensitive};

use crate::cluster::RegistryOutputs;
use crate::scope::add_scope;
use crate::settings::BenchSettings;

/// Scope owning the benchmark resources.
pub const BENCH_SCOPE: &str = "bench";

/// Repository name of the benchmark image.
pub const BENCH_IMAGE: &str = "temporal-bench-go";

/// Values the benchmark stage exposes.
#[derive(Debug, Clone)]
pub struct BenchOutputs {
    /// Full name of the pushed image, tag included.
    pub image_name: Deferred<String>,
}

/// Splits `repository:tag`, ignoring a port in the registry host.
fn split_image(name: &str) -> std::result::Result<(&str, &str), String> {
    name.rsplit_once(':')
        .filter(|(_, tag)| !tag.contains('/'))
        .ok_or_else(|| format!("image name \"{name}\" has no tag"))
}

/// Registers the benchmark image build and the benchmark chart.
///
/// The chart points the workers at `frontend_address` and pulls the image
/// just pushed to the registry.
///
/// # Errors
///
/// Returns an error if a node cannot be registered.
pub fn add_bench(
    graph: &mut CompositionGraph,
    settings: &BenchSettings,
    kubeconfig: &Sensitive<String>,
    registry: &RegistryOutputs,
    frontend_address: &Deferred<String>,
) -> Result<BenchOutputs> {
    let scope = add_scope(graph, BENCH_SCOPE)?;

    let mut image = ResourceNode::builder("bench-image", ResourceKind::ContainerImage)
        .parent(&scope)
        .input(
            "imageName",
            &registry.login_server.map(|server| format!("{server}/{BENCH_IMAGE}")),
        )
        .input("build.context", settings.context.as_str())
        .input("registry.server", &registry.login_server)
        .input("registry.username", &registry.admin_username)
        .input("registry.password", &registry.admin_password);
    let image_name: Deferred<String> = image.output("imageName");
    graph.add_node(image.build_resource()?)?;

    let repository = image_name.try_map(|name| split_image(&name).map(|(repo, _)| repo.to_owned()));
    let tag = image_name.try_map(|name| split_image(&name).map(|(_, tag)| tag.to_owned()));

    let values = InputBundle::new()
        .with("image.repository", &repository)
        .with("image.tag", &tag)
        .with("tests.frontendAddress", frontend_address)
        .with("tests.namespaceName", "default");
    let chart = ResourceNode::builder("bench-chart", ResourceKind::ChartRelease)
        .parent(&scope)
        .input("kubeconfig", kubeconfig)
        .values(values)
        .build(InstallChart::new(settings.chart.clone()))?;
    graph.add_node(chart)?;

    Ok(BenchOutputs { image_name })
}
