//! Producers: the work a node performs once its inputs are resolved.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use strata_common::constants::VALUES_PREFIX;
use strata_common::error::{Result, StrataError};
use strata_common::types::{NodeId, ResourceKind, Value};

use crate::backend::{OutputMap, Provisioned, ProvisioningBackend};
use crate::executor::CancelSignal;
use crate::node::{DeclaredOutput, Inputs, OutputPhase, ResourceNode};
use crate::render::ChartRenderer;

/// External systems a producer may call.
#[derive(Clone)]
pub struct Collaborators {
    backend: Arc<dyn ProvisioningBackend>,
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl Collaborators {
    /// Creates collaborators around a provisioning backend.
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self {
            backend,
            renderer: None,
        }
    }

    /// Adds a chart renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// The provisioning backend.
    pub fn backend(&self) -> &Arc<dyn ProvisioningBackend> {
        &self.backend
    }

    /// The chart renderer.
    ///
    /// # Errors
    ///
    /// Returns an error if none was configured.
    pub fn renderer(&self) -> Result<&Arc<dyn ChartRenderer>> {
        self.renderer
            .as_ref()
            .ok_or_else(|| StrataError::backend("no chart renderer configured"))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("renderer", &self.renderer.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything a producer sees while provisioning one node.
#[derive(Debug)]
pub struct ProvisionContext {
    node: NodeId,
    kind: ResourceKind,
    inputs: Inputs,
    outputs: Vec<DeclaredOutput>,
    collaborators: Collaborators,
    cancel: CancelSignal,
}

impl ProvisionContext {
    /// Creates the context for one node run.
    pub fn new(
        node: &ResourceNode,
        inputs: Inputs,
        collaborators: Collaborators,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            node: node.id().clone(),
            kind: node.kind(),
            inputs,
            outputs: node.outputs().to_vec(),
            collaborators,
            cancel,
        }
    }

    /// Node being provisioned.
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Kind of the node being provisioned.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resolved inputs.
    pub const fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[DeclaredOutput] {
        &self.outputs
    }

    /// The provisioning backend.
    pub fn backend(&self) -> &Arc<dyn ProvisioningBackend> {
        self.collaborators.backend()
    }

    /// The chart renderer.
    ///
    /// # Errors
    ///
    /// Returns an error if none was configured.
    pub fn renderer(&self) -> Result<&Arc<dyn ChartRenderer>> {
        self.collaborators.renderer()
    }

    /// Settles a declared output from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the output was not declared, does not decode,
    /// or was already settled.
    pub fn settle_output(&self, name: &str, value: Value) -> Result<()> {
        let declared = self
            .outputs
            .iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| StrataError::backend(format!("{} has no output \"{name}\"", self.node)))?;
        declared.value().settle_json(value)
    }

    /// Returns whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Drives `work` unless the run is cancelled first, in which case the
    /// outstanding call is dropped and [`StrataError::Cancelled`] returned.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or [`StrataError::Cancelled`].
    pub async fn until_cancelled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StrataError::Cancelled {
                node: self.node.to_string(),
            }),
            result = work => result,
        }
    }
}

/// Performs the provisioning work of a node.
///
/// A producer must settle every declared output before returning `Ok`;
/// the executor treats an output left pending as a failure of the node.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Provisions the node.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails.
    async fn provision(&self, ctx: ProvisionContext) -> Result<()>;
}

/// Producer backed by an async closure.
pub struct FnProducer<F>(F);

/// Wraps an async closure as a [`Producer`].
pub const fn producer_fn<F, Fut>(f: F) -> FnProducer<F>
where
    F: Fn(ProvisionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnProducer(f)
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(ProvisionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn provision(&self, ctx: ProvisionContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Default producer: one `create` with the nested inputs, then a `read`
/// when any output is only available after creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateResource;

#[async_trait]
impl Producer for CreateResource {
    async fn provision(&self, ctx: ProvisionContext) -> Result<()> {
        let config = ctx.inputs().config_tree()?;
        let provisioned = ctx
            .until_cancelled(ctx.backend().create(ctx.kind(), ctx.node().as_str(), &config))
            .await?;
        settle_outputs(&ctx, provisioned).await
    }
}

/// Producer that renders a local chart with the node's `values.*` inputs
/// and installs the result as a release.
///
/// Inputs outside `values.` (the kubeconfig, a namespace) are passed to the
/// backend next to the rendered manifests.
#[derive(Debug, Clone)]
pub struct InstallChart {
    chart: PathBuf,
}

impl InstallChart {
    /// Installs the chart found at `chart`.
    pub fn new(chart: impl Into<PathBuf>) -> Self {
        Self {
            chart: chart.into(),
        }
    }
}

#[async_trait]
impl Producer for InstallChart {
    async fn provision(&self, ctx: ProvisionContext) -> Result<()> {
        let values = ctx.inputs().values_tree(VALUES_PREFIX)?;
        let manifests = ctx.renderer()?.render(&self.chart, &values)?;
        tracing::debug!(
            node = %ctx.node(),
            chart = %self.chart.display(),
            manifests = manifests.len(),
            "chart rendered"
        );

        let mut config = match ctx.inputs().tree_without(VALUES_PREFIX)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let _ = config.insert(
            "chart".into(),
            Value::from(self.chart.to_string_lossy().into_owned()),
        );
        let _ = config.insert("manifests".into(), serde_json::to_value(&manifests)?);

        let config = Value::Object(config);
        let provisioned = ctx
            .until_cancelled(ctx.backend().create(ResourceKind::ChartRelease, ctx.node().as_str(), &config))
            .await?;
        settle_outputs(&ctx, provisioned).await
    }
}

/// Settles create-phase outputs from the `create` result, then read-phase
/// outputs from a follow-up `read`.
///
/// # Errors
///
/// Returns an error if the backend did not report a declared output.
pub async fn settle_outputs(ctx: &ProvisionContext, provisioned: Provisioned) -> Result<()> {
    settle_phase(ctx, OutputPhase::Create, provisioned.outputs)?;
    if ctx.outputs().iter().any(|o| o.phase() == OutputPhase::Read) {
        let read = ctx
            .until_cancelled(ctx.backend().read(&provisioned.handle))
            .await?;
        settle_phase(ctx, OutputPhase::Read, read)?;
    }
    Ok(())
}

fn settle_phase(ctx: &ProvisionContext, phase: OutputPhase, mut reported: OutputMap) -> Result<()> {
    for declared in ctx.outputs().iter().filter(|o| o.phase() == phase) {
        let value = reported.remove(declared.name()).ok_or_else(|| {
            StrataError::backend(format!(
                "{} did not report output \"{}\"",
                ctx.node(),
                declared.name()
            ))
        })?;
        declared.value().settle_json(value)?;
    }
    Ok(())
}
