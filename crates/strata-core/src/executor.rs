//! Dependency-ordered execution of an [`ExecutionPlan`].
//!
//! Every node gets a completion value that settles when the node reaches a
//! terminal state. A node job waits on the completions of its dependencies
//! (the only suspension point besides the producer itself), resolves its
//! inputs, then runs its producer under a deadline. The deadline also covers
//! outputs the producer leaves to be settled after it returns. A failed or skipped
//! node fails its completion with the failure of the node that started the
//! chain, so dependents are skipped transitively while unrelated branches
//! keep going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use strata_common::config::{EngineConfig, ExecutionMode};
use strata_common::error::StrataError;
use strata_common::types::{NodeId, Sensitivity};
use tokio::sync::{Semaphore, watch};

use crate::deferred::{Deferred, Failure, all};
use crate::graph::ExecutionPlan;
use crate::node::{Input, Inputs, ResourceNode};
use crate::producer::{Collaborators, ProvisionContext};
use crate::report::{FailureKind, NodeFailure, RunReport, RunStatus, SkippedNode};

/// Cooperative cancellation shared by the executor and every producer.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// Creates an un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        let _ = self.tx.send_replace(true);
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal state of one node job.
#[derive(Debug)]
enum Settlement {
    Done,
    Failed(NodeFailure),
    Skipped { blocked_by: String },
    Cancelled,
    Untouched,
}

/// Runs execution plans against a set of collaborators.
#[derive(Debug)]
pub struct Executor {
    collaborators: Collaborators,
    config: EngineConfig,
    cancel: CancelSignal,
}

impl Executor {
    /// Creates an executor.
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            collaborators,
            config,
            cancel: CancelSignal::new(),
        }
    }

    /// Handle used to cancel a run in progress.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Runs every node of the plan and reports how far provisioning got.
    ///
    /// Never returns early on a node failure: dependents of a failed node are
    /// skipped and every other node still runs.
    pub async fn run(&self, plan: &ExecutionPlan) -> RunReport {
        let started_at = Utc::now();
        tracing::info!(nodes = plan.len(), mode = ?self.config.mode, "run started");

        let completions: Vec<Deferred<()>> = plan
            .nodes()
            .iter()
            .map(|n| Deferred::owned_by(format!("{}.completed", n.id()), n.id()))
            .collect();
        let permits = (self.config.max_parallel > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_parallel)));

        let jobs = plan.nodes().iter().enumerate().map(|(position, node)| {
            let upstream: Vec<Deferred<()>> = plan
                .dependency_positions(position)
                .iter()
                .map(|&d| completions[d].clone())
                .collect();
            NodeJob {
                node: Arc::clone(node),
                upstream: all(&upstream),
                completion: completions[position].clone(),
                collaborators: self.collaborators.clone(),
                cancel: self.cancel.clone(),
                timeout: node.timeout().unwrap_or_else(|| self.config.default_timeout()),
                permits: permits.clone(),
            }
        });

        let settlements: Vec<Settlement> = match self.config.mode {
            ExecutionMode::Sequential => {
                let mut settlements = Vec::with_capacity(plan.len());
                for job in jobs {
                    settlements.push(job.run().await);
                }
                settlements
            }
            ExecutionMode::Parallel => {
                let handles: Vec<_> = jobs
                    .map(|job| {
                        let id = job.node.id().clone();
                        (id, tokio::spawn(job.run()))
                    })
                    .collect();
                let mut settlements = Vec::with_capacity(handles.len());
                for (id, handle) in handles {
                    settlements.push(handle.await.unwrap_or_else(|e| {
                        Settlement::Failed(provisioning_failure(&id, format!("node task aborted: {e}")))
                    }));
                }
                settlements
            }
        };

        let report = assemble_report(plan, settlements, self.cancel.is_cancelled(), started_at);
        tracing::info!(
            status = %report.status,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "run finished"
        );
        report
    }
}

struct NodeJob {
    node: Arc<ResourceNode>,
    upstream: Deferred<Vec<()>>,
    completion: Deferred<()>,
    collaborators: Collaborators,
    cancel: CancelSignal,
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl NodeJob {
    async fn run(self) -> Settlement {
        let settlement = self.execute().await;
        self.settle(&settlement);
        settlement
    }

    async fn execute(&self) -> Settlement {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Settlement::Untouched,
            upstream = self.upstream.get() => {
                if let Err(failure) = upstream {
                    return Settlement::Skipped { blocked_by: failure.origin };
                }
            }
        }

        let inputs = match self.resolve_inputs().await {
            Ok(inputs) => inputs,
            Err(settlement) => return settlement,
        };

        let _permit = match &self.permits {
            Some(permits) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Settlement::Untouched,
                permit = Arc::clone(permits).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return Settlement::Untouched,
                },
            },
            None => None,
        };
        if self.cancel.is_cancelled() {
            return Settlement::Untouched;
        }

        let id = self.node.id();
        tracing::info!(node = %id, kind = %self.node.kind(), "provisioning");
        let ctx = ProvisionContext::new(
            &self.node,
            inputs,
            self.collaborators.clone(),
            self.cancel.clone(),
        );
        let producer = self.node.producer();
        let guarded = async {
            let provisioned = AssertUnwindSafe(producer.provision(ctx)).catch_unwind().await;
            if matches!(provisioned, Ok(Ok(()))) {
                return Ok(self.outputs_settled().await);
            }
            provisioned
        };

        match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => Settlement::Failed(NodeFailure {
                node: id.clone(),
                kind: FailureKind::Timeout,
                cause: format!("no result within {}s", self.timeout.as_secs_f64()),
                after: Some(self.timeout),
            }),
            Ok(Err(panic)) => Settlement::Failed(provisioning_failure(
                id,
                format!("producer panicked: {}", panic_message(panic.as_ref())),
            )),
            Ok(Ok(Err(StrataError::Cancelled { .. }))) => Settlement::Cancelled,
            Ok(Ok(Err(_))) if self.cancel.is_cancelled() => Settlement::Cancelled,
            Ok(Ok(Err(e))) => Settlement::Failed(provisioning_failure(id, e.to_string())),
            Ok(Ok(Ok(()))) => self.check_outputs(),
        }
    }

    async fn resolve_inputs(&self) -> Result<Inputs, Settlement> {
        let mut inputs = Inputs::new();
        for (key, input) in self.node.inputs() {
            match input {
                Input::Literal(value) => inputs.insert(key, value.clone(), Sensitivity::Plain),
                Input::Deferred(value) => {
                    value.settled().await;
                    let sensitivity = if value.is_sensitive() {
                        Sensitivity::Secret
                    } else {
                        Sensitivity::Plain
                    };
                    match value.snapshot() {
                        Some(Ok(resolved)) => inputs.insert(key, resolved, sensitivity),
                        Some(Err(failure)) => {
                            return Err(Settlement::Failed(provisioning_failure(
                                self.node.id(),
                                format!("input \"{key}\" could not be derived: {failure}"),
                            )));
                        }
                        None => {
                            return Err(Settlement::Failed(provisioning_failure(
                                self.node.id(),
                                format!("input \"{key}\" was never settled"),
                            )));
                        }
                    }
                }
            }
        }
        Ok(inputs)
    }

    /// Waits for outputs settled after the producer returned.
    async fn outputs_settled(&self) -> strata_common::error::Result<()> {
        let id = self.node.id();
        for output in self.node.outputs() {
            if !output.value().is_pending() {
                continue;
            }
            tracing::debug!(node = %id, output = output.name(), "waiting for output");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(StrataError::Cancelled { node: id.to_string() });
                }
                () = output.value().settled() => {}
            }
        }
        Ok(())
    }

    fn check_outputs(&self) -> Settlement {
        for output in self.node.outputs() {
            match output.value().snapshot() {
                Some(Ok(_)) => {}
                Some(Err(failure)) => {
                    return Settlement::Failed(provisioning_failure(
                        self.node.id(),
                        format!("output \"{}\" failed: {}", output.name(), failure.message),
                    ));
                }
                None => {
                    return Settlement::Failed(provisioning_failure(
                        self.node.id(),
                        format!("output \"{}\" was not settled", output.name()),
                    ));
                }
            }
        }
        Settlement::Done
    }

    /// Propagates the terminal state to the node's outputs and completion.
    fn settle(&self, settlement: &Settlement) {
        let id = self.node.id();
        let failure = match settlement {
            Settlement::Done => {
                tracing::info!(node = %id, "provisioned");
                let _ = self.completion.resolve(());
                return;
            }
            Settlement::Failed(failure) => {
                tracing::warn!(node = %id, cause = %failure.cause, "provisioning failed");
                Failure::new(id.as_str(), failure.cause.as_str())
            }
            Settlement::Skipped { blocked_by } => {
                tracing::warn!(node = %id, blocked_by = %blocked_by, "skipped");
                Failure::new(blocked_by.as_str(), format!("{id} skipped"))
            }
            Settlement::Cancelled => {
                tracing::warn!(node = %id, "cancelled while running");
                Failure::new(id.as_str(), "cancelled")
            }
            Settlement::Untouched => {
                tracing::debug!(node = %id, "not started");
                Failure::new(id.as_str(), "not started")
            }
        };
        for output in self.node.outputs() {
            let _ = output.value().fail_if_pending(&failure);
        }
        let _ = self.completion.fail(failure);
    }
}

fn provisioning_failure(node: &NodeId, cause: String) -> NodeFailure {
    NodeFailure {
        node: node.clone(),
        kind: FailureKind::Provisioning,
        cause,
        after: None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

fn assemble_report(
    plan: &ExecutionPlan,
    settlements: Vec<Settlement>,
    cancelled: bool,
    started_at: chrono::DateTime<Utc>,
) -> RunReport {
    let mut report = RunReport {
        status: RunStatus::Succeeded,
        succeeded: Vec::new(),
        failed: Vec::new(),
        skipped: Vec::new(),
        cancelled: Vec::new(),
        untouched: Vec::new(),
        started_at,
        finished_at: Utc::now(),
    };
    for (node, settlement) in plan.nodes().iter().zip(settlements) {
        let id = node.id().clone();
        match settlement {
            Settlement::Done => report.succeeded.push(id),
            Settlement::Failed(failure) => report.failed.push(failure),
            Settlement::Skipped { blocked_by } => report.skipped.push(SkippedNode { node: id, blocked_by }),
            Settlement::Cancelled => report.cancelled.push(id),
            Settlement::Untouched => report.untouched.push(id),
        }
    }
    report.status = if cancelled {
        RunStatus::Cancelled
    } else if report.failed.is_empty() && report.skipped.is_empty() {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    };
    report
}
