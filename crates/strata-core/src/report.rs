//! Structured result of a graph run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_common::error::StrataError;
use strata_common::types::{NodeId, NodeState};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every node completed.
    Succeeded,
    /// At least one node failed; independent branches may still have completed.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The producer returned an error or panicked.
    Provisioning,
    /// The node exceeded its deadline.
    Timeout,
}

/// A node that failed, with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Failed node.
    pub node: NodeId,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub cause: String,
    /// Deadline that elapsed, for timeouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Duration>,
}

impl NodeFailure {
    /// Converts the failure into the matching error.
    pub fn to_error(&self) -> StrataError {
        match (self.kind, self.after) {
            (FailureKind::Timeout, Some(after)) => StrataError::Timeout {
                node: self.node.to_string(),
                after,
            },
            _ => StrataError::ProvisioningFailed {
                node: self.node.to_string(),
                cause: self.cause.clone(),
            },
        }
    }
}

/// A node not attempted because something it depends on failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNode {
    /// Skipped node.
    pub node: NodeId,
    /// Node whose failure caused the skip.
    pub blocked_by: String,
}

/// Per-node results of one run, each list in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Overall outcome.
    pub status: RunStatus,
    /// Nodes that completed.
    pub succeeded: Vec<NodeId>,
    /// Nodes that failed.
    pub failed: Vec<NodeFailure>,
    /// Dependents of failed nodes.
    pub skipped: Vec<SkippedNode>,
    /// Nodes whose producer was running when the run was cancelled.
    pub cancelled: Vec<NodeId>,
    /// Nodes that never started.
    pub untouched: Vec<NodeId>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Returns whether every node completed.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Final state of a node, if it belongs to the run.
    pub fn state_of(&self, node: &NodeId) -> Option<NodeState> {
        if self.succeeded.contains(node) {
            Some(NodeState::Done)
        } else if self.failed.iter().any(|f| &f.node == node) {
            Some(NodeState::Failed)
        } else if self.skipped.iter().any(|s| &s.node == node) {
            Some(NodeState::Skipped)
        } else if self.cancelled.contains(node) {
            Some(NodeState::Cancelled)
        } else if self.untouched.contains(node) {
            Some(NodeState::NotStarted)
        } else {
            None
        }
    }

    /// Failure record of a node.
    pub fn failure_of(&self, node: &NodeId) -> Option<&NodeFailure> {
        self.failed.iter().find(|f| &f.node == node)
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {}: {} succeeded, {} failed, {} skipped, {} cancelled, {} untouched",
            self.status,
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            self.cancelled.len(),
            self.untouched.len(),
        )?;
        for failure in &self.failed {
            writeln!(f, "  failed   {}: {}", failure.node, failure.cause)?;
        }
        for skipped in &self.skipped {
            writeln!(f, "  skipped  {} (blocked by {})", skipped.node, skipped.blocked_by)?;
        }
        for node in &self.cancelled {
            writeln!(f, "  cancelled {node}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            status: RunStatus::Failed,
            succeeded: vec![NodeId::new("rg"), NodeId::new("cluster")],
            failed: vec![NodeFailure {
                node: NodeId::new("database"),
                kind: FailureKind::Provisioning,
                cause: "quota exceeded".into(),
                after: None,
            }],
            skipped: vec![SkippedNode {
                node: NodeId::new("app"),
                blocked_by: "database".into(),
            }],
            cancelled: Vec::new(),
            untouched: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn states_follow_lists() {
        let report = report();
        assert_eq!(report.state_of(&NodeId::new("rg")), Some(NodeState::Done));
        assert_eq!(report.state_of(&NodeId::new("database")), Some(NodeState::Failed));
        assert_eq!(report.state_of(&NodeId::new("app")), Some(NodeState::Skipped));
        assert_eq!(report.state_of(&NodeId::new("ghost")), None);
        assert!(!report.is_success());
    }

    #[test]
    fn display_lists_failures_and_skips() {
        let text = report().to_string();
        assert!(text.starts_with("run failed: 2 succeeded, 1 failed, 1 skipped"));
        assert!(text.contains("database: quota exceeded"));
        assert!(text.contains("app (blocked by database)"));
    }

    #[test]
    fn timeout_converts_to_timeout_error() {
        let failure = NodeFailure {
            node: NodeId::new("chart"),
            kind: FailureKind::Timeout,
            cause: "deadline elapsed".into(),
            after: Some(Duration::from_secs(5)),
        };
        assert!(matches!(failure.to_error(), StrataError::Timeout { ref node, .. } if node == "chart"));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(report()).expect("json");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failed"][0]["kind"], "provisioning");
        assert!(json["failed"][0].get("after").is_none());
    }
}
