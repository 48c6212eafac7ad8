//! Unified error types for the Strata workspace.
//!
//! Build-time variants (`CyclicDependency`, `DuplicateIdentity`,
//! `UnknownDependency`, `UnboundValue`, `MissingConfig`, `InvalidConfig`,
//! `UnhandledVariant`, `ConflictingKey`) are raised before any provisioning
//! call is made. Run-time variants describe why a single node did not
//! complete; the executor records them per node instead of aborting the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StrataError {
    /// The dependency graph contains a cycle.
    #[error("cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Node identities taking part in the cycle.
        cycle: Vec<String>,
    },

    /// Two nodes (or two published outputs) share the same identity.
    #[error("duplicate identity: {id}")]
    DuplicateIdentity {
        /// The colliding identity.
        id: String,
    },

    /// A node depends on, or is owned by, a node that was never registered.
    #[error("node \"{node}\" depends on unknown node \"{dependency}\"")]
    UnknownDependency {
        /// Node declaring the dependency.
        node: String,
        /// Identity that could not be found.
        dependency: String,
    },

    /// A node consumes a pending value that no node will ever produce.
    #[error("node \"{node}\" consumes \"{value}\", which has no producing node")]
    UnboundValue {
        /// Node consuming the value.
        node: String,
        /// Label of the unbound value.
        value: String,
    },

    /// A required configuration key is absent.
    #[error("missing required configuration key: {key}")]
    MissingConfig {
        /// The missing key.
        key: String,
    },

    /// A configuration key is present but unusable.
    #[error("invalid configuration for {key}: {message}")]
    InvalidConfig {
        /// The offending key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A configuration variant tag the resolver was not built to handle.
    #[error("unhandled {axis} variant: \"{tag}\"")]
    UnhandledVariant {
        /// Variant axis, e.g. `storage`.
        axis: String,
        /// The unhandled tag.
        tag: String,
    },

    /// Two configuration sources set the same key to different values.
    #[error("conflicting values for configuration key: {key}")]
    ConflictingKey {
        /// The conflicting key.
        key: String,
    },

    /// A deferred value was settled more than once.
    #[error("deferred value already resolved: {value}")]
    AlreadyResolved {
        /// Label of the value.
        value: String,
    },

    /// A cross-deployment output was never published.
    #[error("output \"{name}\" not found in deployment \"{deployment}\" after {attempts} attempt(s)")]
    NotFound {
        /// Source deployment.
        deployment: String,
        /// Output name.
        name: String,
        /// Number of lookup attempts made.
        attempts: u32,
    },

    /// A producer asked for an input its node never declared.
    #[error("missing input: {key}")]
    MissingInput {
        /// The missing input key.
        key: String,
    },

    /// A node's provisioning step failed.
    #[error("provisioning of \"{node}\" failed: {cause}")]
    ProvisioningFailed {
        /// Failing node.
        node: String,
        /// Description of the cause.
        cause: String,
    },

    /// A node exceeded its deadline.
    #[error("node \"{node}\" timed out after {after:?}")]
    Timeout {
        /// Node that timed out.
        node: String,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// A node was cancelled while running.
    #[error("node \"{node}\" was cancelled")]
    Cancelled {
        /// Cancelled node.
        node: String,
    },

    /// The provisioning backend rejected a call.
    #[error("backend error: {message}")]
    Backend {
        /// Description reported by the backend.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StrataError {
    /// Returns whether this error is raised while assembling a graph,
    /// before any provisioning side effect.
    #[must_use]
    pub const fn is_build_time(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::DuplicateIdentity { .. }
                | Self::UnknownDependency { .. }
                | Self::UnboundValue { .. }
                | Self::MissingConfig { .. }
                | Self::InvalidConfig { .. }
                | Self::UnhandledVariant { .. }
                | Self::ConflictingKey { .. }
        )
    }

    /// Shorthand for a [`StrataError::Backend`] error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members() {
        let err = StrataError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn build_time_classification() {
        assert!(StrataError::MissingConfig { key: "k".into() }.is_build_time());
        assert!(
            StrataError::UnhandledVariant {
                axis: "storage".into(),
                tag: "postgres".into(),
            }
            .is_build_time()
        );
        assert!(!StrataError::backend("boom").is_build_time());
        assert!(
            !StrataError::Timeout {
                node: "db".into(),
                after: Duration::from_secs(1),
            }
            .is_build_time()
        );
    }

    #[test]
    fn not_found_mentions_attempts() {
        let err = StrataError::NotFound {
            deployment: "k8s".into(),
            name: "kubeconfig".into(),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("kubeconfig"), "got: {msg}");
        assert!(msg.contains("3 attempt"), "got: {msg}");
    }
}
