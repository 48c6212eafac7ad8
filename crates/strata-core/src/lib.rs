//! # strata-core
//!
//! The infrastructure composition engine.
//!
//! Handles:
//! - **Deferred**: single-assignment values that exist only once a provisioning step completes.
//! - **Secret**: sensitivity marking and redaction.
//! - **Node**: resource nodes, their inputs, outputs, and producers.
//! - **Graph**: cycle detection and deterministic topological planning.
//! - **Executor**: dependency-ordered execution with skip propagation, timeouts, and cancellation.
//! - **Variant**: exhaustive configuration-variant resolution into input bundles.
//! - **Outputs**: publishing stack outputs and reading them from another deployment.
//! - **Backend** / **Render**: the provisioning backend and chart renderer collaborators.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod deferred;
pub mod executor;
pub mod graph;
pub mod node;
pub mod outputs;
pub mod producer;
pub mod render;
pub mod report;
pub mod secret;
pub mod values;
pub mod variant;

pub use deferred::{Deferred, Failure, all};
pub use executor::{CancelSignal, Executor};
pub use graph::{CompositionGraph, ExecutionPlan};
pub use node::{Input, Inputs, ResourceNode};
pub use report::RunReport;
pub use secret::{Sensitive, mark_sensitive, reveal};
