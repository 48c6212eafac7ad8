//! # strata-stack
//!
//! The workflow-orchestration stack assembled on top of the composition engine.
//!
//! Handles:
//! - **Settings**: eager validation of the flat stack configuration.
//! - **Storage** / **Visibility**: the variant axes of the orchestration chart.
//! - **Cluster**: resource group, managed cluster, node pools, and container registry.
//! - **Datastores**: Cassandra, Elasticsearch, Prometheus, and Grafana for split deployments.
//! - **Orchestration**: the orchestration chart and its endpoints.
//! - **Bench**: the benchmark image and chart.
//! - **Stacks**: full and split deployments and their published outputs.
//! - **Simulate**: a provisioning profile for dry runs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bench;
pub mod cluster;
pub mod datastores;
pub mod orchestration;
pub mod scope;
pub mod settings;
pub mod simulate;
pub mod stacks;
pub mod storage;
pub mod visibility;

pub use stacks::{StackDeployment, StackKind, assemble, assemble_with, default_resolver};
