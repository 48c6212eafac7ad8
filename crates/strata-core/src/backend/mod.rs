//! Provisioning backend abstraction.
//!
//! The engine never talks to a cloud API directly. Producers hand a resource
//! kind, a name and a config tree to a [`ProvisioningBackend`] and settle
//! their outputs from what it returns.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_common::error::Result;
use strata_common::types::{ResourceKind, Value};

/// Outputs reported by the backend, keyed by output name.
pub type OutputMap = BTreeMap<String, Value>;

/// Identifies a provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Kind of resource.
    pub kind: ResourceKind,
    /// Logical name (the node identity).
    pub name: String,
    /// Backend-assigned identifier.
    pub id: String,
}

/// Result of a `create` call.
#[derive(Clone)]
pub struct Provisioned {
    /// Handle for later reads.
    pub handle: ResourceHandle,
    /// Outputs known as soon as creation completes.
    pub outputs: OutputMap,
}

impl std::fmt::Debug for Provisioned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioned")
            .field("handle", &self.handle)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Creates resources and reads their post-creation attributes.
///
/// `create` must be idempotent for an unchanged config: re-running a
/// deployment against an existing resource returns the existing handle.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Creates (or updates) a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the resource.
    async fn create(&self, kind: ResourceKind, name: &str, config: &Value) -> Result<Provisioned>;

    /// Reads attributes only available after creation (credentials, assigned addresses).
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown or the read fails.
    async fn read(&self, handle: &ResourceHandle) -> Result<OutputMap>;
}
