//! In-process backend that records calls and answers from per-kind responders.
//!
//! Used for dry runs and tests. Failures and delays can be injected per
//! resource name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use strata_common::error::{Result, StrataError};
use strata_common::types::{ResourceKind, Value};

use super::{OutputMap, Provisioned, ProvisioningBackend, ResourceHandle};

/// Computes outputs from a resource name and its config.
pub type Responder = Arc<dyn Fn(&str, &Value) -> Result<OutputMap> + Send + Sync>;

/// Backend operation recorded by [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// A `create` call.
    Create,
    /// A `read` call.
    Read,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    /// Operation.
    pub verb: Verb,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
}

struct Record {
    handle: ResourceHandle,
    config: Value,
    outputs: OutputMap,
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Record>,
    calls: Vec<BackendCall>,
}

/// In-memory [`ProvisioningBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    on_create: HashMap<ResourceKind, Responder>,
    on_read: HashMap<ResourceKind, Responder>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Creates a backend with no responders: every resource reports only `id` and `name`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outputs returned by `create` for a kind.
    #[must_use]
    pub fn on_create(
        mut self,
        kind: ResourceKind,
        responder: impl Fn(&str, &Value) -> Result<OutputMap> + Send + Sync + 'static,
    ) -> Self {
        let _ = self.on_create.insert(kind, Arc::new(responder));
        self
    }

    /// Sets the outputs returned by `read` for a kind.
    #[must_use]
    pub fn on_read(
        mut self,
        kind: ResourceKind,
        responder: impl Fn(&str, &Value) -> Result<OutputMap> + Send + Sync + 'static,
    ) -> Self {
        let _ = self.on_read.insert(kind, Arc::new(responder));
        self
    }

    /// Makes `create` fail for the named resource.
    #[must_use]
    pub fn fail(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        let _ = self.failures.insert(name.into(), message.into());
        self
    }

    /// Makes `create` take at least `delay` for the named resource.
    #[must_use]
    pub fn delay(mut self, name: impl Into<String>, delay: Duration) -> Self {
        let _ = self.delays.insert(name.into(), delay);
        self
    }

    /// Returns every call made so far, in call order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Returns the names of resources created so far, in creation order.
    pub fn created(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.verb == Verb::Create)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Returns the config a resource was last created with.
    pub fn config_of(&self, name: &str) -> Option<Value> {
        self.state().records.get(name).map(|r| r.config.clone())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, verb: Verb, kind: ResourceKind, name: &str) {
        self.state().calls.push(BackendCall {
            verb,
            kind,
            name: name.to_owned(),
        });
    }
}

fn with_identity(mut outputs: OutputMap, handle: &ResourceHandle) -> OutputMap {
    let _ = outputs
        .entry("id".into())
        .or_insert_with(|| Value::from(handle.id.as_str()));
    let _ = outputs
        .entry("name".into())
        .or_insert_with(|| Value::from(handle.name.as_str()));
    outputs
}

#[async_trait]
impl ProvisioningBackend for MemoryBackend {
    async fn create(&self, kind: ResourceKind, name: &str, config: &Value) -> Result<Provisioned> {
        self.record(Verb::Create, kind, name);
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(name) {
            return Err(StrataError::backend(message.as_str()));
        }

        let unchanged = self
            .state()
            .records
            .get(name)
            .filter(|r| r.handle.kind == kind && r.config == *config)
            .map(|r| Provisioned {
                handle: r.handle.clone(),
                outputs: r.outputs.clone(),
            });
        if let Some(existing) = unchanged {
            tracing::debug!(resource = name, "unchanged, keeping existing resource");
            return Ok(existing);
        }

        let handle = ResourceHandle {
            kind,
            name: name.to_owned(),
            id: format!("{kind}/{name}"),
        };
        let outputs = match self.on_create.get(&kind) {
            Some(responder) => responder(name, config)?,
            None => OutputMap::new(),
        };
        let outputs = with_identity(outputs, &handle);
        let _ = self.state().records.insert(
            name.to_owned(),
            Record {
                handle: handle.clone(),
                config: config.clone(),
                outputs: outputs.clone(),
            },
        );
        Ok(Provisioned { handle, outputs })
    }

    async fn read(&self, handle: &ResourceHandle) -> Result<OutputMap> {
        self.record(Verb::Read, handle.kind, &handle.name);
        let (config, outputs) = {
            let state = self.state();
            let record = state
                .records
                .get(&handle.name)
                .ok_or_else(|| StrataError::backend(format!("unknown resource {}", handle.id)))?;
            (record.config.clone(), record.outputs.clone())
        };
        match self.on_read.get(&handle.kind) {
            Some(responder) => Ok(with_identity(responder(&handle.name, &config)?, handle)),
            None => Ok(outputs),
        }
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("failures", &self.failures)
            .field("delays", &self.delays)
            .field("calls", &self.state().calls.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_reports_identity_and_responder_outputs() {
        let backend = MemoryBackend::new().on_create(ResourceKind::ContainerRegistry, |name, _| {
            Ok(OutputMap::from([(
                "loginServer".into(),
                json!(format!("{name}.azurecr.io")),
            )]))
        });
        let provisioned = backend
            .create(ResourceKind::ContainerRegistry, "registry", &json!({}))
            .await
            .expect("create");
        assert_eq!(provisioned.handle.id, "container-registry/registry");
        assert_eq!(provisioned.outputs["loginServer"], json!("registry.azurecr.io"));
        assert_eq!(provisioned.outputs["name"], json!("registry"));
    }

    #[tokio::test]
    async fn unchanged_create_is_idempotent() {
        let generated = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&generated);
        let backend = MemoryBackend::new().on_create(ResourceKind::RandomString, move |_, _| {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(OutputMap::from([("result".into(), json!(format!("x{n}")))]))
        });
        let config = json!({ "length": 6 });
        let first = backend
            .create(ResourceKind::RandomString, "suffix", &config)
            .await
            .expect("first");
        let second = backend
            .create(ResourceKind::RandomString, "suffix", &config)
            .await
            .expect("second");
        assert_eq!(first.outputs, second.outputs);
        assert_eq!(generated.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(backend.created(), vec!["suffix", "suffix"]);
    }

    #[tokio::test]
    async fn changed_config_recreates_outputs() {
        let backend = MemoryBackend::new();
        let _ = backend
            .create(ResourceKind::Database, "db", &json!({ "sku": "small" }))
            .await
            .expect("first");
        let _ = backend
            .create(ResourceKind::Database, "db", &json!({ "sku": "large" }))
            .await
            .expect("second");
        assert_eq!(backend.config_of("db"), Some(json!({ "sku": "large" })));
    }

    #[tokio::test]
    async fn injected_failure_is_returned() {
        let backend = MemoryBackend::new().fail("cluster", "quota exceeded");
        let err = backend
            .create(ResourceKind::ManagedCluster, "cluster", &json!({}))
            .await
            .expect_err("fail");
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn read_uses_read_responder_with_stored_config() {
        let backend = MemoryBackend::new().on_read(ResourceKind::ChartRelease, |_, config| {
            Ok(OutputMap::from([("echo".into(), config["port"].clone())]))
        });
        let provisioned = backend
            .create(ResourceKind::ChartRelease, "chart", &json!({ "port": 8088 }))
            .await
            .expect("create");
        let read = backend.read(&provisioned.handle).await.expect("read");
        assert_eq!(read["echo"], json!(8088));
        assert_eq!(
            backend.calls().last().map(|c| c.verb),
            Some(Verb::Read)
        );
    }

    #[tokio::test]
    async fn read_of_unknown_resource_fails() {
        let backend = MemoryBackend::new();
        let handle = ResourceHandle {
            kind: ResourceKind::Database,
            name: "db".into(),
            id: "database/db".into(),
        };
        assert!(backend.read(&handle).await.is_err());
    }
}
