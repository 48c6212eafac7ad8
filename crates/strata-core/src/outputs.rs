//! Stack outputs: publishing a deployment's values and reading them from another.
//!
//! A deployment publishes named outputs through a [`StackOutputPublisher`]
//! once its run finishes. Another deployment reads them through a
//! [`StackReference`] node, which looks each name up in an [`OutputStore`]
//! with a bounded retry budget before failing with `NotFound`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_common::config::RetryPolicy;
use strata_common::constants::{OUTPUTS_SUFFIX, REDACTED};
use strata_common::error::{Result, StrataError};
use strata_common::types::{DeploymentId, NodeId, ResourceKind, Sensitivity, Value};

use crate::deferred::{AnyDeferred, Deferred};
use crate::node::{NodeBuilder, ResourceNode, ValueRef};
use crate::producer::{ProvisionContext, Producer};
use crate::secret::{Sensitive, redact};

/// One published output as persisted.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutput {
    /// Published value.
    pub value: Value,
    /// Whether the value is a secret.
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// When the value was published.
    pub published_at: DateTime<Utc>,
}

impl StoredOutput {
    /// Creates an output stamped with the current time.
    pub fn new(value: Value, sensitivity: Sensitivity) -> Self {
        Self {
            value,
            sensitivity,
            published_at: Utc::now(),
        }
    }

    /// Display form, redacted unless `reveal` is set.
    pub fn display(&self, reveal: bool) -> String {
        if reveal {
            redact(&self.value, Sensitivity::Plain)
        } else {
            redact(&self.value, self.sensitivity)
        }
    }
}

impl fmt::Debug for StoredOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("StoredOutput");
        if self.sensitivity.is_secret() {
            let _ = out.field("value", &format_args!("{REDACTED}"));
        } else {
            let _ = out.field("value", &self.value);
        }
        out.field("sensitivity", &self.sensitivity)
            .field("published_at", &self.published_at)
            .finish()
    }
}

/// Durable map of deployment outputs.
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Stores (or replaces) an output.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn put(&self, deployment: &DeploymentId, name: &str, output: StoredOutput) -> Result<()>;

    /// Reads an output, if published.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get(&self, deployment: &DeploymentId, name: &str) -> Result<Option<StoredOutput>>;

    /// Reads every output of a deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn list(&self, deployment: &DeploymentId) -> Result<BTreeMap<String, StoredOutput>>;
}

/// Process-local [`OutputStore`].
#[derive(Debug, Default)]
pub struct MemoryOutputStore {
    entries: Mutex<BTreeMap<DeploymentId, BTreeMap<String, StoredOutput>>>,
}

impl MemoryOutputStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutputStore for MemoryOutputStore {
    async fn put(&self, deployment: &DeploymentId, name: &str, output: StoredOutput) -> Result<()> {
        let _ = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(deployment.clone())
            .or_default()
            .insert(name.to_owned(), output);
        Ok(())
    }

    async fn get(&self, deployment: &DeploymentId, name: &str) -> Result<Option<StoredOutput>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(deployment)
            .and_then(|outputs| outputs.get(name).cloned()))
    }

    async fn list(&self, deployment: &DeploymentId) -> Result<BTreeMap<String, StoredOutput>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(deployment)
            .cloned()
            .unwrap_or_default())
    }
}

/// [`OutputStore`] keeping one `<deployment>.outputs.json` file per deployment.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Opens (and creates) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| StrataError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of a deployment's outputs file.
    pub fn path_for(&self, deployment: &DeploymentId) -> PathBuf {
        self.dir.join(format!("{deployment}{OUTPUTS_SUFFIX}"))
    }

    async fn read(&self, deployment: &DeploymentId) -> Result<BTreeMap<String, StoredOutput>> {
        let path = self.path_for(deployment);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StrataError::Io { path, source: e }),
        }
    }
}

#[async_trait]
impl OutputStore for JsonFileStore {
    async fn put(&self, deployment: &DeploymentId, name: &str, output: StoredOutput) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut entries = self.read(deployment).await?;
        let _ = entries.insert(name.to_owned(), output);

        let path = self.path_for(deployment);
        let staging = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| StrataError::Io {
                path: staging.clone(),
                source: e,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| StrataError::Io { path, source: e })?;
        tracing::debug!(deployment = %deployment, output = name, "output stored");
        Ok(())
    }

    async fn get(&self, deployment: &DeploymentId, name: &str) -> Result<Option<StoredOutput>> {
        Ok(self.read(deployment).await?.remove(name))
    }

    async fn list(&self, deployment: &DeploymentId) -> Result<BTreeMap<String, StoredOutput>> {
        self.read(deployment).await
    }
}

struct Published {
    name: String,
    value: ValueRef,
    sensitivity: Sensitivity,
}

/// Result of flushing published outputs to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Outputs written to the store.
    pub published: Vec<String>,
    /// Outputs whose value never resolved, with the reason.
    pub unresolved: Vec<(String, String)>,
}

/// Collects the named outputs of one deployment.
pub struct StackOutputPublisher {
    deployment: DeploymentId,
    entries: Vec<Published>,
}

impl StackOutputPublisher {
    /// Creates a publisher for a deployment.
    pub const fn new(deployment: DeploymentId) -> Self {
        Self {
            deployment,
            entries: Vec::new(),
        }
    }

    /// Deployment the outputs belong to.
    pub const fn deployment(&self) -> &DeploymentId {
        &self.deployment
    }

    /// Registers a named output.
    ///
    /// A value that is already sensitive stays secret whatever `sensitivity` says.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::DuplicateIdentity`] if the name is already published.
    pub fn publish<V>(&mut self, name: &str, value: &V, sensitivity: Sensitivity) -> Result<()>
    where
        V: AnyDeferred + Clone + 'static,
    {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(StrataError::DuplicateIdentity {
                id: format!("{}.{name}", self.deployment),
            });
        }
        let inherent = if value.is_sensitive() {
            Sensitivity::Secret
        } else {
            Sensitivity::Plain
        };
        self.entries.push(Published {
            name: name.to_owned(),
            value: Arc::new(value.clone()),
            sensitivity: sensitivity.max(inherent),
        });
        Ok(())
    }

    /// Registers an output whose value is known up front.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::DuplicateIdentity`] if the name is already published.
    pub fn publish_static(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value: Deferred<Value> = Deferred::resolved(name, value.into());
        self.publish(name, &value, Sensitivity::Plain)
    }

    /// Names of the registered outputs, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Effective sensitivity of a registered output.
    pub fn sensitivity_of(&self, name: &str) -> Option<Sensitivity> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.sensitivity)
    }

    /// Writes every resolved output to `store`.
    ///
    /// Outputs that are still pending or failed are reported, not written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a write.
    pub async fn flush(&self, store: &dyn OutputStore) -> Result<PublishSummary> {
        let mut summary = PublishSummary::default();
        for entry in &self.entries {
            match entry.value.snapshot() {
                Some(Ok(value)) => {
                    store
                        .put(
                            &self.deployment,
                            &entry.name,
                            StoredOutput::new(value, entry.sensitivity),
                        )
                        .await?;
                    summary.published.push(entry.name.clone());
                }
                Some(Err(failure)) => summary
                    .unresolved
                    .push((entry.name.clone(), failure.to_string())),
                None => summary
                    .unresolved
                    .push((entry.name.clone(), "value is still pending".into())),
            }
        }
        tracing::info!(
            deployment = %self.deployment,
            published = summary.published.len(),
            unresolved = summary.unresolved.len(),
            "outputs flushed"
        );
        Ok(summary)
    }

    /// Current display form of every output, secrets redacted unless `reveal`.
    pub fn render(&self, reveal: bool) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|entry| {
                let shown = match entry.value.snapshot() {
                    Some(Ok(value)) if reveal => redact(&value, Sensitivity::Plain),
                    Some(Ok(value)) => redact(&value, entry.sensitivity),
                    Some(Err(failure)) => format!("<unavailable: {}>", failure.message),
                    None => "<pending>".to_owned(),
                };
                (entry.name.clone(), shown)
            })
            .collect()
    }
}

impl fmt::Debug for StackOutputPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackOutputPublisher")
            .field("deployment", &self.deployment)
            .field("outputs", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads another deployment's outputs with a bounded retry budget.
#[derive(Clone)]
pub struct OutputLookup {
    store: Arc<dyn OutputStore>,
    policy: RetryPolicy,
}

impl OutputLookup {
    /// Creates a lookup over `store`.
    pub fn new(store: Arc<dyn OutputStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Looks an output up, retrying while it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] once the retry budget is spent, or
    /// the store's error if a read fails.
    pub async fn lookup(&self, deployment: &DeploymentId, name: &str) -> Result<StoredOutput> {
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            if let Some(output) = self.store.get(deployment, name).await? {
                return Ok(output);
            }
            if attempt < attempts {
                tracing::debug!(
                    deployment = %deployment,
                    output = name,
                    attempt,
                    "output not published yet, retrying"
                );
                tokio::time::sleep(self.policy.backoff()).await;
            }
        }
        Err(StrataError::NotFound {
            deployment: deployment.to_string(),
            name: name.to_owned(),
            attempts,
        })
    }
}

impl fmt::Debug for OutputLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputLookup")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A node that reads outputs published by another deployment.
///
/// Each required output becomes an output of the reference node, so
/// consumers depend on the reference like on any other node.
#[derive(Debug)]
pub struct StackReference {
    builder: NodeBuilder,
    source: DeploymentId,
    lookup: OutputLookup,
}

impl StackReference {
    /// Creates a reference to `source`.
    pub fn new(id: impl Into<NodeId>, source: DeploymentId, lookup: OutputLookup) -> Self {
        Self {
            builder: ResourceNode::builder(id, ResourceKind::StackReference),
            source,
            lookup,
        }
    }

    /// Deployment being referenced.
    pub const fn source(&self) -> &DeploymentId {
        &self.source
    }

    /// Requires a plain output.
    pub fn require_output<T>(&mut self, name: &str) -> Deferred<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        self.builder.output(name)
    }

    /// Requires a secret output.
    pub fn require_secret<T>(&mut self, name: &str) -> Sensitive<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        self.builder.secret_output(name)
    }

    /// Finishes the reference node.
    ///
    /// # Errors
    ///
    /// Returns an error if the same output was required twice.
    pub fn into_node(self) -> Result<ResourceNode> {
        self.builder.build(ReadOutputs {
            source: self.source,
            lookup: self.lookup,
        })
    }
}

struct ReadOutputs {
    source: DeploymentId,
    lookup: OutputLookup,
}

#[async_trait]
impl Producer for ReadOutputs {
    async fn provision(&self, ctx: ProvisionContext) -> Result<()> {
        for declared in ctx.outputs() {
            let stored = ctx
                .until_cancelled(self.lookup.lookup(&self.source, declared.name()))
                .await?;
            if stored.sensitivity.is_secret() && !declared.value().is_sensitive() {
                return Err(StrataError::InvalidConfig {
                    key: format!("{}.{}", self.source, declared.name()),
                    message: "output is secret and must be required as a secret".into(),
                });
            }
            declared.value().settle_json(stored.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::secret::reveal;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn flush_writes_resolved_outputs_and_reports_the_rest() {
        let endpoint: Deferred<String> = Deferred::pending("web");
        let address: Deferred<String> = Deferred::pending("frontend");
        let password = Sensitive::literal("grafana", "hunter2".to_string());
        let mut publisher = StackOutputPublisher::new(DeploymentId::new("dev"));
        publisher.publish("webEndpoint", &endpoint, Sensitivity::Plain).expect("web");
        publisher.publish("frontendAddress", &address, Sensitivity::Plain).expect("frontend");
        publisher.publish("grafanaPassword", &password, Sensitivity::Plain).expect("pw");
        endpoint.resolve("http://10.0.0.4:8088".into()).expect("resolve");

        let store = MemoryOutputStore::new();
        let summary = publisher.flush(&store).await.expect("flush");
        assert_eq!(summary.published, vec!["webEndpoint", "grafanaPassword"]);
        assert_eq!(summary.unresolved.len(), 1);
        assert_eq!(summary.unresolved[0].0, "frontendAddress");

        let stored = store
            .get(&DeploymentId::new("dev"), "grafanaPassword")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.sensitivity, Sensitivity::Secret);
        assert!(!format!("{stored:?}").contains("hunter2"));
    }

    #[test]
    fn duplicate_output_name_is_rejected() {
        let mut publisher = StackOutputPublisher::new(DeploymentId::new("dev"));
        publisher.publish_static("a", "x").expect("first");
        let err = publisher.publish_static("a", "y").expect_err("dup");
        assert!(matches!(err, StrataError::DuplicateIdentity { ref id } if id == "dev.a"));
    }

    #[test]
    fn render_redacts_secrets_unless_revealed() {
        let mut publisher = StackOutputPublisher::new(DeploymentId::new("dev"));
        let token = Deferred::resolved("token", "s3cr3t".to_string());
        publisher.publish("token", &token, Sensitivity::Secret).expect("token");
        publisher.publish_static("port", 7233).expect("port");
        assert_eq!(
            publisher.render(false),
            vec![
                ("token".to_string(), REDACTED.to_string()),
                ("port".to_string(), "7233".to_string()),
            ]
        );
        assert_eq!(publisher.render(true)[0].1, "s3cr3t");
    }

    #[tokio::test]
    async fn lookup_exhausts_budget_then_not_found() {
        let lookup = OutputLookup::new(Arc::new(MemoryOutputStore::new()), fast_policy(3));
        let err = lookup
            .lookup(&DeploymentId::new("k8s"), "kubeconfig")
            .await
            .expect_err("missing");
        assert!(matches!(
            err,
            StrataError::NotFound { ref name, attempts: 3, .. } if name == "kubeconfig"
        ));
    }

    #[tokio::test]
    async fn lookup_sees_late_publication() {
        let store = Arc::new(MemoryOutputStore::new());
        let lookup = OutputLookup::new(
            Arc::clone(&store) as Arc<dyn OutputStore>,
            RetryPolicy {
                attempts: 50,
                backoff_ms: 5,
            },
        );
        let writer = Arc::clone(&store);
        let publish = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .put(
                    &DeploymentId::new("k8s"),
                    "registryLoginServer",
                    StoredOutput::new(json!("acr.azurecr.io"), Sensitivity::Plain),
                )
                .await
        });
        let found = lookup
            .lookup(&DeploymentId::new("k8s"), "registryLoginServer")
            .await
            .expect("found");
        assert_eq!(found.value, json!("acr.azurecr.io"));
        publish.await.expect("join").expect("put");
    }

    #[tokio::test]
    async fn json_file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path()).expect("open");
        let deployment = DeploymentId::new("k8s");
        store
            .put(&deployment, "kubeconfig", StoredOutput::new(json!("apiVersion: v1"), Sensitivity::Secret))
            .await
            .expect("put");
        store
            .put(&deployment, "registryLoginServer", StoredOutput::new(json!("acr.io"), Sensitivity::Plain))
            .await
            .expect("put");

        assert!(store.path_for(&deployment).exists());
        let reopened = JsonFileStore::open(dir.path()).expect("reopen");
        let all = reopened.list(&deployment).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all["kubeconfig"].sensitivity, Sensitivity::Secret);
        assert!(reopened.get(&DeploymentId::new("other"), "x").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn stack_reference_settles_required_outputs() {
        let store = Arc::new(MemoryOutputStore::new());
        let source = DeploymentId::new("k8s");
        store
            .put(&source, "kubeconfig", StoredOutput::new(json!("apiVersion: v1"), Sensitivity::Secret))
            .await
            .expect("put");
        store
            .put(&source, "registryLoginServer", StoredOutput::new(json!("acr.io"), Sensitivity::Plain))
            .await
            .expect("put");

        let lookup = OutputLookup::new(store, fast_policy(1));
        let mut reference = StackReference::new("k8s-ref", source, lookup);
        let kubeconfig: Sensitive<String> = reference.require_secret("kubeconfig");
        let login: Deferred<String> = reference.require_output("registryLoginServer");
        let node = reference.into_node().expect("node");

        let backend = Arc::new(crate::backend::memory::MemoryBackend::new());
        let ctx = ProvisionContext::new(
            &node,
            crate::node::Inputs::new(),
            crate::producer::Collaborators::new(backend),
            crate::executor::CancelSignal::new(),
        );
        node.producer().provision(ctx).await.expect("provision");
        assert_eq!(login.peek(), Some(Ok("acr.io".to_string())));
        assert_eq!(reveal(&kubeconfig).peek(), Some(Ok("apiVersion: v1".to_string())));
    }

    #[tokio::test]
    async fn secret_output_cannot_be_read_as_plain() {
        let store = Arc::new(MemoryOutputStore::new());
        let source = DeploymentId::new("k8s");
        store
            .put(&source, "registryAdminPassword", StoredOutput::new(json!("pw"), Sensitivity::Secret))
            .await
            .expect("put");
        let mut reference = StackReference::new("ref", source, OutputLookup::new(store, fast_policy(1)));
        let _: Deferred<String> = reference.require_output("registryAdminPassword");
        let node = reference.into_node().expect("node");
        let ctx = ProvisionContext::new(
            &node,
            crate::node::Inputs::new(),
            crate::producer::Collaborators::new(Arc::new(crate::backend::memory::MemoryBackend::new())),
            crate::executor::CancelSignal::new(),
        );
        assert!(node.producer().provision(ctx).await.is_err());
    }
}
