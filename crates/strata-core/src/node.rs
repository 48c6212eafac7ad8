//! Resource nodes: one provisioning unit with declared inputs, outputs, and a producer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_common::constants::{REDACTED, VALUES_PREFIX};
use strata_common::error::{Result, StrataError};
use strata_common::types::{NodeId, ResourceKind, Sensitivity, Value};

use crate::deferred::{AnyDeferred, Deferred};
use crate::producer::{CreateResource, Producer};
use crate::secret::{Sensitive, mark_sensitive};
use crate::variant::InputBundle;

/// Shared, type-erased handle to a deferred value.
pub type ValueRef = Arc<dyn AnyDeferred>;

/// One declared input of a node: a literal or a reference to a deferred value.
#[derive(Clone)]
pub enum Input {
    /// A value known at graph-build time.
    Literal(Value),
    /// A value produced by another node (or a sensitive literal).
    Deferred(ValueRef),
}

impl Input {
    /// Creates a literal input.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates an already-resolved sensitive input.
    pub fn secret<T>(label: impl Into<String>, value: T) -> Self
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        Self::Deferred(Arc::new(Sensitive::literal(label, value)))
    }

    /// Returns the nodes producing this input (none for literals).
    pub fn origins(&self) -> Option<&BTreeSet<NodeId>> {
        match self {
            Self::Literal(_) => None,
            Self::Deferred(value) => Some(value.origins()),
        }
    }

    /// Returns whether the input must be redacted.
    pub fn is_sensitive(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Deferred(value) => value.is_sensitive(),
        }
    }

    /// Returns whether two inputs denote the same value.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Deferred(a), Self::Deferred(b)) => a.slot_id() == b.slot_id(),
            _ => false,
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Deferred(value) if value.is_sensitive() => f
                .debug_tuple("Deferred")
                .field(&format_args!("{} {REDACTED}", value.label()))
                .finish(),
            Self::Deferred(value) => f.debug_tuple("Deferred").field(&value.label()).finish(),
        }
    }
}

impl<T> From<&Deferred<T>> for Input
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn from(value: &Deferred<T>) -> Self {
        Self::Deferred(Arc::new(value.clone()))
    }
}

impl<T> From<&Sensitive<T>> for Input
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn from(value: &Sensitive<T>) -> Self {
        Self::Deferred(Arc::new(value.clone()))
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Self::Literal(Value::from(value))
    }
}

/// Resolved inputs handed to a producer.
///
/// `Debug` redacts every input that came from a sensitive value.
#[derive(Clone, Default)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
    sensitive: BTreeSet<String>,
}

impl Inputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resolved input.
    pub fn insert(&mut self, key: impl Into<String>, value: Value, sensitivity: Sensitivity) {
        let key = key.into();
        if sensitivity.is_secret() {
            let _ = self.sensitive.insert(key.clone());
        }
        let _ = self.values.insert(key, value);
    }

    /// Adds a resolved input, returning the set for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value.into(), Sensitivity::Plain);
        self
    }

    /// Returns an input by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns a required input.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::MissingInput`] if the key was not declared.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| StrataError::MissingInput { key: key.into() })
    }

    /// Returns a required string input.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is absent or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| StrataError::InvalidConfig {
                key: key.into(),
                message: "expected a string".into(),
            })
    }

    /// Decodes an input into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is absent or does not decode.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(serde_json::from_value(self.require(key)?.clone())?)
    }

    /// Returns whether an input came from a sensitive value.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive.contains(key)
    }

    /// Returns all input keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns the number of inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Nests the inputs under `prefix.` into a values tree, prefix stripped.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] on clashing paths.
    pub fn values_tree(&self, prefix: &str) -> Result<Value> {
        let dotted = format!("{prefix}.");
        crate::values::nest(
            self.values
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(dotted.as_str()).map(|k| (k, v.clone()))),
        )
    }

    /// Nests every input not under `prefix.` into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] on clashing paths.
    pub fn tree_without(&self, prefix: &str) -> Result<Value> {
        let dotted = format!("{prefix}.");
        crate::values::nest(
            self.values
                .iter()
                .filter(|(k, _)| !k.starts_with(dotted.as_str()))
                .map(|(k, v)| (k.as_str(), v.clone())),
        )
    }

    /// Nests every input into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] on clashing paths.
    pub fn config_tree(&self) -> Result<Value> {
        crate::values::nest(self.values.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

impl fmt::Debug for Inputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if self.sensitive.contains(key) {
                let _ = map.entry(key, &format_args!("{REDACTED}"));
            } else {
                let _ = map.entry(key, value);
            }
        }
        map.finish()
    }
}

/// When a declared output becomes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPhase {
    /// Returned by the backend's `create` call.
    Create,
    /// Fetched with a `read` after creation completes (credentials, assigned addresses).
    Read,
}

/// An output a node promises to settle.
#[derive(Clone)]
pub struct DeclaredOutput {
    name: String,
    value: ValueRef,
    phase: OutputPhase,
}

impl DeclaredOutput {
    /// Output name, also the backend output key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The erased deferred value.
    pub fn value(&self) -> &ValueRef {
        &self.value
    }

    /// When the output is settled.
    pub const fn phase(&self) -> OutputPhase {
        self.phase
    }
}

impl fmt::Debug for DeclaredOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclaredOutput")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("sensitive", &self.value.is_sensitive())
            .finish()
    }
}

/// One provisioning unit.
///
/// Immutable once built; the executor tracks its run state separately.
pub struct ResourceNode {
    id: NodeId,
    kind: ResourceKind,
    inputs: Vec<(String, Input)>,
    after: Vec<NodeId>,
    parent: Option<NodeId>,
    outputs: Vec<DeclaredOutput>,
    producer: Arc<dyn Producer>,
    timeout: Option<Duration>,
}

impl ResourceNode {
    /// Starts building a node.
    pub fn builder(id: impl Into<NodeId>, kind: ResourceKind) -> NodeBuilder {
        NodeBuilder {
            id: id.into(),
            kind,
            inputs: Vec::new(),
            after: Vec::new(),
            parent: None,
            outputs: Vec::new(),
            timeout: None,
        }
    }

    /// Node identity.
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// Resource kind.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Declared inputs in declaration order.
    pub fn inputs(&self) -> &[(String, Input)] {
        &self.inputs
    }

    /// Declared outputs in declaration order.
    pub fn outputs(&self) -> &[DeclaredOutput] {
        &self.outputs
    }

    /// Looks up a declared output.
    pub fn output(&self, name: &str) -> Option<&DeclaredOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Parent scope owning this node for teardown ordering.
    pub const fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    /// Node-specific deadline, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Nodes this node depends on: producers of its inputs plus explicit `after` nodes.
    pub fn dependencies(&self) -> BTreeSet<NodeId> {
        self.inputs
            .iter()
            .filter_map(|(_, input)| input.origins())
            .flatten()
            .chain(&self.after)
            .cloned()
            .collect()
    }

    pub(crate) fn producer(&self) -> Arc<dyn Producer> {
        Arc::clone(&self.producer)
    }
}

impl fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("after", &self.after)
            .field("parent", &self.parent)
            .field("outputs", &self.outputs)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`ResourceNode`].
///
/// Outputs are declared through `&mut` methods that hand back the typed
/// deferred value; everything else chains by value.
#[derive(Debug)]
pub struct NodeBuilder {
    id: NodeId,
    kind: ResourceKind,
    inputs: Vec<(String, Input)>,
    after: Vec<NodeId>,
    parent: Option<NodeId>,
    outputs: Vec<DeclaredOutput>,
    timeout: Option<Duration>,
}

impl NodeBuilder {
    /// Identity of the node being built.
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// Declares an input.
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, input: impl Into<Input>) -> Self {
        self.inputs.push((key.into(), input.into()));
        self
    }

    /// Declares every entry of a bundle as an input.
    #[must_use]
    pub fn bundle(mut self, bundle: InputBundle) -> Self {
        self.inputs.extend(bundle);
        self
    }

    /// Declares every entry of a bundle as a chart value (under `values.`).
    #[must_use]
    pub fn values(mut self, bundle: InputBundle) -> Self {
        self.inputs.extend(
            bundle
                .into_iter()
                .map(|(key, input)| (format!("{VALUES_PREFIX}.{key}"), input)),
        );
        self
    }

    /// Orders this node after `node` without consuming any of its values.
    #[must_use]
    pub fn after(mut self, node: &NodeId) -> Self {
        self.after.push(node.clone());
        self
    }

    /// Declares the parent scope owning this node.
    #[must_use]
    pub fn parent(mut self, parent: &NodeId) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Overrides the engine's default deadline for this node.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declares an output settled from the backend's `create` result.
    pub fn output<T>(&mut self, name: &str) -> Deferred<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let value = self.owned_value(name);
        self.declare(name, Arc::new(value.clone()), OutputPhase::Create);
        value
    }

    /// Declares an output fetched with `read` after creation.
    pub fn read_output<T>(&mut self, name: &str) -> Deferred<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let value = self.owned_value(name);
        self.declare(name, Arc::new(value.clone()), OutputPhase::Read);
        value
    }

    /// Declares a sensitive output settled from `create`.
    pub fn secret_output<T>(&mut self, name: &str) -> Sensitive<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let value = mark_sensitive(self.owned_value(name));
        self.declare(name, Arc::new(value.clone()), OutputPhase::Create);
        value
    }

    /// Declares a sensitive output fetched with `read` after creation.
    pub fn secret_read_output<T>(&mut self, name: &str) -> Sensitive<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let value = mark_sensitive(self.owned_value(name));
        self.declare(name, Arc::new(value.clone()), OutputPhase::Read);
        value
    }

    fn owned_value<T: Clone + Send + 'static>(&self, name: &str) -> Deferred<T> {
        Deferred::owned_by(format!("{}.{name}", self.id), &self.id)
    }

    fn declare(&mut self, name: &str, value: ValueRef, phase: OutputPhase) {
        self.outputs.push(DeclaredOutput {
            name: name.to_owned(),
            value,
            phase,
        });
    }

    /// Finishes the node with a custom producer.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] if an input key is declared
    /// twice with different values, or [`StrataError::DuplicateIdentity`]
    /// if an output name is declared twice.
    pub fn build(self, producer: impl Producer + 'static) -> Result<ResourceNode> {
        let mut seen: BTreeMap<&str, &Input> = BTreeMap::new();
        for (key, input) in &self.inputs {
            match seen.get(key.as_str()) {
                Some(previous) if !previous.same_as(input) => {
                    return Err(StrataError::ConflictingKey { key: key.clone() });
                }
                _ => {
                    let _ = seen.insert(key.as_str(), input);
                }
            }
        }
        let mut names = BTreeSet::new();
        for output in &self.outputs {
            if !names.insert(output.name.as_str()) {
                return Err(StrataError::DuplicateIdentity {
                    id: format!("{}.{}", self.id, output.name),
                });
            }
        }

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (key, input) in self.inputs {
            if !inputs.iter().any(|(k, _): &(String, Input)| *k == key) {
                inputs.push((key, input));
            }
        }

        Ok(ResourceNode {
            id: self.id,
            kind: self.kind,
            inputs,
            after: self.after,
            parent: self.parent,
            outputs: self.outputs,
            producer: Arc::new(producer),
            timeout: self.timeout,
        })
    }

    /// Finishes the node with the default producer: one `create`, then a
    /// `read` if any output is fetched after creation.
    ///
    /// # Errors
    ///
    /// See [`NodeBuilder::build`].
    pub fn build_resource(self) -> Result<ResourceNode> {
        self.build(CreateResource)
    }
}
