//! Single-assignment values that become known once a provisioning step completes.
//!
//! A [`Deferred`] starts pending and is settled exactly once, either resolved
//! with a value or failed with a [`Failure`]. Settlement stores the outcome,
//! runs the registered listeners (this is how [`Deferred::map`], [`Deferred::zip`]
//! and [`all`] derive new values without blocking), then wakes every async
//! reader. Readers arriving after settlement get the stored outcome immediately.
//!
//! Every value remembers the nodes that produce it (its *origins*), so the
//! composition graph can derive dependency edges from node inputs alone.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};
use strata_common::types::{NodeId, Value};
use tokio::sync::watch;

/// Why a deferred value could not be produced.
///
/// Cloneable so that one failure can be handed to every reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{origin}: {message}")]
pub struct Failure {
    /// Node or value the failure originated from.
    pub origin: String,
    /// Human-readable cause.
    pub message: String,
}

impl Failure {
    /// Creates a failure attributed to `origin`.
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Settled state of a deferred value.
pub type Outcome<T> = std::result::Result<T, Failure>;

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Cell<T> {
    outcome: Option<Outcome<T>>,
    listeners: Vec<Listener<T>>,
}

struct Slot<T> {
    label: String,
    origins: BTreeSet<NodeId>,
    cell: Mutex<Cell<T>>,
    settled: watch::Sender<bool>,
}

/// A value not known until some provisioning step completes.
///
/// Cloning yields another handle to the same slot.
pub struct Deferred<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Creates a pending value with no producing node.
    pub fn pending(label: impl Into<String>) -> Self {
        Self::with_origins(label, BTreeSet::new())
    }

    /// Creates a pending value produced by `origin`.
    pub fn owned_by(label: impl Into<String>, origin: &NodeId) -> Self {
        Self::with_origins(label, BTreeSet::from([origin.clone()]))
    }

    /// Creates an already-resolved value (a literal).
    pub fn resolved(label: impl Into<String>, value: T) -> Self {
        let (settled, _) = watch::channel(true);
        Self {
            slot: Arc::new(Slot {
                label: label.into(),
                origins: BTreeSet::new(),
                cell: Mutex::new(Cell {
                    outcome: Some(Ok(value)),
                    listeners: Vec::new(),
                }),
                settled,
            }),
        }
    }

    pub(crate) fn with_origins(label: impl Into<String>, origins: BTreeSet<NodeId>) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            slot: Arc::new(Slot {
                label: label.into(),
                origins,
                cell: Mutex::new(Cell {
                    outcome: None,
                    listeners: Vec::new(),
                }),
                settled,
            }),
        }
    }

    /// Returns the value's label.
    pub fn label(&self) -> &str {
        &self.slot.label
    }

    /// Returns the nodes producing this value.
    pub fn origins(&self) -> &BTreeSet<NodeId> {
        &self.slot.origins
    }

    /// Transitions Pending to Resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::AlreadyResolved`] if the value was already settled.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Transitions Pending to Failed.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::AlreadyResolved`] if the value was already settled.
    pub fn fail(&self, failure: Failure) -> Result<()> {
        self.settle(Err(failure))
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<()> {
        let listeners = {
            let mut cell = lock(&self.slot.cell);
            if cell.outcome.is_some() {
                return Err(StrataError::AlreadyResolved {
                    value: self.slot.label.clone(),
                });
            }
            cell.outcome = Some(outcome.clone());
            std::mem::take(&mut cell.listeners)
        };
        tracing::trace!(value = %self.slot.label, ok = outcome.is_ok(), "deferred value settled");
        for listener in listeners {
            listener(&outcome);
        }
        let _ = self.slot.settled.send_replace(true);
        Ok(())
    }

    /// Returns the outcome if the value is settled.
    pub fn peek(&self) -> Option<Outcome<T>> {
        lock(&self.slot.cell).outcome.clone()
    }

    /// Returns whether the value is still pending.
    pub fn is_pending(&self) -> bool {
        lock(&self.slot.cell).outcome.is_none()
    }

    /// Suspends until the value is settled and returns its outcome.
    pub async fn get(&self) -> Outcome<T> {
        let mut settled = self.slot.settled.subscribe();
        let _ = settled.wait_for(|done| *done).await;
        self.peek().unwrap_or_else(|| {
            Err(Failure::new(
                self.slot.label.as_str(),
                "value was never settled",
            ))
        })
    }

    /// Runs `listener` once the value is settled (immediately if it already is).
    pub fn on_settled(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let mut cell = lock(&self.slot.cell);
        if let Some(outcome) = cell.outcome.clone() {
            drop(cell);
            listener(&outcome);
        } else {
            cell.listeners.push(Box::new(listener));
        }
    }

    /// Derives a value that resolves to `f(value)` once this one resolves.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok::<U, Infallible>(f(value)))
    }

    /// Derives a value from a fallible transformation.
    ///
    /// The derived value fails if this value fails or if `f` returns an error.
    pub fn try_map<U, E, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        E: fmt::Display,
        F: FnOnce(T) -> std::result::Result<U, E> + Send + 'static,
    {
        let derived = Deferred::with_origins(format!("{}.map", self.label()), self.origins().clone());
        let target = derived.clone();
        let label = self.label().to_owned();
        self.on_settled(move |outcome| {
            let _ = match outcome {
                Ok(value) => match f(value.clone()) {
                    Ok(mapped) => target.resolve(mapped),
                    Err(e) => target.fail(Failure::new(label, e.to_string())),
                },
                Err(failure) => target.fail(failure.clone()),
            };
        });
        derived
    }

    /// Combines two values into a pair, failing as soon as either fails.
    pub fn zip<U: Clone + Send + 'static>(&self, other: &Deferred<U>) -> Deferred<(T, U)> {
        let origins = self.origins().union(other.origins()).cloned().collect();
        let joined = Deferred::with_origins(format!("({}, {})", self.label(), other.label()), origins);
        let pair: Arc<Mutex<(Option<T>, Option<U>)>> = Arc::new(Mutex::new((None, None)));

        let (left_pair, left_target) = (Arc::clone(&pair), joined.clone());
        self.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let ready = {
                    let mut pair = lock(&left_pair);
                    pair.0 = Some(value.clone());
                    take_pair(&mut pair)
                };
                if let Some(both) = ready {
                    let _ = left_target.resolve(both);
                }
            }
            Err(failure) => {
                let _ = left_target.fail(failure.clone());
            }
        });

        let right_target = joined.clone();
        other.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let ready = {
                    let mut pair = lock(&pair);
                    pair.1 = Some(value.clone());
                    take_pair(&mut pair)
                };
                if let Some(both) = ready {
                    let _ = right_target.resolve(both);
                }
            }
            Err(failure) => {
                let _ = right_target.fail(failure.clone());
            }
        });

        joined
    }
}

fn take_pair<A, B>(pair: &mut (Option<A>, Option<B>)) -> Option<(A, B)> {
    if pair.0.is_some() && pair.1.is_some() {
        pair.0.take().zip(pair.1.take())
    } else {
        None
    }
}

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

/// Waits for every value: resolves to all results in input order, or fails
/// with the first failure observed (later failures are discarded).
pub fn all<T: Clone + Send + 'static>(values: &[Deferred<T>]) -> Deferred<Vec<T>> {
    let label = format!(
        "all({})",
        values.iter().map(Deferred::label).collect::<Vec<_>>().join(", ")
    );
    if values.is_empty() {
        return Deferred::resolved(label, Vec::new());
    }

    let origins = values
        .iter()
        .flat_map(|v| v.origins().iter().cloned())
        .collect();
    let joined = Deferred::with_origins(label, origins);
    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; values.len()],
        remaining: values.len(),
    }));

    for (position, value) in values.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let target = joined.clone();
        value.on_settled(move |outcome| match outcome {
            Ok(v) => {
                let complete = {
                    let mut gather = lock(&gather);
                    if let Some(slot) = gather.slots.get_mut(position) {
                        *slot = Some(v.clone());
                    }
                    gather.remaining = gather.remaining.saturating_sub(1);
                    (gather.remaining == 0)
                        .then(|| gather.slots.iter_mut().filter_map(Option::take).collect::<Vec<T>>())
                };
                if let Some(results) = complete {
                    let _ = target.resolve(results);
                }
            }
            Err(failure) => {
                let _ = target.fail(failure.clone());
            }
        });
    }
    joined
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = lock(&self.slot.cell);
        let mut out = f.debug_struct("Deferred");
        let out = out.field("label", &self.slot.label);
        match &cell.outcome {
            None => out.field("state", &"pending").finish(),
            Some(Ok(value)) => out.field("value", value).finish(),
            Some(Err(failure)) => out.field("failure", failure).finish(),
        }
    }
}

/// Type-erased view of a deferred value, used where values of different
/// types are handled together (node inputs, outputs, published outputs).
pub trait AnyDeferred: Send + Sync {
    /// Label of the value.
    fn label(&self) -> &str;

    /// Nodes producing the value.
    fn origins(&self) -> &BTreeSet<NodeId>;

    /// Whether the value must be redacted when printed.
    fn is_sensitive(&self) -> bool {
        false
    }

    /// Whether the value is still pending.
    fn is_pending(&self) -> bool;

    /// JSON form of the outcome, if settled.
    fn snapshot(&self) -> Option<Outcome<Value>>;

    /// Resolves the value from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not decode into the value's type,
    /// or if the value was already settled.
    fn settle_json(&self, value: Value) -> Result<()>;

    /// Fails the value unless it is already settled; returns whether it did.
    fn fail_if_pending(&self, failure: &Failure) -> bool;

    /// Completes once the value is settled.
    fn settled(&self) -> BoxFuture<'_, ()>;

    /// Identity of the underlying slot, shared by all clones.
    fn slot_id(&self) -> usize;
}

impl<T> AnyDeferred for Deferred<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn label(&self) -> &str {
        Self::label(self)
    }

    fn origins(&self) -> &BTreeSet<NodeId> {
        Self::origins(self)
    }

    fn is_pending(&self) -> bool {
        Self::is_pending(self)
    }

    fn snapshot(&self) -> Option<Outcome<Value>> {
        self.peek().map(|outcome| {
            outcome.and_then(|value| {
                serde_json::to_value(value)
                    .map_err(|e| Failure::new(self.slot.label.as_str(), e.to_string()))
            })
        })
    }

    fn settle_json(&self, value: Value) -> Result<()> {
        let value: T = serde_json::from_value(value)?;
        self.resolve(value)
    }

    fn fail_if_pending(&self, failure: &Failure) -> bool {
        Self::is_pending(self) && self.fail(failure.clone()).is_ok()
    }

    fn settled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.get().await;
        })
    }

    fn slot_id(&self) -> usize {
        Arc::as_ptr(&self.slot).cast::<()>() as usize
    }
}
