//! Sensitivity marking for deferred values.
//!
//! A [`Sensitive`] value prints as [`REDACTED`] through `Debug` and
//! `Display`; the only way to the plain value is an explicit [`reveal`],
//! used at the point where a credential is written into a downstream system.

use std::collections::BTreeSet;
use std::fmt;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_common::constants::REDACTED;
use strata_common::error::Result;
use strata_common::types::{NodeId, Sensitivity, Value};

use crate::deferred::{AnyDeferred, Deferred, Failure, Outcome};

/// A resolved sensitive value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    /// Wraps a plain value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrows the plain value.
    pub const fn expose(&self) -> &T {
        &self.0
    }

    /// Unwraps the plain value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// A deferred value that must not be surfaced in logs or outputs.
pub struct Sensitive<T> {
    inner: Deferred<T>,
}

impl<T> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Sensitive<T> {
    /// Creates an already-resolved sensitive value, e.g. a password read from config.
    pub fn literal(label: impl Into<String>, value: T) -> Self {
        mark_sensitive(Deferred::resolved(label, value))
    }

    /// Returns the value's label.
    pub fn label(&self) -> &str {
        self.inner.label()
    }

    /// Returns the nodes producing this value.
    pub fn origins(&self) -> &BTreeSet<NodeId> {
        self.inner.origins()
    }

    /// Returns whether the value is still pending.
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }

    /// Resolves the underlying value.
    ///
    /// # Errors
    ///
    /// Returns [`strata_common::error::StrataError::AlreadyResolved`] if already settled.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.inner.resolve(value)
    }

    /// Returns the settled outcome, still wrapped.
    pub fn peek(&self) -> Option<Outcome<Secret<T>>> {
        self.inner.peek().map(|outcome| outcome.map(Secret::new))
    }

    /// Suspends until settled; the value stays wrapped.
    pub async fn get(&self) -> Outcome<Secret<T>> {
        self.inner.get().await.map(Secret::new)
    }

    /// Derives another sensitive value.
    pub fn map<U, F>(&self, f: F) -> Sensitive<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        mark_sensitive(self.inner.map(f))
    }
}

/// Marks a deferred value as sensitive.
///
/// This is the only way to wrap a pending value; [`Sensitive::literal`]
/// covers values already known.
pub const fn mark_sensitive<T>(value: Deferred<T>) -> Sensitive<T> {
    Sensitive { inner: value }
}

/// Explicitly unwraps a sensitive value.
pub fn reveal<T>(value: &Sensitive<T>) -> Deferred<T> {
    value.inner.clone()
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sensitive").field(&format_args!("{REDACTED}")).finish()
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> AnyDeferred for Sensitive<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn origins(&self) -> &BTreeSet<NodeId> {
        self.inner.origins()
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }

    fn snapshot(&self) -> Option<Outcome<Value>> {
        AnyDeferred::snapshot(&self.inner)
    }

    fn settle_json(&self, value: Value) -> Result<()> {
        self.inner.settle_json(value)
    }

    fn fail_if_pending(&self, failure: &Failure) -> bool {
        self.inner.fail_if_pending(failure)
    }

    fn settled(&self) -> BoxFuture<'_, ()> {
        self.inner.settled()
    }

    fn slot_id(&self) -> usize {
        self.inner.slot_id()
    }
}

/// Renders a JSON value for display, redacting it when sensitive.
pub fn redact(value: &Value, sensitivity: Sensitivity) -> String {
    match (sensitivity, value) {
        (Sensitivity::Secret, _) => REDACTED.to_string(),
        (Sensitivity::Plain, Value::String(s)) => s.clone(),
        (Sensitivity::Plain, other) => other.to_string(),
    }
}
