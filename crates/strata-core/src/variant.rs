//! Configuration variants and the input bundles they resolve to.
//!
//! A variant axis (storage backend, visibility store) is a closed enum
//! implementing [`ConfigVariant`]. The [`ConfigVariantResolver`] is told
//! which tags the deployment handles up front, so a variant nobody handles
//! is rejected before any resource is created.

use std::collections::{BTreeMap, BTreeSet};

use strata_common::error::{Result, StrataError};
use strata_common::types::Value;

use crate::node::Input;

/// A closed set of alternatives along one configuration axis.
pub trait ConfigVariant {
    /// Name of the axis, e.g. `storage`.
    const AXIS: &'static str;
    /// Every tag the axis defines.
    const TAGS: &'static [&'static str];

    /// Tag of this alternative.
    fn tag(&self) -> &'static str;

    /// Inputs this alternative contributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be assembled.
    fn bundle(&self) -> Result<InputBundle>;
}

/// A named set of inputs contributed by one variant.
///
/// A key set twice to different values keeps its first value and records
/// the second as a conflict. The conflict surfaces as
/// [`StrataError::ConflictingKey`] when the bundle is checked, merged,
/// or built into a node.
#[derive(Debug, Clone, Default)]
pub struct InputBundle {
    entries: BTreeMap<String, Input>,
    conflicts: Vec<(String, Input)>,
}

impl InputBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, chaining.
    ///
    /// A different value for a key already set is recorded as a conflict
    /// rather than dropped; see [`InputBundle::check`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, input: impl Into<Input>) -> Self {
        let key = key.into();
        let input = input.into();
        if self.insert(key.clone(), input.clone()).is_err() {
            tracing::debug!(key = %key, "conflicting bundle entry recorded");
            self.conflicts.push((key, input));
        }
        self
    }

    /// Reports the first conflict recorded by [`InputBundle::with`].
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] if a key was set twice to
    /// different values.
    pub fn check(&self) -> Result<()> {
        match self.conflicts.first() {
            Some((key, _)) => Err(StrataError::ConflictingKey { key: key.clone() }),
            None => Ok(()),
        }
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] if the key already holds a
    /// different value.
    pub fn insert(&mut self, key: impl Into<String>, input: impl Into<Input>) -> Result<()> {
        let key = key.into();
        let input = input.into();
        match self.entries.get(&key) {
            Some(existing) if existing.same_as(&input) => Ok(()),
            Some(_) => Err(StrataError::ConflictingKey { key }),
            None => {
                let _ = self.entries.insert(key, input);
                Ok(())
            }
        }
    }

    /// Merges another bundle into this one.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] on the first key both bundles
    /// set to different values.
    pub fn merge(&mut self, other: Self) -> Result<()> {
        self.check()?;
        other.check()?;
        for (key, input) in other.entries {
            self.insert(key, input)?;
        }
        Ok(())
    }

    /// Returns an entry.
    pub fn get(&self, key: &str) -> Option<&Input> {
        self.entries.get(key)
    }

    /// Returns an entry's literal value, if it is a literal.
    pub fn literal(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(Input::Literal(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Yields every entry, then every recorded conflict, so a node built from
/// the bundle rejects the conflicting key.
impl IntoIterator for InputBundle {
    type Item = (String, Input);
    type IntoIter = std::iter::Chain<
        std::collections::btree_map::IntoIter<String, Input>,
        std::vec::IntoIter<(String, Input)>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter().chain(self.conflicts)
    }
}

/// Maps variant values to input bundles, checking that every variant
/// reachable from configuration is handled.
#[derive(Debug, Clone, Default)]
pub struct ConfigVariantResolver {
    handled: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

impl ConfigVariantResolver {
    /// Creates a resolver that handles nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles every tag of an axis.
    #[must_use]
    pub fn handle<V: ConfigVariant>(self) -> Self {
        self.handle_tags::<V>(V::TAGS)
    }

    /// Handles only the listed tags of an axis.
    #[must_use]
    pub fn handle_tags<V: ConfigVariant>(mut self, tags: &[&'static str]) -> Self {
        self.handled.entry(V::AXIS).or_default().extend(tags);
        self
    }

    /// Returns whether a tag of an axis is handled.
    pub fn handles(&self, axis: &str, tag: &str) -> bool {
        self.handled.get(axis).is_some_and(|tags| tags.contains(tag))
    }

    /// Resolves a variant to its bundle.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::UnhandledVariant`] if the variant's tag is not
    /// handled, or whatever the variant's bundle reports.
    pub fn resolve<V: ConfigVariant>(&self, variant: &V) -> Result<InputBundle> {
        let tag = variant.tag();
        if !self.handles(V::AXIS, tag) {
            return Err(StrataError::UnhandledVariant {
                axis: V::AXIS.into(),
                tag: tag.into(),
            });
        }
        tracing::debug!(axis = V::AXIS, tag, "variant resolved");
        let bundle = variant.bundle()?;
        bundle.check()?;
        Ok(bundle)
    }

    /// Merges the bundles of several variants.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::ConflictingKey`] if two bundles set the same
    /// key to different values.
    pub fn merge(bundles: impl IntoIterator<Item = InputBundle>) -> Result<InputBundle> {
        let mut merged = InputBundle::new();
        for bundle in bundles {
            merged.merge(bundle)?;
        }
        Ok(merged)
    }
}
