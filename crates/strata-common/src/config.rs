//! Engine configuration and the flat stack configuration map.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::types::Value;

/// How the executor schedules nodes that have no ordering between them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One node at a time, in plan order.
    Sequential,
    /// Every node whose dependencies are satisfied runs concurrently.
    #[default]
    Parallel,
}

/// Bounded retry budget for cross-deployment lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts (at least one is always made).
    pub attempts: u32,
    /// Pause between two attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Returns the pause between two attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Returns the number of attempts, never less than one.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.attempts == 0 { 1 } else { self.attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::constants::DEFAULT_LOOKUP_ATTEMPTS,
            backoff_ms: crate::constants::DEFAULT_LOOKUP_BACKOFF_MS,
        }
    }
}

/// Root configuration for the composition engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline applied to nodes that do not declare their own, in seconds.
    pub default_timeout_secs: u64,
    /// Scheduling mode.
    pub mode: ExecutionMode,
    /// Upper bound on concurrently running producers (0 = unbounded).
    pub max_parallel: usize,
    /// Retry budget for cross-deployment output lookups.
    pub lookup: RetryPolicy,
}

impl EngineConfig {
    /// Returns the default per-node deadline.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: crate::constants::DEFAULT_NODE_TIMEOUT_SECS,
            mode: ExecutionMode::default(),
            max_parallel: 0,
            lookup: RetryPolicy::default(),
        }
    }
}

/// Flat mapping of dotted configuration keys (`aks.vmcount`) to scalar values.
///
/// Numbers may be given either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap {
    entries: BTreeMap<String, Value>,
}

impl ConfigMap {
    /// Creates an empty configuration map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, returning the map for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.entries.insert(key.into(), value.into());
    }

    /// Returns whether the key is present and not null.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|v| !v.is_null())
    }

    /// Returns all keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns an optional string value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidConfig`] if the value is not a scalar.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(invalid(key, "expected a string")),
        }
    }

    /// Returns a required string value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::MissingConfig`] if the key is absent.
    pub fn require_str(&self, key: &str) -> Result<String> {
        self.get_str(key)?.ok_or_else(|| missing(key))
    }

    /// Returns an optional unsigned integer value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidConfig`] if the value is not a `u32`.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        let parsed = match self.entries.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid(key, "expected an unsigned integer"))
    }

    /// Returns a required unsigned integer value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::MissingConfig`] if the key is absent, or
    /// [`StrataError::InvalidConfig`] if it is not a `u32`.
    pub fn require_u32(&self, key: &str) -> Result<u32> {
        self.get_u32(key)?.ok_or_else(|| missing(key))
    }

    /// Returns an optional boolean value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidConfig`] if the value is not a boolean.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(invalid(key, "expected a boolean")),
            },
            Some(_) => Err(invalid(key, "expected a boolean")),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn missing(key: &str) -> StrataError {
    StrataError::MissingConfig { key: key.into() }
}

fn invalid(key: &str, message: &str) -> StrataError {
    StrataError::InvalidConfig {
        key: key.into(),
        message: message.into(),
    }
}
