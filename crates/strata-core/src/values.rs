//! Nesting of dotted keys into a values tree.
//!
//! Chart values and backend configs are assembled from flat, dotted keys
//! (`server.config.numHistoryShards`) so that independent configuration
//! sources can be merged key by key. This module turns them back into the
//! nested tree a renderer or backend expects.

use serde_json::Map;
use strata_common::error::{Result, StrataError};
use strata_common::types::Value;

/// Inserts `value` at the dotted `path` inside `tree`.
///
/// # Errors
///
/// Returns [`StrataError::ConflictingKey`] if the path, or one of its
/// prefixes, already holds a different value.
pub fn insert_path(tree: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    let mut segments = path.split('.').peekable();
    let mut current = tree;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return match current.get(segment) {
                Some(existing) if *existing != value => Err(conflict(path)),
                _ => {
                    let _ = current.insert(segment.to_owned(), value);
                    Ok(())
                }
            };
        }
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(conflict(path)),
        };
    }
    Err(conflict(path))
}

/// Builds a nested tree from dotted key/value pairs.
///
/// # Errors
///
/// Returns [`StrataError::ConflictingKey`] on clashing paths.
pub fn nest<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Result<Value> {
    let mut tree = Map::new();
    for (key, value) in entries {
        insert_path(&mut tree, key, value)?;
    }
    Ok(Value::Object(tree))
}

fn conflict(path: &str) -> StrataError {
    StrataError::ConflictingKey { key: path.into() }
}
