//! Chart rendering collaborator.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_common::error::{Result, StrataError};
use strata_common::types::Value;

/// One rendered Kubernetes object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Object kind (`Deployment`, `Service`, ...).
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Full object body.
    pub body: Value,
}

/// Renders a chart at a local path with a values tree.
pub trait ChartRenderer: Send + Sync {
    /// Renders the chart's manifests.
    ///
    /// # Errors
    ///
    /// Returns an error if the chart cannot be rendered with these values.
    fn render(&self, chart: &Path, values: &Value) -> Result<Vec<Manifest>>;
}

/// Renderer that emits the values tree itself as a single `ConfigMap`.
///
/// Used for dry runs where no chart templates are evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuesRenderer;

impl ChartRenderer for ValuesRenderer {
    fn render(&self, chart: &Path, values: &Value) -> Result<Vec<Manifest>> {
        if !values.is_object() {
            return Err(StrataError::backend(format!(
                "values for {} must be a mapping",
                chart.display()
            )));
        }
        let name = chart
            .file_name()
            .map_or_else(|| "chart".to_owned(), |n| n.to_string_lossy().into_owned());
        Ok(vec![Manifest {
            kind: "ConfigMap".into(),
            name: format!("{name}-values"),
            body: serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": format!("{name}-values") },
                "data": values,
            }),
        }])
    }
}
