//! Visibility store of the orchestration chart.

use strata_common::config::ConfigMap;
use strata_common::error::{Result, StrataError};
use strata_core::variant::{ConfigVariant, InputBundle};

/// Config key selecting the visibility store.
pub const VISIBILITY_KEY: &str = "temporal.visibility";

/// Where workflow visibility records are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visibility kept in the persistence store.
    Default,
    /// Visibility indexed by the chart's Elasticsearch.
    Elasticsearch,
}

impl Visibility {
    /// Reads the visibility store from `temporal.visibility`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::MissingConfig`] if the key is absent, or
    /// [`StrataError::UnhandledVariant`] for an unknown store.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        let tag = config.require_str(VISIBILITY_KEY)?;
        match tag.as_str() {
            "default" => Ok(Self::Default),
            "elasticsearch" => Ok(Self::Elasticsearch),
            _ => Err(StrataError::UnhandledVariant {
                axis: Self::AXIS.into(),
                tag,
            }),
        }
    }
}

impl ConfigVariant for Visibility {
    const AXIS: &'static str = "visibility";
    const TAGS: &'static [&'static str] = &["default", "elasticsearch"];

    fn tag(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Elasticsearch => "elasticsearch",
        }
    }

    fn bundle(&self) -> Result<InputBundle> {
        let enabled = match self {
            Self::Default => false,
            Self::Elasticsearch => true,
        };
        Ok(InputBundle::new().with("elasticsearch.enabled", enabled))
    }
}
