//! Stack configuration file loading.
//!
//! The file is a flat YAML mapping of dotted keys, plus an optional
//! `engine:` section tuning the executor:
//!
//! ```yaml
//! aks.version: "1.29"
//! aks.vmcount: 3
//! storage.type: cassandra
//! engine:
//!   mode: sequential
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use strata_common::config::{ConfigMap, EngineConfig};
use strata_common::types::DeploymentId;
use strata_core::outputs::{JsonFileStore, OutputLookup};
use strata_stack::{StackDeployment, StackKind};

/// Parsed stack configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct StackFile {
    /// Executor settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Every other key, passed to the stack.
    #[serde(flatten)]
    pub config: ConfigMap,
}

impl StackFile {
    /// Parses a stack file from YAML text. Empty text yields the defaults.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reads and parses the stack file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "stack configuration not found: {}\n\
                 Create it or pass another path with --config",
                path.display()
            )
        })?;
        Self::parse(&content).with_context(|| format!("invalid stack configuration {}", path.display()))
    }
}

/// Everything a command needs to run one deployment.
pub struct Prepared {
    /// Executor settings from the stack file.
    pub engine: EngineConfig,
    /// Store the outputs are published to.
    pub store: Arc<JsonFileStore>,
    /// The assembled deployment.
    pub deployment: StackDeployment,
}

/// Loads the stack file, opens the output store and assembles `kind`.
pub fn prepare(
    config_path: &Path,
    state_dir: &Path,
    kind: StackKind,
    deployment: DeploymentId,
) -> anyhow::Result<Prepared> {
    let file = StackFile::load(config_path)?;
    let store = Arc::new(JsonFileStore::open(state_dir).map_err(|e| anyhow::anyhow!("{e}"))?);
    let lookup = OutputLookup::new(Arc::clone(&store) as _, file.engine.lookup);
    let deployment = strata_stack::assemble(kind, deployment, &file.config, &lookup)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(Prepared {
        engine: file.engine,
        store,
        deployment,
    })
}

/// Deployment id given on the command line, or the stack kind's name.
pub fn deployment_id(explicit: Option<&str>, kind: StackKind) -> DeploymentId {
    DeploymentId::new(explicit.unwrap_or(kind.as_str()))
}
