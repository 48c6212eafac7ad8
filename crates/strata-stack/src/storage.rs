//! Persistence backend of the orchestration chart.

use strata_common::config::ConfigMap;
use strata_common::error::{Result, StrataError};
use strata_core::secret::Sensitive;
use strata_core::variant::{ConfigVariant, InputBundle};

/// Config key selecting the storage backend.
pub const STORAGE_TYPE_KEY: &str = "storage.type";

const MYSQL_PORT: u32 = 3306;
const MYSQL_MAX_CONNS: u32 = 20;
const MYSQL_MAX_CONN_LIFETIME: &str = "1h";

/// Connection settings of an external MySQL server.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    /// Server host name.
    pub host_name: String,
    /// Login used by the orchestration server.
    pub login: String,
    /// Password for `login`.
    pub password: Sensitive<String>,
}

/// Where the orchestration server keeps its state.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// In-cluster Cassandra deployed by the chart.
    Cassandra {
        /// Number of Cassandra nodes.
        cluster_size: u32,
    },
    /// External MySQL server.
    MySql(MySqlStore),
}

impl StorageBackend {
    /// Reads the backend from `storage.type` and its tag-specific keys.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::MissingConfig`] for an absent key, or
    /// [`StrataError::UnhandledVariant`] for an unknown storage type.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        let tag = config.require_str(STORAGE_TYPE_KEY)?;
        match tag.as_str() {
            "cassandra" => Ok(Self::Cassandra {
                cluster_size: config.require_u32("cassandra.clustersize")?,
            }),
            "mysql" => Ok(Self::MySql(MySqlStore {
                host_name: config.require_str("mysql.hostname")?,
                login: config.require_str("mysql.login")?,
                password: Sensitive::literal("mysql.password", config.require_str("mysql.password")?),
            })),
            _ => Err(StrataError::UnhandledVariant {
                axis: Self::AXIS.into(),
                tag,
            }),
        }
    }
}

impl ConfigVariant for StorageBackend {
    const AXIS: &'static str = "storage";
    const TAGS: &'static [&'static str] = &["cassandra", "mysql"];

    fn tag(&self) -> &'static str {
        match self {
            Self::Cassandra { .. } => "cassandra",
            Self::MySql(_) => "mysql",
        }
    }

    /// The `cassandra.clustersize` setting lands on the chart's
    /// `cassandra.config.cluster_size` value.
    fn bundle(&self) -> Result<InputBundle> {
        match self {
            Self::Cassandra { cluster_size } => {
                Ok(InputBundle::new().with("cassandra.config.cluster_size", *cluster_size))
            }
            Self::MySql(store) => {
                let mut bundle = InputBundle::new();
                for (store_name, database) in [("default", "temporal"), ("visibility", "temporal_visibility")] {
                    let prefix = format!("server.config.persistence.{store_name}");
                    bundle.insert(format!("{prefix}.driver"), "sql")?;
                    bundle.insert(format!("{prefix}.sql.driver"), "mysql")?;
                    bundle.insert(format!("{prefix}.sql.host"), store.host_name.as_str())?;
                    bundle.insert(format!("{prefix}.sql.port"), MYSQL_PORT)?;
                    bundle.insert(format!("{prefix}.sql.database"), database)?;
                    bundle.insert(format!("{prefix}.sql.user"), store.login.as_str())?;
                    bundle.insert(format!("{prefix}.sql.password"), &store.password)?;
                    bundle.insert(format!("{prefix}.sql.maxConns"), MYSQL_MAX_CONNS)?;
                    bundle.insert(format!("{prefix}.sql.maxConnLifetime"), MYSQL_MAX_CONN_LIFETIME)?;
                }
                bundle.insert("cassandra.enabled", false)?;
                Ok(bundle)
            }
        }
    }
}
