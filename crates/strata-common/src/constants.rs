//! System-wide constants and defaults.

/// Marker printed in place of a sensitive value.
pub const REDACTED: &str = "[secret]";

/// Default per-node provisioning deadline, in seconds.
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 30 * 60;

/// Default number of attempts for a cross-deployment output lookup.
pub const DEFAULT_LOOKUP_ATTEMPTS: u32 = 5;

/// Default pause between two cross-deployment lookup attempts, in milliseconds.
pub const DEFAULT_LOOKUP_BACKOFF_MS: u64 = 2_000;

/// Default directory holding published deployment outputs.
pub const DEFAULT_STATE_DIR: &str = ".strata";

/// Default stack configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "strata.yaml";

/// Suffix of the per-deployment output documents written to the state directory.
pub const OUTPUTS_SUFFIX: &str = ".outputs.json";

/// Key prefix under which chart values are passed to a chart release node.
pub const VALUES_PREFIX: &str = "values";

/// Application name used in CLI output.
pub const APP_NAME: &str = "strata";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "strata";
