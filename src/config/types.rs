//! Configuration data types for duckdbx.

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Default container image for the engine.
pub const DEFAULT_CONTAINER_IMAGE: &str = "duckdbx:latest";

/// Default container name prefix.
pub const DEFAULT_CONTAINER_NAME: &str = "duckdbx";

/// Default Unity Catalog name for Databricks-managed sharing.
pub const DEFAULT_CATALOG_NAME: &str = "main";

/// Which remote endpoint strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Delta Sharing managed by a Databricks workspace.
    Databricks,
    /// A standalone Delta Sharing server.
    Standalone,
}

impl ConnectionMode {
    /// Return the lowercase name used in files and environment variables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Databricks => "databricks",
            Self::Standalone => "standalone",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "databricks" => Ok(Self::Databricks),
            "standalone" => Ok(Self::Standalone),
            other => Err(format!(
                "expected 'databricks' or 'standalone', got '{other}'"
            )),
        }
    }
}

/// Merged, not yet validated configuration values.
///
/// This is the shape every layer (defaults, file, environment, parameters) is
/// expressed in. [`crate::config::ConfigResolver`] merges the layers into this
/// structure and then validates it into an immutable
/// [`crate::config::Settings`].
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `DUCKDBX_CONFIG_PATH` environment variable
/// 2. `.duckdbx.toml` in the current working directory
/// 3. `.duckdbx.toml` in the home directory
/// 4. `~/.config/duckdbx/config.toml` (XDG default)
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault, OrthoConfig)]
#[serde(default)]
#[ortho_config(
    prefix = "DUCKDBX",
    post_merge_hook,
    discovery(
        app_name = "duckdbx",
        env_var = "DUCKDBX_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".duckdbx.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct RawSettings {
    /// Explicit endpoint strategy; auto-detected when absent.
    #[ortho_config(skip_cli)]
    pub connection_mode: Option<ConnectionMode>,

    /// Databricks workspace URL.
    pub databricks_host: Option<String>,

    /// Databricks personal access token.
    pub databricks_token: Option<String>,

    /// Unity Catalog name to expose.
    #[default(Some(String::from(DEFAULT_CATALOG_NAME)))]
    pub catalog_name: Option<String>,

    /// Path to a Delta Sharing profile file.
    #[ortho_config(skip_cli)]
    pub profile_path: Option<Utf8PathBuf>,

    /// Standalone Delta Sharing server URL.
    pub delta_sharing_server_url: Option<String>,

    /// Bearer token for the standalone sharing server.
    pub delta_sharing_token: Option<String>,

    /// The container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// Container image reference for the engine.
    #[default(Some(String::from(DEFAULT_CONTAINER_IMAGE)))]
    pub container_image: Option<String>,

    /// Container name prefix.
    #[default(Some(String::from(DEFAULT_CONTAINER_NAME)))]
    pub container_name: Option<String>,

    /// Fixed host port; `0` selects a free port from the scan range.
    #[ortho_config(skip_cli)]
    #[default(0)]
    pub port: u16,

    /// First port of the scan range.
    #[ortho_config(skip_cli)]
    #[default(41_000)]
    pub port_range_start: u16,

    /// Last port of the scan range (inclusive).
    #[ortho_config(skip_cli)]
    #[default(41_999)]
    pub port_range_end: u16,

    /// Upper bound on start-up, including health checks, in seconds.
    #[ortho_config(skip_cli)]
    #[default(30)]
    pub startup_timeout_secs: u64,

    /// Interval between liveness probes, in milliseconds.
    #[ortho_config(skip_cli)]
    #[default(500)]
    pub health_interval_ms: u64,

    /// Probe I/O failures tolerated before start-up fails.
    #[ortho_config(skip_cli)]
    #[default(5)]
    pub health_max_retries: u32,

    /// Grace period for container termination, in seconds.
    #[ortho_config(skip_cli)]
    #[default(10)]
    pub stop_grace_secs: u64,

    /// Per-statement timeout, in seconds.
    #[ortho_config(skip_cli)]
    #[default(300)]
    pub query_timeout_secs: u64,

    /// Extra image pull attempts after a registry failure.
    #[ortho_config(skip_cli)]
    #[default(0)]
    pub pull_retries: u32,
}

impl PostMergeHook for RawSettings {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // Whitespace-only strings are treated the same as absent values.
        for field in [
            &mut self.databricks_host,
            &mut self.databricks_token,
            &mut self.catalog_name,
            &mut self.delta_sharing_server_url,
            &mut self.delta_sharing_token,
            &mut self.engine_socket,
            &mut self.container_image,
            &mut self.container_name,
        ] {
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
        Ok(())
    }
}

/// Explicit parameters: the highest-priority configuration layer.
///
/// Every field left as `None` falls through to the environment, the
/// configuration file, and finally the documented default.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigParams {
    /// Explicit endpoint strategy.
    pub connection_mode: Option<ConnectionMode>,
    /// Databricks workspace URL.
    pub databricks_host: Option<String>,
    /// Databricks personal access token.
    pub databricks_token: Option<String>,
    /// Unity Catalog name.
    pub catalog_name: Option<String>,
    /// Delta Sharing profile file.
    pub profile_path: Option<Utf8PathBuf>,
    /// Standalone Delta Sharing server URL.
    pub delta_sharing_server_url: Option<String>,
    /// Bearer token for the standalone server.
    pub delta_sharing_token: Option<String>,
    /// Container engine socket.
    pub engine_socket: Option<String>,
    /// Container image reference.
    pub container_image: Option<String>,
    /// Container name prefix.
    pub container_name: Option<String>,
    /// Fixed host port.
    pub port: Option<u16>,
    /// First port of the scan range.
    pub port_range_start: Option<u16>,
    /// Last port of the scan range.
    pub port_range_end: Option<u16>,
    /// Start-up timeout in seconds.
    pub startup_timeout_secs: Option<u64>,
    /// Probe interval in milliseconds.
    pub health_interval_ms: Option<u64>,
    /// Tolerated probe I/O failures.
    pub health_max_retries: Option<u32>,
    /// Termination grace period in seconds.
    pub stop_grace_secs: Option<u64>,
    /// Per-statement timeout in seconds.
    pub query_timeout_secs: Option<u64>,
    /// Extra image pull attempts.
    pub pull_retries: Option<u32>,
}
