//! Configuration system for duckdbx.
//!
//! Settings are resolved from four layers. Explicit parameters override
//! `DUCKDBX_*` environment variables, which override the configuration file,
//! which overrides the documented defaults. Merging is done with the
//! `ortho_config` crate; [`ConfigResolver`] additionally records which layer
//! supplied every field.
//!
//! The configuration file is discovered at `~/.config/duckdbx/config.toml` or
//! `.duckdbx.toml` unless `DUCKDBX_CONFIG_PATH` names another file.
//!
//! # Example Configuration
//!
//! ```toml
//! connection_mode = "databricks"
//! databricks_host = "https://adb-1234.5.azuredatabricks.net"
//! catalog_name = "analytics"
//!
//! container_image = "ghcr.io/example/duckdbx:1.2"
//! container_name = "duckdbx"
//! port_range_start = 41000
//! port_range_end = 41099
//! startup_timeout_secs = 45
//! ```

mod cli;
mod loader;
mod settings;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{Cli, Commands};
pub use loader::{ConfigFile, ConfigResolver, env_var_names};
pub(crate) use settings::redacted;
pub use settings::{ContainerSettings, Provenance, Settings};
pub use types::{
    ConfigParams, ConnectionMode, DEFAULT_CATALOG_NAME, DEFAULT_CONTAINER_IMAGE,
    DEFAULT_CONTAINER_NAME, RawSettings,
};
