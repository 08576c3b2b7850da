//! Command-line argument definitions for the duckdbx binary.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use super::{ConfigParams, ConnectionMode};

/// Command-line interface for duckdbx.
#[derive(Debug, Parser)]
#[command(name = "duckdbx")]
#[command(
    author,
    version,
    about = "Run a containerised analytical engine against remote Delta Sharing data"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Remote endpoint strategy.
    #[arg(long, global = true, value_enum)]
    pub connection_mode: Option<ConnectionMode>,

    /// Databricks workspace URL.
    #[arg(long, global = true)]
    pub databricks_host: Option<String>,

    /// Unity Catalog name.
    #[arg(long, global = true)]
    pub catalog: Option<String>,

    /// Delta Sharing profile file.
    #[arg(long, global = true)]
    pub profile: Option<Utf8PathBuf>,

    /// Standalone Delta Sharing server URL.
    #[arg(long, global = true)]
    pub server_url: Option<String>,

    /// Container engine socket path or URL.
    #[arg(long, global = true)]
    pub engine_socket: Option<String>,

    /// Container image to use.
    #[arg(long, global = true)]
    pub image: Option<String>,

    /// Container name prefix.
    #[arg(long, global = true)]
    pub container_name: Option<String>,

    /// Fixed host port for the engine.
    #[arg(long, global = true)]
    pub port: Option<u16>,
}

impl Cli {
    /// Convert the global options into the parameter layer.
    ///
    /// Tokens are deliberately not accepted on the command line; they come from
    /// the environment, the configuration file, or a profile.
    #[must_use]
    pub fn to_params(&self) -> ConfigParams {
        ConfigParams {
            connection_mode: self.connection_mode,
            databricks_host: self.databricks_host.clone(),
            catalog_name: self.catalog.clone(),
            profile_path: self.profile.clone(),
            delta_sharing_server_url: self.server_url.clone(),
            engine_socket: self.engine_socket.clone(),
            container_image: self.image.clone(),
            container_name: self.container_name.clone(),
            port: self.port,
            ..ConfigParams::default()
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the engine, run one statement, print rows as JSON lines, and stop.
    Query {
        /// SQL statement to execute.
        #[arg(required = true)]
        sql: String,
    },

    /// Resolve and print the remote endpoint without starting a container.
    Endpoint,
}
