//! `duckdbx` application entry point.
//!
//! The binary is a thin adapter over the library. It uses `eyre` for opaque
//! error reporting at the process boundary and `tracing-subscriber` for log
//! output (`RUST_LOG` overrides the default `info` level).
//!
//! Configuration is loaded with layered precedence:
//! 1. Documented defaults
//! 2. Configuration file (`~/.config/duckdbx/config.toml` or `DUCKDBX_CONFIG_PATH`)
//! 3. Environment variables (`DUCKDBX_*`)
//! 4. Command-line arguments

use clap::Parser;
use duckdbx::api::Duckdbx;
use duckdbx::config::{Cli, Commands, ConfigFile};
use duckdbx::endpoint::EndpointDescriptor;
use duckdbx::error::Result as DuckdbxResult;
use duckdbx::session::ResultSet;
use eyre::{Report, Result as EyreResult, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> EyreResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_file = cli
        .config
        .clone()
        .map_or(ConfigFile::Discover, ConfigFile::Path);
    let duckdbx = Duckdbx::builder()
        .params(cli.to_params())
        .config_file(config_file)
        .build()
        .map_err(Report::from)?;

    match &cli.command {
        Commands::Query { sql } => run_query(&duckdbx, sql)
            .await
            .map_err(Report::from)
            .wrap_err("query failed"),
        Commands::Endpoint => {
            print_endpoint(duckdbx.endpoint());
            Ok(())
        }
    }
}

/// Run one statement in a scoped engine, cancelling on Ctrl-C.
async fn run_query(duckdbx: &Duckdbx, sql: &str) -> DuckdbxResult<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, tearing down");
            trigger.cancel();
        }
    });

    let result = duckdbx
        .scoped_with_cancel(&cancel, |db| async move { db.query(sql).await })
        .await;
    ctrl_c.abort();
    print_rows(&result?);
    Ok(())
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
fn print_rows(rows: &ResultSet) {
    for record in rows.records() {
        println!("{}", serde_json::Value::Object(record));
    }
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
fn print_endpoint(endpoint: &EndpointDescriptor) {
    println!("mode: {}", endpoint.mode());
    println!("endpoint: {}", endpoint.connection_string());
}
