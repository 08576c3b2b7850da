//! Validated, immutable settings with per-field provenance.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;

use super::types::{ConnectionMode, RawSettings};
use crate::error::{ConfigError, Result};

/// The configuration layer a value was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Provenance {
    /// An explicit parameter passed by the caller.
    Parameter,
    /// A `DUCKDBX_*` environment variable.
    Environment,
    /// The configuration file.
    File,
    /// The documented default.
    Default,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parameter => "parameter",
            Self::Environment => "environment",
            Self::File => "file",
            Self::Default => "default",
        })
    }
}

/// Container-lifecycle settings consumed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    image: String,
    name_prefix: String,
    fixed_port: Option<u16>,
    port_range: RangeInclusive<u16>,
    startup_timeout: Duration,
    health_interval: Duration,
    health_max_retries: u32,
    stop_grace: Duration,
    query_timeout: Duration,
    pull_retries: u32,
}

impl ContainerSettings {
    /// Container image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Container name prefix.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Fixed host port, when one was configured.
    #[must_use]
    pub const fn fixed_port(&self) -> Option<u16> {
        self.fixed_port
    }

    /// Inclusive range scanned for a free host port.
    #[must_use]
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range.clone()
    }

    /// Upper bound on start-up including health checks.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Interval between liveness probes.
    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        self.health_interval
    }

    /// Probe I/O failures tolerated before start-up fails.
    #[must_use]
    pub const fn health_max_retries(&self) -> u32 {
        self.health_max_retries
    }

    /// Grace period granted to the container on stop.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Per-statement query timeout.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Extra image pull attempts after a registry failure.
    #[must_use]
    pub const fn pull_retries(&self) -> u32 {
        self.pull_retries
    }
}

/// Resolved configuration.
///
/// Built once by [`crate::config::ConfigResolver`] and never mutated
/// afterwards. Each field that holds a value remembers which layer supplied
/// it; see [`Settings::provenance`].
#[derive(Clone)]
pub struct Settings {
    connection_mode: Option<ConnectionMode>,
    databricks_host: Option<Url>,
    databricks_token: Option<String>,
    catalog_name: String,
    profile_path: Option<Utf8PathBuf>,
    delta_sharing_server_url: Option<Url>,
    delta_sharing_token: Option<String>,
    engine_socket: Option<String>,
    container: ContainerSettings,
    provenance: BTreeMap<&'static str, Provenance>,
}

impl Settings {
    /// Validate merged values into settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` when a required field has no
    /// value and `ConfigError::InvalidValue` when a value fails validation.
    pub(crate) fn validate(
        raw: RawSettings,
        provenance: BTreeMap<&'static str, Provenance>,
    ) -> Result<Self> {
        let container = ContainerSettings {
            image: required("container_image", raw.container_image)?,
            name_prefix: validate_name_prefix(required("container_name", raw.container_name)?)?,
            fixed_port: (raw.port != 0).then_some(raw.port),
            port_range: validate_port_range(raw.port_range_start, raw.port_range_end)?,
            startup_timeout: Duration::from_secs(positive(
                "startup_timeout_secs",
                raw.startup_timeout_secs,
            )?),
            health_interval: Duration::from_millis(positive(
                "health_interval_ms",
                raw.health_interval_ms,
            )?),
            health_max_retries: at_least_one("health_max_retries", raw.health_max_retries)?,
            stop_grace: Duration::from_secs(positive("stop_grace_secs", raw.stop_grace_secs)?),
            query_timeout: Duration::from_secs(positive(
                "query_timeout_secs",
                raw.query_timeout_secs,
            )?),
            pull_retries: raw.pull_retries,
        };

        Ok(Self {
            connection_mode: raw.connection_mode,
            databricks_host: optional_url("databricks_host", raw.databricks_host)?,
            databricks_token: non_blank(raw.databricks_token),
            catalog_name: required("catalog_name", raw.catalog_name)?,
            profile_path: raw.profile_path.filter(|path| !path.as_str().trim().is_empty()),
            delta_sharing_server_url: optional_url(
                "delta_sharing_server_url",
                raw.delta_sharing_server_url,
            )?,
            delta_sharing_token: non_blank(raw.delta_sharing_token),
            engine_socket: non_blank(raw.engine_socket),
            container,
            provenance,
        })
    }

    /// Explicit connection mode, if one was configured.
    #[must_use]
    pub const fn connection_mode(&self) -> Option<ConnectionMode> {
        self.connection_mode
    }

    /// Databricks workspace URL.
    #[must_use]
    pub const fn databricks_host(&self) -> Option<&Url> {
        self.databricks_host.as_ref()
    }

    /// Databricks personal access token.
    #[must_use]
    pub fn databricks_token(&self) -> Option<&str> {
        self.databricks_token.as_deref()
    }

    /// Unity Catalog name.
    #[must_use]
    pub fn catalog_name(&self) -> &str {
        &self.catalog_name
    }

    /// Delta Sharing profile file path.
    #[must_use]
    pub fn profile_path(&self) -> Option<&Utf8Path> {
        self.profile_path.as_deref()
    }

    /// Standalone sharing server URL.
    #[must_use]
    pub const fn delta_sharing_server_url(&self) -> Option<&Url> {
        self.delta_sharing_server_url.as_ref()
    }

    /// Bearer token for the standalone server.
    #[must_use]
    pub fn delta_sharing_token(&self) -> Option<&str> {
        self.delta_sharing_token.as_deref()
    }

    /// Configured container engine socket.
    #[must_use]
    pub fn engine_socket(&self) -> Option<&str> {
        self.engine_socket.as_deref()
    }

    /// Container-lifecycle settings.
    #[must_use]
    pub const fn container(&self) -> &ContainerSettings {
        &self.container
    }

    /// Which layer supplied `field`, or `None` when the field has no value.
    #[must_use]
    pub fn provenance(&self, field: &str) -> Option<Provenance> {
        self.provenance.get(field).copied()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("connection_mode", &self.connection_mode)
            .field("databricks_host", &self.databricks_host.as_ref().map(Url::as_str))
            .field("databricks_token", &redacted(self.databricks_token.as_deref()))
            .field("catalog_name", &self.catalog_name)
            .field("profile_path", &self.profile_path)
            .field(
                "delta_sharing_server_url",
                &self.delta_sharing_server_url.as_ref().map(Url::as_str),
            )
            .field(
                "delta_sharing_token",
                &redacted(self.delta_sharing_token.as_deref()),
            )
            .field("engine_socket", &self.engine_socket)
            .field("container", &self.container)
            .field("provenance", &self.provenance)
            .finish()
    }
}

pub(crate) fn redacted(secret: Option<&str>) -> Option<&'static str> {
    secret.map(|_| "<redacted>")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    non_blank(value)
        .map(|text| String::from(text.trim()))
        .ok_or_else(|| {
            ConfigError::MissingRequired {
                field: String::from(field),
            }
            .into()
        })
}

fn positive(field: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(invalid(field, "must be a positive integer"));
    }
    Ok(value)
}

fn at_least_one(field: &str, value: u32) -> Result<u32> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    Ok(value)
}

fn validate_port_range(start: u16, end: u16) -> Result<RangeInclusive<u16>> {
    if start == 0 {
        return Err(invalid("port_range_start", "must be a positive port number"));
    }
    if end < start {
        return Err(invalid(
            "port_range_end",
            &format!("must not be lower than port_range_start ({start})"),
        ));
    }
    Ok(start..=end)
}

fn validate_name_prefix(prefix: String) -> Result<String> {
    let mut chars = prefix.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if first_ok && rest_ok {
        Ok(prefix)
    } else {
        Err(invalid(
            "container_name",
            "must start with a letter or digit and contain only [a-zA-Z0-9_.-]",
        ))
    }
}

fn optional_url(field: &str, value: Option<String>) -> Result<Option<Url>> {
    let Some(text) = non_blank(value) else {
        return Ok(None);
    };
    let url = Url::parse(text.trim()).map_err(|error| invalid(field, &error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            field,
            &format!("unsupported scheme '{}', expected http or https", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(field, "URL has no host"));
    }
    Ok(Some(url))
}

fn invalid(field: &str, reason: &str) -> crate::error::DuckdbxError {
    ConfigError::InvalidValue {
        field: String::from(field),
        reason: String::from(reason),
    }
    .into()
}
