//! Remote endpoint selection.
//!
//! [`ConnectionModeResolver`] turns resolved [`Settings`] into an
//! [`EndpointDescriptor`]: which Delta Sharing service the engine should
//! attach to and with which credentials. Selection is a total decision table
//! over the presence of each field, and resolution performs no network I/O.
//!
//! | `connection_mode` | `databricks_host` | `delta_sharing_server_url` | result |
//! |---|---|---|---|
//! | set | any | any | the configured mode |
//! | unset | set | set | `ConfigError::AmbiguousConnectionMode` |
//! | unset | set | unset | Databricks |
//! | unset | unset | set | Standalone |
//! | unset | unset | unset | `ConfigError::MissingRequired` |

mod profile;


use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use tracing::debug;

pub use profile::{DeltaSharingProfile, FsProfileLoader, ProfileLoader};

use crate::config::{ConnectionMode, Settings, redacted};
use crate::error::{ConfigError, Result};

/// An authenticated description of the remote sharing endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum EndpointDescriptor {
    /// Delta Sharing managed by a Databricks workspace.
    Databricks {
        /// Workspace URL.
        host: Url,
        /// Personal access token.
        token: String,
        /// Unity Catalog to expose.
        catalog_name: String,
    },
    /// A standalone Delta Sharing server.
    Standalone {
        /// Sharing server URL.
        server_url: Url,
        /// Optional bearer token.
        bearer_token: Option<String>,
    },
}

impl EndpointDescriptor {
    /// The strategy this descriptor was built for.
    #[must_use]
    pub const fn mode(&self) -> ConnectionMode {
        match self {
            Self::Databricks { .. } => ConnectionMode::Databricks,
            Self::Standalone { .. } => ConnectionMode::Standalone,
        }
    }

    /// A credential-free connection string for the endpoint.
    ///
    /// Databricks endpoints render as `databricks://<host>?catalog=<name>`;
    /// standalone endpoints render as the server URL without a trailing slash.
    #[must_use]
    pub fn connection_string(&self) -> String {
        match self {
            Self::Databricks {
                host, catalog_name, ..
            } => {
                let hostname = host.host_str().unwrap_or_default();
                let authority = host
                    .port()
                    .map_or_else(|| String::from(hostname), |port| format!("{hostname}:{port}"));
                format!("databricks://{authority}?catalog={catalog_name}")
            }
            Self::Standalone { server_url, .. } => {
                String::from(server_url.as_str().trim_end_matches('/'))
            }
        }
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Databricks {
                host,
                token,
                catalog_name,
            } => f
                .debug_struct("Databricks")
                .field("host", &host.as_str())
                .field("token", &redacted(Some(token)))
                .field("catalog_name", catalog_name)
                .finish(),
            Self::Standalone {
                server_url,
                bearer_token,
            } => f
                .debug_struct("Standalone")
                .field("server_url", &server_url.as_str())
                .field("bearer_token", &redacted(bearer_token.as_deref()))
                .finish(),
        }
    }
}

/// Chooses the remote endpoint strategy and assembles its credentials.
#[derive(Clone)]
pub struct ConnectionModeResolver {
    profiles: Arc<dyn ProfileLoader>,
}

impl Default for ConnectionModeResolver {
    fn default() -> Self {
        Self::new(Arc::new(FsProfileLoader))
    }
}

impl fmt::Debug for ConnectionModeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionModeResolver").finish_non_exhaustive()
    }
}

impl ConnectionModeResolver {
    /// Create a resolver reading profiles through `profiles`.
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileLoader>) -> Self {
        Self { profiles }
    }

    /// Resolve the endpoint for `settings`.
    ///
    /// A profile file, when configured and present, supplies the token in
    /// preference to the token settings. A profile that exists but cannot be
    /// read or parsed is an error rather than a silent fallback.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::AmbiguousConnectionMode` when both endpoints are
    /// configured without an explicit mode, `ConfigError::MissingRequired`
    /// when the chosen mode lacks a field, and `ConnectionError::Profile*`
    /// when the profile file is unreadable or malformed.
    pub fn resolve(&self, settings: &Settings) -> Result<EndpointDescriptor> {
        let mode = select_mode(settings)?;
        let profile = settings
            .profile_path()
            .map(|path| self.profiles.load(path))
            .transpose()?
            .flatten();
        debug!(
            %mode,
            explicit = settings.connection_mode().is_some(),
            profile = profile.is_some(),
            "selected connection mode"
        );

        match mode {
            ConnectionMode::Databricks => databricks(settings, profile),
            ConnectionMode::Standalone => standalone(settings, profile),
        }
    }
}

fn select_mode(settings: &Settings) -> Result<ConnectionMode> {
    let has_host = settings.databricks_host().is_some();
    let has_server = settings.delta_sharing_server_url().is_some();

    match (settings.connection_mode(), has_host, has_server) {
        (Some(mode), _, _) => Ok(mode),
        (None, true, true) => Err(ConfigError::AmbiguousConnectionMode.into()),
        (None, true, false) => Ok(ConnectionMode::Databricks),
        (None, false, true) => Ok(ConnectionMode::Standalone),
        (None, false, false) => Err(missing("databricks_host or delta_sharing_server_url")),
    }
}

fn databricks(
    settings: &Settings,
    profile: Option<DeltaSharingProfile>,
) -> Result<EndpointDescriptor> {
    let host = settings
        .databricks_host()
        .cloned()
        .ok_or_else(|| missing("databricks_host"))?;
    let token = profile
        .map(|p| p.bearer_token)
        .or_else(|| settings.databricks_token().map(String::from))
        .ok_or_else(|| missing("databricks_token"))?;

    Ok(EndpointDescriptor::Databricks {
        host,
        token,
        catalog_name: String::from(settings.catalog_name()),
    })
}

fn standalone(
    settings: &Settings,
    profile: Option<DeltaSharingProfile>,
) -> Result<EndpointDescriptor> {
    let (profile_endpoint, profile_token) = profile
        .map(|p| (p.endpoint, p.bearer_token))
        .unzip();
    let server_url = settings
        .delta_sharing_server_url()
        .cloned()
        .or(profile_endpoint)
        .ok_or_else(|| missing("delta_sharing_server_url"))?;
    let bearer_token = profile_token.or_else(|| settings.delta_sharing_token().map(String::from));

    Ok(EndpointDescriptor::Standalone {
        server_url,
        bearer_token,
    })
}

fn missing(field: &str) -> crate::error::DuckdbxError {
    ConfigError::MissingRequired {
        field: String::from(field),
    }
    .into()
}
