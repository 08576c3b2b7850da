//! Locating and dialling the container engine.
//!
//! An [`EngineSocket`] remembers both the endpoint and where it came from,
//! so start-up logs can say why a particular daemon was chosen.

mod classify;

use std::fmt;
use std::time::Duration;

use bollard::Docker;

use crate::error::ContainerError;

pub(crate) use classify::classify_engine_error;

/// Variables consulted, in order, when no socket is configured.
const HOST_VARIABLES: [&str; 3] = ["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Client-side request timeout handed to `Bollard`, in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Upper bound on a daemon ping.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(unix)]
const PLATFORM_SOCKET: &str = "unix:///var/run/docker.sock";

#[cfg(windows)]
const PLATFORM_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Where an engine socket was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketSource {
    /// The `engine_socket` setting.
    Configured,
    /// One of the conventional `*_HOST` variables.
    Environment(&'static str),
    /// The platform default.
    PlatformDefault,
}

impl fmt::Display for SocketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => f.write_str("engine_socket setting"),
            Self::Environment(variable) => f.write_str(variable),
            Self::PlatformDefault => f.write_str("platform default"),
        }
    }
}

/// How `Bollard` has to dial an endpoint.
#[derive(Debug, PartialEq, Eq)]
enum Transport {
    /// Unix socket or Windows named pipe.
    Local(String),
    /// Plain HTTP(S); `tcp://` is spoken as HTTP.
    Http(String),
}

/// A resolved container engine endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSocket {
    uri: String,
    source: SocketSource,
}

impl EngineSocket {
    /// Pick the engine endpoint.
    ///
    /// A non-blank `configured` value wins, then `DOCKER_HOST`,
    /// `CONTAINER_HOST`, and `PODMAN_HOST`, then the platform default.
    #[must_use]
    pub fn resolve<E: mockable::Env>(configured: Option<&str>, env: &E) -> Self {
        if let Some(uri) = configured.map(str::trim).filter(|uri| !uri.is_empty()) {
            return Self {
                uri: String::from(uri),
                source: SocketSource::Configured,
            };
        }
        HOST_VARIABLES
            .into_iter()
            .find_map(|variable| {
                env.string(variable)
                    .filter(|value| !value.trim().is_empty())
                    .map(|uri| Self {
                        uri,
                        source: SocketSource::Environment(variable),
                    })
            })
            .unwrap_or_else(|| Self {
                uri: String::from(PLATFORM_SOCKET),
                source: SocketSource::PlatformDefault,
            })
    }

    /// The endpoint as written by the user.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Where the endpoint came from.
    #[must_use]
    pub const fn source(&self) -> SocketSource {
        self.source
    }

    fn transport(&self) -> Transport {
        let uri = self.uri.as_str();
        if uri.starts_with("unix://") || uri.starts_with("npipe://") {
            Transport::Local(String::from(uri))
        } else if let Some(rest) = uri.strip_prefix("tcp://") {
            Transport::Http(format!("http://{rest}"))
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            Transport::Http(String::from(uri))
        } else if uri.starts_with("\\\\") || uri.starts_with("//") {
            Transport::Local(format!("npipe://{uri}"))
        } else {
            Transport::Local(format!("unix://{uri}"))
        }
    }

    /// Build a client for the endpoint. Nothing is sent to the daemon.
    ///
    /// # Errors
    ///
    /// Returns `SocketNotFound`, `PermissionDenied`, or `ConnectionFailed`
    /// depending on why the client could not be built.
    pub fn dial(&self) -> Result<Docker, ContainerError> {
        let client = match self.transport() {
            Transport::Local(path) => Docker::connect_with_socket(
                &path,
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Transport::Http(url) => Docker::connect_with_http(
                &url,
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        };
        client.map_err(|error| classify_engine_error(&error, &self.uri))
    }

    /// Check that the daemon behind `docker` answers in time.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` on timeout, or the
    /// classified daemon error.
    pub async fn ping(&self, docker: &Docker) -> Result<(), ContainerError> {
        match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(classify_engine_error(&error, &self.uri)),
            Err(_) => Err(ContainerError::ConnectionFailed {
                message: format!(
                    "engine at {} did not answer within {}s",
                    self.uri,
                    PING_TIMEOUT.as_secs()
                ),
            }),
        }
    }
}

impl fmt::Display for EngineSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.uri, self.source)
    }
}
