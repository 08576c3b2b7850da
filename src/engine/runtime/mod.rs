//! The container runtime boundary used by the supervisor.
//!
//! [`ContainerRuntime`] is the capability the supervisor drives: create,
//! start, inspect, stop, and remove one container. [`DockerRuntime`] is the
//! `Bollard` implementation; tests substitute mocks so lifecycle logic can be
//! exercised without a daemon.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    InspectContainerOptions, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures_util::TryStreamExt;
use tracing::{debug, info, warn};

use super::socket::{EngineSocket, classify_engine_error};
use crate::error::ContainerError;

/// Port the engine listens on inside the container.
pub const ENGINE_CONTAINER_PORT: u16 = 3141;

/// Label carrying the supervisor generation that created the container.
pub const GENERATION_LABEL: &str = "duckdbx.generation";

/// Label marking containers owned by duckdbx.
pub const MANAGED_LABEL: &str = "duckdbx.managed";

/// Host interface the engine port is published on.
const LOOPBACK: &str = "127.0.0.1";

/// Boxed future type returned by [`ContainerRuntime`] implementors.
pub type RuntimeFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ContainerError>> + Send + 'a>>;

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Whether the container's process is running.
    pub running: bool,
    /// Exit code, once the container has exited.
    pub exit_code: Option<i64>,
}

/// Behaviour required from a container engine.
///
/// Futures borrow only the runtime; arguments are copied before the future
/// is created so callers may drop them immediately.
pub trait ContainerRuntime: Send + Sync {
    /// Verify the engine answers.
    fn ping(&self) -> RuntimeFuture<'_, ()>;

    /// Make `image` available locally, pulling it with up to `pull_retries`
    /// extra attempts when it is missing.
    fn ensure_image(&self, image: &str, pull_retries: u32) -> RuntimeFuture<'_, ()>;

    /// Create (but do not start) a container; returns its identifier.
    fn create_container(&self, spec: &LaunchSpec) -> RuntimeFuture<'_, String>;

    /// Start a created container.
    fn start_container(&self, id: &str) -> RuntimeFuture<'_, ()>;

    /// Report whether the container is running. A container the engine no
    /// longer knows about is reported as not running.
    fn inspect_container(&self, id: &str) -> RuntimeFuture<'_, ContainerStatus>;

    /// Ask the container to terminate, killing it after `grace`.
    fn stop_container(&self, id: &str, grace: Duration) -> RuntimeFuture<'_, ()>;

    /// Force-remove the container and its anonymous volumes. Removing a
    /// container that no longer exists succeeds.
    fn remove_container(&self, id: &str) -> RuntimeFuture<'_, ()>;
}

/// Parameters for launching one engine container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    image: String,
    name: String,
    host_port: u16,
    env: Vec<String>,
    labels: HashMap<String, String>,
}

impl LaunchSpec {
    /// Create a launch spec publishing the engine port on `host_port`.
    #[must_use]
    pub fn new(image: impl Into<String>, name: impl Into<String>, host_port: u16) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            host_port,
            env: Vec::new(),
            labels: HashMap::from([(String::from(MANAGED_LABEL), String::from("true"))]),
        }
    }

    /// Add an environment entry in `KEY=value` form.
    #[must_use]
    pub fn with_env(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    /// Attach a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// The container image.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// The container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The published host port.
    #[must_use]
    pub const fn host_port(&self) -> u16 {
        self.host_port
    }

    /// Environment entries.
    #[must_use]
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Container labels.
    #[must_use]
    pub const fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

/// Build a unique container name from a prefix.
#[must_use]
pub fn container_name(prefix: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("{prefix}-{suffix}")
}

/// [`ContainerRuntime`] backed by a Docker-compatible engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    socket: EngineSocket,
}

impl DockerRuntime {
    /// Connect to the engine named by `config_socket`, falling back to
    /// `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST`, and the platform
    /// default.
    ///
    /// # Errors
    ///
    /// Returns the classified connection error when no client can be built.
    pub fn connect<E: mockable::Env>(
        config_socket: Option<&str>,
        env: &E,
    ) -> Result<Self, ContainerError> {
        let socket = EngineSocket::resolve(config_socket, env);
        let docker = socket.dial()?;
        debug!(%socket, "connected to container engine");
        Ok(Self { docker, socket })
    }

    /// The resolved engine socket.
    #[must_use]
    pub const fn socket(&self) -> &EngineSocket {
        &self.socket
    }

    async fn pull_image(&self, image: &str, pull_retries: u32) -> Result<(), ContainerError> {
        let (from_image, tag) = split_image_reference(image);
        let attempts = pull_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(image, attempt, "pulling image");
            let options = CreateImageOptionsBuilder::new()
                .from_image(from_image)
                .tag(tag)
                .build();
            match self
                .docker
                .create_image(Some(options), None, None)
                .try_collect::<Vec<_>>()
                .await
            {
                Ok(_) => return Ok(()),
                Err(error) => {
                    warn!(image, attempt, %error, "image pull failed");
                    last_error = error.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
        }

        Err(ContainerError::ImagePullFailed {
            image: String::from(image),
            attempts,
            message: last_error,
        })
    }
}

impl ContainerRuntime for DockerRuntime {
    fn ping(&self) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.socket.ping(&self.docker).await })
    }

    fn ensure_image(&self, image: &str, pull_retries: u32) -> RuntimeFuture<'_, ()> {
        let image_ref = String::from(image);
        Box::pin(async move {
            match self.docker.inspect_image(&image_ref).await {
                Ok(_) => Ok(()),
                Err(error) if is_status(&error, 404) => {
                    self.pull_image(&image_ref, pull_retries).await
                }
                Err(error) => Err(classify_engine_error(&error, self.socket.uri())),
            }
        })
    }

    fn create_container(&self, spec: &LaunchSpec) -> RuntimeFuture<'_, String> {
        let options = build_create_options(spec);
        let body = build_create_body(spec);
        Box::pin(async move {
            self.docker
                .create_container(Some(options), body)
                .await
                .map(|response| response.id)
                .map_err(|error| ContainerError::CreateFailed {
                    message: error.to_string(),
                })
        })
    }

    fn start_container(&self, id: &str) -> RuntimeFuture<'_, ()> {
        let container_id = String::from(id);
        Box::pin(async move {
            self.docker
                .start_container(&container_id, None::<StartContainerOptions>)
                .await
                .map_err(|error| ContainerError::StartFailed {
                    container_id: container_id.clone(),
                    message: error.to_string(),
                })
        })
    }

    fn inspect_container(&self, id: &str) -> RuntimeFuture<'_, ContainerStatus> {
        let container_id = String::from(id);
        Box::pin(async move {
            match self
                .docker
                .inspect_container(&container_id, None::<InspectContainerOptions>)
                .await
            {
                Ok(response) => {
                    let state = response.state.unwrap_or_default();
                    Ok(ContainerStatus {
                        running: state.running.unwrap_or(false),
                        exit_code: state.exit_code,
                    })
                }
                Err(error) if is_status(&error, 404) => Ok(ContainerStatus {
                    running: false,
                    exit_code: None,
                }),
                Err(error) => Err(classify_engine_error(&error, self.socket.uri())),
            }
        })
    }

    fn stop_container(&self, id: &str, grace: Duration) -> RuntimeFuture<'_, ()> {
        let container_id = String::from(id);
        let seconds = i32::try_from(grace.as_secs()).unwrap_or(i32::MAX);
        Box::pin(async move {
            let options = StopContainerOptionsBuilder::new().t(seconds).build();
            match self.docker.stop_container(&container_id, Some(options)).await {
                Ok(()) => Ok(()),
                // 304: already stopped; 404: already gone.
                Err(error) if is_status(&error, 304) || is_status(&error, 404) => Ok(()),
                Err(error) => Err(ContainerError::TeardownFailed {
                    container_id: container_id.clone(),
                    message: error.to_string(),
                }),
            }
        })
    }

    fn remove_container(&self, id: &str) -> RuntimeFuture<'_, ()> {
        let container_id = String::from(id);
        Box::pin(async move {
            let options = RemoveContainerOptionsBuilder::new()
                .force(true)
                .v(true)
                .link(false)
                .build();
            match self.docker.remove_container(&container_id, Some(options)).await {
                Ok(()) => Ok(()),
                Err(error) if is_status(&error, 404) => Ok(()),
                Err(error) => Err(ContainerError::TeardownFailed {
                    container_id: container_id.clone(),
                    message: error.to_string(),
                }),
            }
        })
    }
}

fn is_status(error: &BollardError, expected: u16) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == expected
    )
}

/// Split an image reference into the pull request's image and tag.
///
/// `registry:5000/name:tag` becomes `("registry:5000/name", "tag")`, with the
/// tag defaulting to `latest`. A digest replaces any tag, so
/// `name:tag@sha256:abc` becomes `("name", "sha256:abc")`.
fn split_image_reference(image: &str) -> (&str, &str) {
    match image.split_once('@') {
        Some((name, digest)) => (split_tag(name).0, digest),
        None => {
            let (name, tag) = split_tag(image);
            (name, tag.unwrap_or("latest"))
        }
    }
}

/// Split off a trailing `:tag`, ignoring a registry port.
fn split_tag(image: &str) -> (&str, Option<&str>) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
        _ => (image, None),
    }
}

fn build_create_options(spec: &LaunchSpec) -> CreateContainerOptions {
    CreateContainerOptionsBuilder::new().name(spec.name()).build()
}

fn build_create_body(spec: &LaunchSpec) -> ContainerCreateBody {
    let binding = PortBinding {
        host_ip: Some(String::from(LOOPBACK)),
        host_port: Some(spec.host_port().to_string()),
    };
    let port_bindings = HashMap::from([(
        format!("{ENGINE_CONTAINER_PORT}/tcp"),
        Some(vec![binding]),
    )]);

    ContainerCreateBody {
        image: Some(String::from(spec.image())),
        env: (!spec.env().is_empty()).then(|| spec.env().to_vec()),
        labels: Some(spec.labels().clone()),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}
