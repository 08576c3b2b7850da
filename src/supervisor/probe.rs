//! Liveness probing and the start-up health gate.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ContainerSettings;
use crate::engine::ContainerRuntime;
use crate::error::ContainerError;

/// Result of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The engine accepts queries.
    Ready,
    /// The engine is not listening yet.
    NotReady,
}

/// Boxed future type returned by [`LivenessProbe`] implementors.
pub type ProbeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProbeStatus, ContainerError>> + Send + 'a>>;

/// Checks whether the engine behind a host port is ready.
///
/// `Err` means the probe itself failed with an I/O error; the health gate
/// tolerates a bounded number of those.
pub trait LivenessProbe: Send + Sync {
    /// Probe the engine published on `port`.
    fn probe(&self, port: u16) -> ProbeFuture<'_>;
}

/// Probes `GET /health` on the engine's HTTP port.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: reqwest::Client,
}

impl HttpLivenessProbe {
    /// Create a probe whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::HealthCheckFailed` when the HTTP client
    /// cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self, ContainerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| ContainerError::HealthCheckFailed {
                message: error.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl LivenessProbe for HttpLivenessProbe {
    fn probe(&self, port: u16) -> ProbeFuture<'_> {
        let url = format!("http://127.0.0.1:{port}/health");
        Box::pin(async move {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => Ok(ProbeStatus::Ready),
                Ok(_) => Ok(ProbeStatus::NotReady),
                // Nothing listening yet is expected while the engine boots.
                Err(error) if error.is_connect() => Ok(ProbeStatus::NotReady),
                Err(error) => Err(ContainerError::HealthCheckFailed {
                    message: error.to_string(),
                }),
            }
        })
    }
}

/// Wait until the container is running and its engine answers probes.
///
/// The caller bounds the gate with the start-up timeout. An exited container
/// fails immediately; probe I/O failures beyond `health_max_retries` fail the
/// gate.
pub(crate) async fn await_healthy(
    runtime: &dyn ContainerRuntime,
    probe: &dyn LivenessProbe,
    container_id: &str,
    port: u16,
    settings: &ContainerSettings,
) -> Result<(), ContainerError> {
    let mut interval = tokio::time::interval(settings.health_interval());
    let mut failures: u32 = 0;
    let mut attempt: u64 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        interval.tick().await;
        match check_once(runtime, probe, container_id, port).await {
            Ok(ProbeStatus::Ready) => {
                debug!(container_id, attempt, "engine ready");
                return Ok(());
            }
            Ok(ProbeStatus::NotReady) => debug!(container_id, attempt, "engine not ready yet"),
            Err(error @ ContainerError::Exited { .. }) => return Err(error),
            Err(error) => {
                failures = failures.saturating_add(1);
                warn!(container_id, attempt, failures, %error, "liveness probe failed");
                if failures > settings.health_max_retries() {
                    return Err(ContainerError::HealthCheckFailed {
                        message: format!("{failures} probe failures, last: {error}"),
                    });
                }
            }
        }
    }
}

async fn check_once(
    runtime: &dyn ContainerRuntime,
    probe: &dyn LivenessProbe,
    container_id: &str,
    port: u16,
) -> Result<ProbeStatus, ContainerError> {
    let status = runtime.inspect_container(container_id).await?;
    if !status.running {
        return Err(ContainerError::Exited {
            container_id: String::from(container_id),
            exit_code: status.exit_code,
        });
    }
    probe.probe(port).await
}
