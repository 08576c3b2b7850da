//! Container lifecycle supervision.
//!
//! A [`ContainerSupervisor`] owns at most one engine container and drives it
//! through `Stopped -> Starting -> HealthChecking -> Running -> Stopping ->
//! Stopped`, with `Failed` reachable from any of the middle states. Every
//! transition is published on a `watch` channel so sessions can observe the
//! current port and generation without touching supervisor state.
//!
//! Teardown is guaranteed: a failed or cancelled start tears down whatever it
//! had created, `stop` is idempotent, and dropping a supervisor that still
//! owns a container schedules a best-effort forced removal.

mod probe;
mod state;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use probe::{HttpLivenessProbe, LivenessProbe, ProbeFuture, ProbeStatus};
pub use state::{ContainerHandle, ContainerSnapshot, SupervisorState};

use crate::config::ContainerSettings;
use crate::engine::{
    ContainerRuntime, GENERATION_LABEL, LaunchSpec, PortAllocator, PortLease, container_name,
};
use crate::error::{ContainerError, Result};

/// Extra time allowed beyond the grace period for the engine to answer a
/// stop request.
const STOP_SLACK: Duration = Duration::from_secs(5);

/// Upper bound on a forced removal.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resources owned for the current generation.
struct Owned {
    name: String,
    container_id: Option<String>,
    lease: PortLease,
}

impl Owned {
    /// The identifier teardown should target: the id once known, else the
    /// name (creation may have been interrupted).
    fn target(&self) -> String {
        self.container_id
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Default)]
struct Inner {
    generation: u64,
    owned: Option<Owned>,
}

/// Owns one engine container and its full lifecycle.
pub struct ContainerSupervisor {
    settings: ContainerSettings,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn LivenessProbe>,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<ContainerSnapshot>,
}

impl ContainerSupervisor {
    /// Create a supervisor in the `Stopped` state.
    #[must_use]
    pub fn new(
        settings: ContainerSettings,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let (snapshot, _) = watch::channel(ContainerSnapshot::stopped(0));
        Self {
            settings,
            runtime,
            probe,
            inner: Mutex::new(Inner::default()),
            snapshot,
        }
    }

    /// Start the container and wait until its engine is ready.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::InvalidState` unless the supervisor is
    /// `Stopped`, and any launch or health-check error otherwise. The whole
    /// launch is bounded by the start-up timeout: running out of time while
    /// health checking is `ContainerError::HealthCheckTimeout`, earlier it is
    /// `ContainerError::StartTimeout`. On error the supervisor is `Failed` and
    /// partial resources have been torn down.
    pub async fn start(&self) -> Result<ContainerHandle> {
        self.start_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`Self::start`], aborting when `cancel` fires.
    ///
    /// Cancellation does not skip teardown: anything already created is
    /// removed before `ContainerError::Cancelled` is returned.
    ///
    /// # Errors
    ///
    /// As [`Self::start`], plus `ContainerError::Cancelled`.
    pub async fn start_with_cancel(&self, cancel: &CancellationToken) -> Result<ContainerHandle> {
        let mut inner = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ContainerError::Cancelled { operation: "start" }.into());
            }
            guard = self.inner.lock() => guard,
        };

        let state = self.state();
        if state != SupervisorState::Stopped {
            return Err(ContainerError::InvalidState {
                operation: "start",
                state: state.to_string(),
            }
            .into());
        }
        self.publish(SupervisorState::Starting, inner.generation, None);

        let startup_timeout = self.settings.startup_timeout();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ContainerError::Cancelled { operation: "start" }),
            result = tokio::time::timeout(startup_timeout, self.launch(&mut inner)) => {
                result.unwrap_or_else(|_| Err(self.start_timeout(startup_timeout)))
            }
        };

        match outcome {
            Ok(handle) => Ok(handle),
            Err(error) => {
                warn!(%error, "container start failed");
                let handle = self.snapshot.borrow().handle.clone();
                self.publish(SupervisorState::Failed, inner.generation, handle);
                if let Err(teardown_error) = self.teardown(&mut inner).await {
                    warn!(%teardown_error, "cleanup after failed start was incomplete");
                }
                self.publish(SupervisorState::Failed, inner.generation, None);
                Err(error.into())
            }
        }
    }

    /// The error for a start that ran out of time, named after the phase it
    /// was stuck in.
    fn start_timeout(&self, timeout: Duration) -> ContainerError {
        let seconds = timeout.as_secs();
        if self.state() == SupervisorState::HealthChecking {
            ContainerError::HealthCheckTimeout { seconds }
        } else {
            ContainerError::StartTimeout { seconds }
        }
    }

    async fn launch(
        &self,
        inner: &mut Inner,
    ) -> std::result::Result<ContainerHandle, ContainerError> {
        let settings = &self.settings;
        self.runtime.ping().await?;
        self.runtime
            .ensure_image(settings.image(), settings.pull_retries())
            .await?;

        let lease = match settings.fixed_port() {
            Some(port) => PortAllocator::acquire_exact(port)?,
            None => PortAllocator::acquire(settings.port_range())?,
        };
        let port = lease.port();
        let name = container_name(settings.name_prefix());
        let generation = inner.generation.saturating_add(1);
        let spec = LaunchSpec::new(settings.image(), name.clone(), port)
            .with_env("DUCKDBX_GENERATION", generation)
            .with_label(GENERATION_LABEL, generation.to_string());
        info!(container = %name, port, generation, image = settings.image(), "creating container");
        let owned = inner.owned.insert(Owned {
            name: name.clone(),
            container_id: None,
            lease,
        });

        let container_id = self.runtime.create_container(&spec).await?;
        owned.container_id = Some(container_id.clone());
        owned.lease.release_listener();

        self.runtime.start_container(&container_id).await?;
        let handle = ContainerHandle::new(container_id.clone(), name, port, generation);
        self.publish(
            SupervisorState::HealthChecking,
            inner.generation,
            Some(handle.clone()),
        );

        probe::await_healthy(
            self.runtime.as_ref(),
            self.probe.as_ref(),
            &container_id,
            port,
            settings,
        )
        .await?;

        inner.generation = generation;
        self.publish(SupervisorState::Running, generation, Some(handle.clone()));
        Ok(handle)
    }

    /// Stop and remove the container.
    ///
    /// Calling `stop` when already `Stopped` is a no-op. Whatever happens, the
    /// supervisor ends `Stopped` and the container is considered released.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::TeardownFailed` when the engine could not
    /// remove the container. The state is `Stopped` regardless.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() == SupervisorState::Stopped {
            return Ok(());
        }

        let handle = self.snapshot.borrow().handle.clone();
        self.publish(SupervisorState::Stopping, inner.generation, handle);
        let result = self.teardown(&mut inner).await;
        self.publish(SupervisorState::Stopped, inner.generation, None);
        result.map_err(Into::into)
    }

    /// Stop then start again, producing a new generation.
    ///
    /// A teardown failure of the old container is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::start`].
    pub async fn restart(&self) -> Result<ContainerHandle> {
        if let Err(error) = self.stop().await {
            warn!(%error, "teardown before restart was incomplete");
        }
        self.start().await
    }

    /// Re-inspect a running container.
    ///
    /// Returns `Ok(false)` when the supervisor is not `Running`. A running
    /// supervisor whose container has exited moves to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::Exited` when the container has exited, or the
    /// engine error when it cannot be inspected.
    pub async fn check_health(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        let Some(handle) = self.snapshot.borrow().running().cloned() else {
            return Ok(false);
        };

        let status = self
            .runtime
            .inspect_container(handle.container_id())
            .await?;
        if status.running {
            return Ok(true);
        }

        warn!(
            container_id = handle.container_id(),
            exit_code = ?status.exit_code,
            "container exited"
        );
        let container_id = String::from(handle.container_id());
        self.publish(SupervisorState::Failed, inner.generation, Some(handle));
        Err(ContainerError::Exited {
            container_id,
            exit_code: status.exit_code,
        }
        .into())
    }

    async fn teardown(&self, inner: &mut Inner) -> std::result::Result<(), ContainerError> {
        let Some(target) = inner.owned.as_ref().map(Owned::target) else {
            return Ok(());
        };
        let grace = self.settings.stop_grace();
        info!(container = %target, "stopping container");

        let stopped = tokio::time::timeout(
            grace.saturating_add(STOP_SLACK),
            self.runtime.stop_container(&target, grace),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ContainerError::TeardownFailed {
                container_id: target.clone(),
                message: String::from("stop request timed out"),
            })
        });
        if let Err(error) = &stopped {
            warn!(container = %target, %error, "graceful stop failed, forcing removal");
        }

        let removed = tokio::time::timeout(REMOVE_TIMEOUT, self.runtime.remove_container(&target))
            .await
            .unwrap_or_else(|_| {
                Err(ContainerError::TeardownFailed {
                    container_id: target.clone(),
                    message: String::from("remove request timed out"),
                })
            });

        // Dropping the lease releases the port claim.
        inner.owned = None;
        match removed {
            Ok(()) => {
                info!(container = %target, "container removed");
                Ok(())
            }
            Err(error) => {
                warn!(container = %target, %error, "container could not be removed");
                Err(error)
            }
        }
    }

    fn publish(&self, state: SupervisorState, generation: u64, handle: Option<ContainerHandle>) {
        info!(
            %state,
            generation,
            port = handle.as_ref().map(ContainerHandle::port),
            "supervisor state changed"
        );
        self.snapshot.send_replace(ContainerSnapshot {
            state,
            generation,
            handle,
        });
    }

    /// Whether the engine is `Running`. Never blocks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.snapshot.borrow().state
    }

    /// Number of transitions into `Running` so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.snapshot.borrow().generation
    }

    /// The running container, if any.
    #[must_use]
    pub fn handle(&self) -> Option<ContainerHandle> {
        self.snapshot.borrow().running().cloned()
    }

    /// The engine connection string while `Running`.
    #[must_use]
    pub fn connection_string(&self) -> Option<String> {
        self.handle().map(|handle| handle.connection_string())
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ContainerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ContainerSnapshot> {
        self.snapshot.subscribe()
    }

    /// The container settings this supervisor launches with.
    #[must_use]
    pub const fn settings(&self) -> &ContainerSettings {
        &self.settings
    }
}

impl Drop for ContainerSupervisor {
    fn drop(&mut self) {
        let Some(owned) = self.inner.get_mut().owned.take() else {
            return;
        };
        let target = owned.target();
        drop(owned);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %target, "no runtime available to remove container on drop");
            return;
        };
        warn!(container = %target, "supervisor dropped while owning a container, removing it");
        let runtime = Arc::clone(&self.runtime);
        handle.spawn(async move {
            if let Err(error) = runtime.remove_container(&target).await {
                warn!(container = %target, %error, "best-effort removal failed");
            }
        });
    }
}
