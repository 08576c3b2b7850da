//! Supervisor states and the observable container view.

use std::fmt;

/// Lifecycle state of a [`super::ContainerSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No container exists.
    Stopped,
    /// Acquiring a port and creating the container.
    Starting,
    /// Container started; waiting for the engine to answer probes.
    HealthChecking,
    /// Engine is ready for sessions.
    Running,
    /// Tearing the container down.
    Stopping,
    /// The current generation failed; call `stop` before starting again.
    Failed,
}

impl SupervisorState {
    /// Lowercase name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::HealthChecking => "health-checking",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The container currently owned by a supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    container_id: String,
    name: String,
    port: u16,
    generation: u64,
}

impl ContainerHandle {
    pub(crate) const fn new(
        container_id: String,
        name: String,
        port: u16,
        generation: u64,
    ) -> Self {
        Self {
            container_id,
            name,
            port,
            generation,
        }
    }

    /// Engine-assigned container identifier.
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host port the engine is published on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Generation this container runs as.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Connection string for the engine, `duckdb://localhost:<port>`.
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!("duckdb://localhost:{}", self.port)
    }
}

/// A point-in-time view of the supervisor, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Current state.
    pub state: SupervisorState,
    /// Number of transitions into `Running` so far.
    pub generation: u64,
    /// The owned container, once it has been created.
    pub handle: Option<ContainerHandle>,
}

impl ContainerSnapshot {
    pub(crate) const fn stopped(generation: u64) -> Self {
        Self {
            state: SupervisorState::Stopped,
            generation,
            handle: None,
        }
    }

    /// The running container, if the supervisor is `Running`.
    #[must_use]
    pub fn running(&self) -> Option<&ContainerHandle> {
        self.handle
            .as_ref()
            .filter(|_| self.state == SupervisorState::Running)
    }
}
