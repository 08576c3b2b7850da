//! Container engine access.
//!
//! The engine socket is resolved through a priority-based fallback chain:
//!
//! 1. Parameter (`engine_socket`)
//! 2. `DUCKDBX_ENGINE_SOCKET` environment variable
//! 3. Config file (`engine_socket` in TOML)
//! 4. `DOCKER_HOST` environment variable
//! 5. `CONTAINER_HOST` environment variable
//! 6. `PODMAN_HOST` environment variable
//! 7. Platform default (`/var/run/docker.sock` on Unix)
//!
//! [`ContainerRuntime`] is the lifecycle capability the supervisor drives and
//! [`PortAllocator`] leases the host port each container publishes on.

mod ports;
mod runtime;
mod socket;

pub use ports::{PortAllocator, PortLease};
pub use runtime::{
    ContainerRuntime, ContainerStatus, DockerRuntime, ENGINE_CONTAINER_PORT, GENERATION_LABEL,
    LaunchSpec, MANAGED_LABEL, RuntimeFuture, container_name,
};
pub use socket::{EngineSocket, SocketSource};
