//! Semantic error types for the duckdbx library.
//!
//! Errors fall into three closed families: configuration, container, and
//! connection. Each family is a `thiserror` enum that callers can inspect, and
//! [`DuckdbxError`] aggregates them so that every public operation returns one
//! type. Opaque reporting (`eyre::Report`) is reserved for the binary.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while resolving or validating configuration.
///
/// These are deterministic: they are always raised before any container or
/// network action and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path where the configuration file was expected.
        path: PathBuf,
    },

    /// The configuration file could not be read or parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// Both a Databricks workspace and a standalone sharing server were
    /// configured without an explicit connection mode.
    #[error(
        "ambiguous connection configuration: both databricks_host and \
         delta_sharing_server_url are set; set connection_mode to choose one"
    )]
    AmbiguousConnectionMode,

    /// The `OrthoConfig` library returned an error while merging layers.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised by the container supervisor and the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The container engine socket was not found.
    #[error("container engine socket not found: {path}")]
    SocketNotFound {
        /// The path where the socket was expected.
        path: PathBuf,
    },

    /// Permission denied when accessing the container engine socket.
    #[error("permission denied accessing container socket: {path}")]
    PermissionDenied {
        /// The path to the socket.
        path: PathBuf,
    },

    /// The requested lifecycle operation is not valid in the current state.
    #[error("cannot {operation} container while supervisor is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The supervisor state at the time of the call.
        state: String,
    },

    /// The fixed host port is already bound.
    #[error("port {port} is already in use")]
    PortUnavailable {
        /// The requested port.
        port: u16,
    },

    /// Every port in the scan range is bound or claimed.
    #[error("no free port in range {start}-{end}")]
    NoPortAvailable {
        /// First port of the scanned range.
        start: u16,
        /// Last port of the scanned range.
        end: u16,
    },

    /// The container image could not be pulled from its registry.
    #[error("failed to pull image '{image}' after {attempts} attempt(s): {message}")]
    ImagePullFailed {
        /// The image reference.
        image: String,
        /// How many pull attempts were made.
        attempts: u32,
        /// The last registry error.
        message: String,
    },

    /// Failed to create a container.
    #[error("failed to create container: {message}")]
    CreateFailed {
        /// A description of the creation failure.
        message: String,
    },

    /// Failed to start a container.
    #[error("failed to start container '{container_id}': {message}")]
    StartFailed {
        /// The ID of the container that failed to start.
        container_id: String,
        /// A description of the start failure.
        message: String,
    },

    /// The container exited while it was expected to be running.
    #[error("container '{container_id}' exited with code {exit_code:?}")]
    Exited {
        /// The ID of the container.
        container_id: String,
        /// The exit code reported by the engine, when known.
        exit_code: Option<i64>,
    },

    /// Health check failed: the probe kept failing with I/O errors.
    #[error("container engine health check failed: {message}")]
    HealthCheckFailed {
        /// A description of the health check failure.
        message: String,
    },

    /// Health check timed out.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },

    /// Start-up did not reach the health gate before the start-up timeout.
    #[error("container start did not complete within {seconds} seconds")]
    StartTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },

    /// Stopping or removing the container failed. The supervisor still
    /// considers the container released.
    #[error("failed to tear down container '{container_id}': {message}")]
    TeardownFailed {
        /// The ID (or name) of the container.
        container_id: String,
        /// A description of the teardown failure.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// The operation that was cancelled.
        operation: &'static str,
    },
}

/// Errors raised while resolving the remote endpoint or talking to the engine.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The profile file could not be read.
    #[error("failed to read profile file '{path}': {message}")]
    ProfileUnreadable {
        /// The profile file path.
        path: PathBuf,
        /// A description of the I/O failure.
        message: String,
    },

    /// The profile file content is not a valid sharing profile.
    #[error("malformed profile file '{path}': {message}")]
    ProfileMalformed {
        /// The profile file path.
        path: PathBuf,
        /// A description of the parse failure.
        message: String,
    },

    /// The HTTP client used to reach the engine could not be created.
    #[error("failed to create engine client: {message}")]
    ClientUnavailable {
        /// A description of the failure.
        message: String,
    },

    /// The supervised container is not running.
    #[error("engine is not running (supervisor is {state})")]
    NotRunning {
        /// The supervisor state at the time of the call.
        state: String,
    },

    /// A session could not be established with the engine.
    #[error("failed to connect to engine on port {port}: {message}")]
    ConnectFailed {
        /// The local port of the engine.
        port: u16,
        /// A description of the failure.
        message: String,
    },

    /// The session was bound to a container generation that has since been
    /// replaced, and no reconnection attempt remained.
    #[error("session bound to generation {bound} but container is at generation {current}")]
    StaleGeneration {
        /// The generation the session was created against.
        bound: u64,
        /// The supervisor's current generation.
        current: u64,
    },

    /// The connection failed again after the single reconnection attempt.
    #[error("engine connection lost after reconnecting: {message}")]
    SessionLost {
        /// The last transport error.
        message: String,
    },

    /// The engine rejected the statement.
    #[error("query execution failed: {message}")]
    QueryFailed {
        /// The engine's error message.
        message: String,
    },

    /// The statement did not complete within the query timeout.
    #[error("query timed out after {seconds} seconds")]
    QueryTimeout {
        /// The timeout in seconds.
        seconds: u64,
    },
}

/// The family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid, missing, or ambiguous settings.
    Configuration,
    /// Launch, health-check, or teardown failure.
    Container,
    /// Endpoint resolution, credential, or query-session failure.
    Connection,
}

/// Top-level error type for duckdbx.
#[derive(Debug, Error)]
pub enum DuckdbxError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred during container operations.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// An error occurred while resolving or using an engine connection.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl DuckdbxError {
    /// Return the family this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Container(_) => ErrorKind::Container,
            Self::Connection(_) => ErrorKind::Connection,
        }
    }
}

/// A specialised `Result` type for duckdbx operations.
pub type Result<T> = std::result::Result<T, DuckdbxError>;
