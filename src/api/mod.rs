//! Lifecycle facade for embedding duckdbx.
//!
//! [`Duckdbx`] composes configuration, endpoint resolution, container
//! supervision and the engine session into one handle. It is built once with
//! [`Duckdbx::builder`]; building resolves configuration and the remote
//! endpoint, so invalid settings fail before any container is touched.
//!
//! The facade can be driven manually with [`Duckdbx::start`] and
//! [`Duckdbx::stop`], or used for scoped acquisition, where the container is
//! stopped on every exit path:
//!
//! ```no_run
//! use duckdbx::api::Duckdbx;
//! use duckdbx::config::{ConfigParams, ConnectionMode};
//!
//! # async fn demo() -> duckdbx::error::Result<()> {
//! let duckdbx = Duckdbx::builder()
//!     .params(ConfigParams {
//!         connection_mode: Some(ConnectionMode::Standalone),
//!         delta_sharing_server_url: Some(String::from("https://sharing.example.com")),
//!         ..ConfigParams::default()
//!     })
//!     .build()?;
//!
//! let rows = duckdbx
//!     .scoped(|db| async move { db.query("SELECT 42 AS answer").await })
//!     .await?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```


use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigFile, ConfigParams, ConfigResolver, Settings};
use crate::endpoint::{ConnectionModeResolver, EndpointDescriptor, ProfileLoader};
use crate::engine::{ContainerRuntime, DockerRuntime};
use crate::error::{ConnectionError, ContainerError, DuckdbxError, Result};
use crate::session::{Cursor, EngineClient, EngineSession, HttpEngineClient, ResultSet, Statement};
use crate::supervisor::{
    ContainerHandle, ContainerSnapshot, ContainerSupervisor, HttpLivenessProbe, LivenessProbe,
    SupervisorState,
};

/// Per-request timeout of the default liveness probe.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Connect timeout of the default engine client.
const ENGINE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`Duckdbx`].
///
/// Every collaborator defaults to the production implementation: the
/// Docker-compatible engine, the HTTP probe and client, and profile files on
/// disk.
#[derive(Default)]
pub struct DuckdbxBuilder {
    params: ConfigParams,
    config_file: ConfigFile,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    engine_client: Option<Arc<dyn EngineClient>>,
    profile_loader: Option<Arc<dyn ProfileLoader>>,
}

impl DuckdbxBuilder {
    /// Set the explicit parameter layer.
    #[must_use]
    pub fn params(mut self, params: ConfigParams) -> Self {
        self.params = params;
        self
    }

    /// Choose how the configuration file is located.
    #[must_use]
    pub fn config_file(mut self, config_file: ConfigFile) -> Self {
        self.config_file = config_file;
        self
    }

    /// Use `runtime` instead of connecting to the container engine.
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Use `probe` for the start-up health gate.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Use `engine_client` to talk to the engine.
    #[must_use]
    pub fn engine_client(mut self, engine_client: Arc<dyn EngineClient>) -> Self {
        self.engine_client = Some(engine_client);
        self
    }

    /// Use `profile_loader` to read Delta Sharing profiles.
    #[must_use]
    pub fn profile_loader(mut self, profile_loader: Arc<dyn ProfileLoader>) -> Self {
        self.profile_loader = Some(profile_loader);
        self
    }

    /// Build against the process environment.
    ///
    /// # Errors
    ///
    /// As [`Self::build_with_env`].
    pub fn build(self) -> Result<Duckdbx> {
        self.build_with_env(&mockable::DefaultEnv::new())
    }

    /// Build, reading environment variables through `env`.
    ///
    /// # Errors
    ///
    /// Returns configuration errors for invalid or ambiguous settings,
    /// connection errors for unreadable or malformed profiles or when the
    /// default engine client cannot be created, and container errors when
    /// the engine socket or the default probe cannot be set up.
    pub fn build_with_env<E: mockable::Env>(self, env: &E) -> Result<Duckdbx> {
        let settings = ConfigResolver::resolve(&self.params, env, &self.config_file)?;
        let resolver = self
            .profile_loader
            .map_or_else(ConnectionModeResolver::default, ConnectionModeResolver::new);
        let endpoint = resolver.resolve(&settings)?;

        let runtime = self.runtime.map_or_else(
            || -> Result<Arc<dyn ContainerRuntime>> {
                Ok(Arc::new(DockerRuntime::connect(settings.engine_socket(), env)?))
            },
            Ok,
        )?;
        let probe = self.probe.map_or_else(
            || -> Result<Arc<dyn LivenessProbe>> {
                Ok(Arc::new(HttpLivenessProbe::new(PROBE_REQUEST_TIMEOUT)?))
            },
            Ok,
        )?;
        let engine_client = self.engine_client.map_or_else(
            || -> Result<Arc<dyn EngineClient>> {
                let client = HttpEngineClient::new(
                    ENGINE_CONNECT_TIMEOUT,
                    settings.container().query_timeout(),
                )
                .map_err(|error| ConnectionError::ClientUnavailable {
                    message: error.to_string(),
                })?;
                Ok(Arc::new(client))
            },
            Ok,
        )?;

        let supervisor = Arc::new(ContainerSupervisor::new(
            settings.container().clone(),
            runtime,
            probe,
        ));
        let session = EngineSession::new(
            supervisor.subscribe(),
            engine_client,
            endpoint.clone(),
            settings.container().query_timeout(),
        );
        info!(mode = %endpoint.mode(), endpoint = %endpoint.connection_string(), "duckdbx ready");

        Ok(Duckdbx {
            settings,
            endpoint,
            supervisor,
            session,
        })
    }
}

/// One supervised engine container and its session.
pub struct Duckdbx {
    settings: Settings,
    endpoint: EndpointDescriptor,
    supervisor: Arc<ContainerSupervisor>,
    session: EngineSession,
}

impl fmt::Debug for Duckdbx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duckdbx")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Duckdbx {
    /// Start building a facade.
    #[must_use]
    pub fn builder() -> DuckdbxBuilder {
        DuckdbxBuilder::default()
    }

    /// Start the engine container.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::InvalidState` when not stopped, and launch or
    /// health-check errors otherwise.
    pub async fn start(&self) -> Result<ContainerHandle> {
        self.supervisor.start().await
    }

    /// Start the engine container, aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`Self::start`], plus `ContainerError::Cancelled`.
    pub async fn start_with_cancel(&self, cancel: &CancellationToken) -> Result<ContainerHandle> {
        self.supervisor.start_with_cancel(cancel).await
    }

    /// Stop the engine container. A no-op when already stopped.
    ///
    /// Does not wait for a query in flight; that query fails with
    /// `ConnectionError::SessionLost` once the container is stopping.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::TeardownFailed` when removal failed; the
    /// container is considered released regardless.
    pub async fn stop(&self) -> Result<()> {
        self.session.close();
        self.supervisor.stop().await
    }

    /// Replace the container with a new generation.
    ///
    /// # Errors
    ///
    /// As [`Self::start`].
    pub async fn restart(&self) -> Result<ContainerHandle> {
        self.session.close();
        self.supervisor.restart().await
    }

    /// Whether the engine is running. Never blocks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Re-inspect the running container.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::Exited` when the container has died.
    pub async fn check_health(&self) -> Result<bool> {
        self.supervisor.check_health().await
    }

    /// Run a statement and return a cursor over its rows.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` variants; see [`EngineSession::execute`].
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<Cursor> {
        self.session.execute(statement).await
    }

    /// Run a statement and materialise its result.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` variants; see [`EngineSession::query`].
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<ResultSet> {
        self.session.query(statement).await
    }

    /// Start the engine, run `body`, and stop the engine on every exit path.
    ///
    /// An error from `body` takes precedence over a teardown error, which is
    /// then only logged.
    ///
    /// # Errors
    ///
    /// Returns the start error, the body's error, or the teardown error.
    pub async fn scoped<'a, T, F, Fut>(&'a self, body: F) -> Result<T>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        self.scoped_with_cancel(&CancellationToken::new(), body)
            .await
    }

    /// Like [`Self::scoped`], abandoning start-up or `body` when `cancel`
    /// fires. The container is still stopped before returning.
    ///
    /// # Errors
    ///
    /// As [`Self::scoped`], plus `ContainerError::Cancelled`.
    pub async fn scoped_with_cancel<'a, T, F, Fut>(
        &'a self,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        if let Err(error) = self.start_with_cancel(cancel).await {
            self.release("failed start", None).await;
            return Err(error);
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(ContainerError::Cancelled { operation: "scoped run" }.into())
            }
            result = body(self) => result,
        };

        match outcome {
            Ok(value) => {
                self.stop().await?;
                Ok(value)
            }
            Err(error) => {
                self.release("scope error", Some(&error)).await;
                Err(error)
            }
        }
    }

    /// Start the engine and return a guard that stops it on [`ScopedDuckdbx::exit`].
    ///
    /// A guard dropped without `exit` schedules the stop on the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns the start error after stopping whatever was created.
    pub async fn enter(&self) -> Result<ScopedDuckdbx<'_>> {
        if let Err(error) = self.start().await {
            self.release("failed start", None).await;
            return Err(error);
        }
        Ok(ScopedDuckdbx {
            duckdbx: self,
            released: false,
        })
    }

    async fn release(&self, reason: &str, cause: Option<&DuckdbxError>) {
        if let Err(stop_error) = self.stop().await {
            warn!(reason, cause = cause.map(ToString::to_string), %stop_error, "teardown failed");
        }
    }

    /// Resolved settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolved remote endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    /// Current supervisor state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    /// Current container generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.supervisor.generation()
    }

    /// `duckdb://localhost:<port>` while running.
    #[must_use]
    pub fn connection_string(&self) -> Option<String> {
        self.supervisor.connection_string()
    }

    /// Subscribe to supervisor state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ContainerSnapshot> {
        self.supervisor.subscribe()
    }
}

/// A started engine that must be released with [`Self::exit`].
#[must_use = "dropping the guard without calling exit only schedules a background stop"]
pub struct ScopedDuckdbx<'a> {
    duckdbx: &'a Duckdbx,
    released: bool,
}

impl ScopedDuckdbx<'_> {
    /// Stop the engine.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::TeardownFailed` when removal failed.
    pub async fn exit(mut self) -> Result<()> {
        self.released = true;
        self.duckdbx.stop().await
    }
}

impl Deref for ScopedDuckdbx<'_> {
    type Target = Duckdbx;

    fn deref(&self) -> &Self::Target {
        self.duckdbx
    }
}

impl Drop for ScopedDuckdbx<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "scoped engine dropped outside a runtime; container removal left to the supervisor"
            );
            self.duckdbx.session.close();
            return;
        };
        warn!("scoped engine dropped without exit, stopping in the background");
        self.duckdbx.session.close();
        let supervisor = Arc::clone(&self.duckdbx.supervisor);
        handle.spawn(async move {
            if let Err(error) = supervisor.stop().await {
                warn!(%error, "background stop failed");
            }
        });
    }
}
