//! Engine sessions bound to a supervised container generation.
//!
//! An [`EngineSession`] connects lazily on the first call and stays bound to
//! the generation it connected against. Before every dispatch it re-reads the
//! supervisor's published snapshot; a newer generation forces a reconnect, so
//! a statement is never sent to a container that has been replaced.
//!
//! Connection-level failures get exactly one reconnection per call. Engine
//! rejections and query timeouts are surfaced immediately. The query timeout
//! bounds the whole call, connecting and reconnecting included, and a call in
//! flight is abandoned as soon as its container stops being the running one.

mod client;
mod http;


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

pub use client::{
    Cursor, EngineCallError, EngineClient, EngineConnection, EngineFuture, EngineTarget,
    ResultSet, Statement,
};
pub use http::HttpEngineClient;

use crate::endpoint::EndpointDescriptor;
use crate::error::{ConnectionError, Result};
use crate::supervisor::ContainerSnapshot;

/// Reconnection attempts allowed per call after a connection-level failure.
const RECONNECT_BUDGET: u32 = 1;

struct Bound {
    generation: u64,
    port: u16,
    connection: Box<dyn EngineConnection>,
}

/// A failed attempt and whether another one may help.
struct AttemptError {
    error: ConnectionError,
    retryable: bool,
}

impl AttemptError {
    const fn retryable(error: ConnectionError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    const fn fatal(error: ConnectionError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Executes statements against the engine of a running container.
pub struct EngineSession {
    snapshots: watch::Receiver<ContainerSnapshot>,
    client: Arc<dyn EngineClient>,
    endpoint: EndpointDescriptor,
    query_timeout: Duration,
    bound: Mutex<Option<Bound>>,
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("endpoint", &self.endpoint)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl EngineSession {
    /// Create an unconnected session observing `snapshots`.
    #[must_use]
    pub fn new(
        snapshots: watch::Receiver<ContainerSnapshot>,
        client: Arc<dyn EngineClient>,
        endpoint: EndpointDescriptor,
        query_timeout: Duration,
    ) -> Self {
        Self {
            snapshots,
            client,
            endpoint,
            query_timeout,
            bound: Mutex::new(None),
        }
    }

    /// Run `statement` and return a cursor over its rows.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotRunning` when the container is not
    /// running, `ConnectionError::QueryFailed` when the engine rejects the
    /// statement, `ConnectionError::QueryTimeout` when it exceeds the query
    /// timeout, and `ConnectFailed`, `SessionLost` or `StaleGeneration` when
    /// the connection could not be (re)established.
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<Cursor> {
        self.dispatch(&statement.into()).await.map(Cursor::from)
    }

    /// Run `statement` and materialise its full result.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`].
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<ResultSet> {
        self.dispatch(&statement.into()).await
    }

    /// Drop the current connection, if any. The next call reconnects.
    ///
    /// Never waits for a call in flight; that call keeps the connection and
    /// discards it once its container is stopped or replaced.
    pub fn close(&self) {
        let Ok(mut bound) = self.bound.try_lock() else {
            debug!("engine session busy, leaving the connection to the call in flight");
            return;
        };
        if bound.take().is_some() {
            debug!("engine session closed");
        }
    }

    /// Generation the session is currently bound to.
    pub async fn bound_generation(&self) -> Option<u64> {
        self.bound.lock().await.as_ref().map(|bound| bound.generation)
    }

    /// The remote endpoint sessions attach the engine to.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    async fn dispatch(&self, statement: &Statement) -> Result<ResultSet> {
        let mut bound = self.bound.lock().await;
        let outcome =
            tokio::time::timeout(self.query_timeout, self.run(&mut bound, statement)).await;
        outcome.unwrap_or_else(|_| {
            // The connection is in an unknown state after an abandoned request.
            *bound = None;
            Err(ConnectionError::QueryTimeout {
                seconds: self.query_timeout.as_secs(),
            }
            .into())
        })
    }

    async fn run(&self, bound: &mut Option<Bound>, statement: &Statement) -> Result<ResultSet> {
        let mut reconnects: u32 = 0;
        loop {
            match self.attempt(bound, statement).await {
                Ok(result) => return Ok(result),
                Err(failure) => {
                    if failure.retryable {
                        *bound = None;
                    }
                    if !failure.retryable || reconnects >= RECONNECT_BUDGET {
                        return Err(failure.error.into());
                    }
                    reconnects = reconnects.saturating_add(1);
                    warn!(error = %failure.error, "engine connection failed, reconnecting once");
                }
            }
        }
    }

    async fn attempt(
        &self,
        bound: &mut Option<Bound>,
        statement: &Statement,
    ) -> std::result::Result<ResultSet, AttemptError> {
        let target = match self.running_target() {
            Ok(target) => target,
            Err(error) => {
                *bound = None;
                return Err(AttemptError::fatal(error));
            }
        };
        if bound
            .as_ref()
            .is_some_and(|current| current.generation != target.generation)
        {
            debug!(generation = target.generation, "container generation changed, rebinding");
            *bound = None;
        }

        let binding = if let Some(existing) = bound.take() {
            existing
        } else {
            self.connect(&target).await?
        };
        let session = bound.insert(binding);

        // The container may have been replaced while connecting.
        let current = self.running_target().map_err(AttemptError::fatal)?;
        if current.generation != session.generation {
            return Err(AttemptError::retryable(ConnectionError::StaleGeneration {
                bound: session.generation,
                current: current.generation,
            }));
        }

        let generation = session.generation;
        let port = session.port;
        let outcome = tokio::select! {
            result = session.connection.execute(statement) => Some(result),
            () = self.superseded(generation) => None,
        };
        match outcome {
            Some(Ok(result)) => Ok(result),
            Some(Err(EngineCallError::Rejected(message))) => {
                Err(AttemptError::fatal(ConnectionError::QueryFailed { message }))
            }
            Some(Err(EngineCallError::Transport(message))) => {
                warn!(port, %message, "engine connection dropped");
                Err(AttemptError::retryable(ConnectionError::SessionLost { message }))
            }
            None => {
                warn!(port, generation, "container went away during the call");
                *bound = None;
                // The statement may already have run; it is not re-sent.
                Err(AttemptError::fatal(ConnectionError::SessionLost {
                    message: format!("container generation {generation} is no longer running"),
                }))
            }
        }
    }

    /// Resolves once `generation` is no longer the running generation.
    async fn superseded(&self, generation: u64) {
        let mut snapshots = self.snapshots.clone();
        let closed = snapshots
            .wait_for(|snapshot| {
                !snapshot
                    .running()
                    .is_some_and(|handle| handle.generation() == generation)
            })
            .await
            .is_err();
        if closed {
            // Without a supervisor nothing can supersede the generation.
            std::future::pending::<()>().await;
        }
    }

    async fn connect(&self, target: &EngineTarget) -> std::result::Result<Bound, AttemptError> {
        debug!(port = target.port, generation = target.generation, "connecting to engine");
        match self.client.connect(target).await {
            Ok(connection) => Ok(Bound {
                generation: target.generation,
                port: target.port,
                connection,
            }),
            Err(error) => {
                let failure = ConnectionError::ConnectFailed {
                    port: target.port,
                    message: error.to_string(),
                };
                if error.is_connection_level() {
                    Err(AttemptError::retryable(failure))
                } else {
                    Err(AttemptError::fatal(failure))
                }
            }
        }
    }

    fn running_target(&self) -> std::result::Result<EngineTarget, ConnectionError> {
        let snapshot = self.snapshots.borrow();
        snapshot.running().map_or_else(
            || {
                Err(ConnectionError::NotRunning {
                    state: snapshot.state.to_string(),
                })
            },
            |handle| {
                Ok(EngineTarget {
                    port: handle.port(),
                    generation: handle.generation(),
                    endpoint: self.endpoint.clone(),
                })
            },
        )
    }
}
