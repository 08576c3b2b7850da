//! HTTP implementation of the engine query protocol.
//!
//! The engine inside the container listens on its published port and speaks
//! JSON: `POST /attach` binds it to the remote sharing endpoint, `POST /query`
//! runs one statement. Transport errors and 5xx responses are connection
//! failures; 4xx responses are rejections of the request itself.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::client::{
    EngineCallError, EngineClient, EngineConnection, EngineFuture, EngineTarget, ResultSet,
    Statement,
};
use crate::endpoint::EndpointDescriptor;

/// Connects to the engine over HTTP on `127.0.0.1`.
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    client: Client,
}

impl HttpEngineClient {
    /// Create a client whose TCP connects time out after `connect_timeout`
    /// and whose requests, attach included, time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `EngineCallError::Transport` when the HTTP client cannot be
    /// built.
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, EngineCallError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|error| EngineCallError::Transport(error.to_string()))?;
        Ok(Self { client })
    }
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
enum AttachRequest<'a> {
    Databricks {
        generation: u64,
        host: &'a str,
        token: &'a str,
        catalog: &'a str,
    },
    Standalone {
        generation: u64,
        server_url: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        bearer_token: Option<&'a str>,
    },
}

impl<'a> AttachRequest<'a> {
    fn new(target: &'a EngineTarget) -> Self {
        match &target.endpoint {
            EndpointDescriptor::Databricks {
                host,
                token,
                catalog_name,
            } => Self::Databricks {
                generation: target.generation,
                host: host.as_str(),
                token,
                catalog: catalog_name,
            },
            EndpointDescriptor::Standalone {
                server_url,
                bearer_token,
            } => Self::Standalone {
                generation: target.generation,
                server_url: server_url.as_str(),
                bearer_token: bearer_token.as_deref(),
            },
        }
    }
}

impl EngineClient for HttpEngineClient {
    fn connect(&self, target: &EngineTarget) -> EngineFuture<'_, Box<dyn EngineConnection>> {
        let target = target.clone();
        Box::pin(async move {
            let base_url = format!("http://127.0.0.1:{}", target.port);
            debug!(port = target.port, generation = target.generation, "attaching engine");
            let response = self
                .client
                .post(format!("{base_url}/attach"))
                .json(&AttachRequest::new(&target))
                .send()
                .await
                .map_err(transport)?;
            check_status(response).await?;
            let connection: Box<dyn EngineConnection> = Box::new(HttpEngineConnection {
                client: self.client.clone(),
                query_url: format!("{base_url}/query"),
            });
            Ok(connection)
        })
    }
}

/// One attached engine.
#[derive(Debug)]
struct HttpEngineConnection {
    client: Client,
    query_url: String,
}

impl EngineConnection for HttpEngineConnection {
    fn execute(&self, statement: &Statement) -> EngineFuture<'_, ResultSet> {
        let statement = statement.clone();
        Box::pin(async move {
            let response = self
                .client
                .post(&self.query_url)
                .json(&statement)
                .send()
                .await
                .map_err(transport)?;
            let body = check_status(response).await?;
            // A malformed body may follow a statement that did run, so it is
            // not treated as retryable.
            serde_json::from_str(&body).map_err(|error| {
                EngineCallError::Rejected(format!("invalid engine response: {error}"))
            })
        })
    }
}

fn transport(error: reqwest::Error) -> EngineCallError {
    EngineCallError::Transport(error.to_string())
}

async fn check_status(response: Response) -> Result<String, EngineCallError> {
    let status = response.status();
    let body = response.text().await.map_err(transport)?;
    classify_status(status, body)
}

fn classify_status(status: StatusCode, body: String) -> Result<String, EngineCallError> {
    if status.is_success() {
        return Ok(body);
    }
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    if status.is_client_error() {
        Err(EngineCallError::Rejected(detail))
    } else {
        Err(EngineCallError::Transport(detail))
    }
}
