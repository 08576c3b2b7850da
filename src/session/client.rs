//! Engine query protocol: statements, results, and the client seam.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::endpoint::EndpointDescriptor;

/// Failure reported by an [`EngineClient`] or [`EngineConnection`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineCallError {
    /// The engine could not be reached or dropped the connection.
    #[error("engine transport failure: {0}")]
    Transport(String),
    /// The engine answered and rejected the request.
    #[error("engine rejected the request: {0}")]
    Rejected(String),
}

impl EngineCallError {
    /// Whether the failure concerns the connection rather than the request.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Boxed future returned by engine client seams.
pub type EngineFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EngineCallError>> + Send + 'a>>;

/// Where and as what a session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTarget {
    /// Host port the engine is published on.
    pub port: u16,
    /// Container generation the connection is bound to.
    pub generation: u64,
    /// Remote endpoint the engine attaches to.
    pub endpoint: EndpointDescriptor,
}

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// Create a statement without parameters.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Replace the positional parameters.
    #[must_use]
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Append one positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// The SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The positional parameters.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// A fully materialised query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    rows_affected: Option<u64>,
}

impl ResultSet {
    /// Build a result set from its parts.
    #[must_use]
    pub const fn new(
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        rows_affected: Option<u64>,
    ) -> Self {
        Self {
            columns,
            rows,
            rows_affected,
        }
    }

    /// Column names, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Result rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Rows changed by a DML statement, when the engine reports it.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    #[must_use]
    pub fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

/// Forward-only view over an executed statement's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    rows_affected: Option<u64>,
}

impl Cursor {
    /// Column names, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows changed by a DML statement, when the engine reports it.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Take the next row.
    pub fn fetch_one(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    /// Take up to `size` rows.
    pub fn fetch_many(&mut self, size: usize) -> Vec<Vec<Value>> {
        let take = size.min(self.rows.len());
        self.rows.drain(..take).collect()
    }

    /// Take every remaining row.
    pub fn fetch_all(&mut self) -> Vec<Vec<Value>> {
        self.rows.drain(..).collect()
    }
}

impl From<ResultSet> for Cursor {
    fn from(result: ResultSet) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows.into(),
            rows_affected: result.rows_affected,
        }
    }
}

/// Opens connections to an engine.
pub trait EngineClient: Send + Sync {
    /// Connect to the engine described by `target`.
    fn connect(&self, target: &EngineTarget) -> EngineFuture<'_, Box<dyn EngineConnection>>;
}

/// An open connection to one engine instance.
pub trait EngineConnection: Send + Sync {
    /// Run `statement` and materialise its result.
    fn execute(&self, statement: &Statement) -> EngineFuture<'_, ResultSet>;
}
