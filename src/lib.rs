//! Ephemeral DuckDB engines wired to Delta Sharing endpoints.
//!
//! `duckdbx` provisions a short-lived, single-tenant container running a query
//! engine, attaches it to a remote Delta Sharing endpoint (Databricks-managed
//! or standalone), and tears it down deterministically on success, failure,
//! or cancellation.
//!
//! # Architecture
//!
//! Configuration is resolved once, with provenance, before anything touches
//! the container engine. The endpoint resolver turns the settings into an
//! authenticated descriptor without network I/O. The supervisor owns the
//! container through an explicit state machine and publishes every
//! transition; sessions only observe those transitions and rebind when the
//! container generation changes.
//!
//! # Modules
//!
//! - [`api`]: The [`api::Duckdbx`] facade with manual and scoped lifecycles
//! - [`config`]: Layered configuration (parameters > env > file > defaults)
//! - [`endpoint`]: Connection-mode detection and credential assembly
//! - [`engine`]: Container engine access and host port allocation
//! - [`error`]: Semantic error types for the library
//! - [`session`]: Engine sessions with generation-checked reconnection
//! - [`supervisor`]: Container lifecycle supervision and health gating

pub mod api;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod session;
pub mod supervisor;
