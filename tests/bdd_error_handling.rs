//! Behavioural tests for duckdbx error handling.
//!
//! Each scenario provokes a real failure through the public API and checks
//! the message users would see.

use std::sync::Arc;

use duckdbx::api::Duckdbx;
use duckdbx::config::{ConfigFile, ConfigParams, ConfigResolver};
use duckdbx::engine::{ContainerRuntime, ContainerStatus, LaunchSpec, RuntimeFuture};
use duckdbx::error::{ContainerError, DuckdbxError, ErrorKind};
use eyre::Report;
use mockable::MockEnv;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, scenario, then, when};

/// A container runtime with no daemon behind it.
struct NoDaemon;

impl NoDaemon {
    fn refuse<T: Send + 'static>() -> RuntimeFuture<'static, T> {
        Box::pin(async {
            Err(ContainerError::ConnectionFailed {
                message: String::from("no daemon listening"),
            })
        })
    }
}

impl ContainerRuntime for NoDaemon {
    fn ping(&self) -> RuntimeFuture<'_, ()> {
        Self::refuse()
    }

    fn ensure_image(&self, _image: &str, _pull_retries: u32) -> RuntimeFuture<'_, ()> {
        Self::refuse()
    }

    fn create_container(&self, _spec: &LaunchSpec) -> RuntimeFuture<'_, String> {
        Self::refuse()
    }

    fn start_container(&self, _id: &str) -> RuntimeFuture<'_, ()> {
        Self::refuse()
    }

    fn inspect_container(&self, _id: &str) -> RuntimeFuture<'_, ContainerStatus> {
        Self::refuse()
    }

    fn stop_container(&self, _id: &str, _grace: std::time::Duration) -> RuntimeFuture<'_, ()> {
        Self::refuse()
    }

    fn remove_container(&self, _id: &str) -> RuntimeFuture<'_, ()> {
        Self::refuse()
    }
}

/// The parts of an error a user gets to see.
#[derive(Clone, Debug)]
struct Observed {
    kind: ErrorKind,
    display: String,
    report: String,
}

impl From<DuckdbxError> for Observed {
    fn from(error: DuckdbxError) -> Self {
        let kind = error.kind();
        let display = error.to_string();
        let report = Report::from(error).to_string();
        Self {
            kind,
            display,
            report,
        }
    }
}

/// State shared across error handling scenarios.
#[derive(Default, ScenarioState)]
struct ErrorState {
    /// Parameters under test.
    params: Slot<ConfigParams>,
    /// The facade, once built.
    duckdbx: Slot<Arc<Duckdbx>>,
    /// The last failure.
    error: Slot<Observed>,
    /// Whether the last operation succeeded.
    success: Slot<bool>,
}

#[fixture]
fn error_state() -> ErrorState {
    ErrorState::default()
}

fn empty_env() -> MockEnv {
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    env
}

fn record<T>(error_state: &ErrorState, result: duckdbx::error::Result<T>) -> Option<T> {
    match result {
        Ok(value) => {
            error_state.success.set(true);
            Some(value)
        }
        Err(error) => {
            error_state.success.set(false);
            error_state.error.set(Observed::from(error));
            None
        }
    }
}

#[expect(
    clippy::expect_used,
    reason = "runtime creation failure should abort the test"
)]
fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Runtime::new()
        .expect("tokio runtime should start")
        .block_on(future)
}

#[expect(
    clippy::expect_used,
    reason = "test assertion - panic on missing state is intentional"
)]
fn built(error_state: &ErrorState) -> Arc<Duckdbx> {
    error_state.duckdbx.get().expect("engine should be built")
}

#[given("settings for a standalone sharing server")]
fn standalone_settings(error_state: &ErrorState) {
    error_state.params.set(ConfigParams {
        delta_sharing_server_url: Some(String::from("https://sharing.example.com")),
        ..ConfigParams::default()
    });
}

#[given("a port range from {start} to {end}")]
fn port_range(error_state: &ErrorState, start: u16, end: u16) {
    let mut params = error_state.params.get().unwrap_or_default();
    params.port_range_start = Some(start);
    params.port_range_end = Some(end);
    error_state.params.set(params);
}

#[given("a Databricks host {host}")]
fn databricks_host(error_state: &ErrorState, host: String) {
    let mut params = error_state.params.get().unwrap_or_default();
    params.databricks_host = Some(host);
    error_state.params.set(params);
}

#[when("the settings are resolved")]
fn settings_are_resolved(error_state: &ErrorState) {
    let params = error_state.params.get().unwrap_or_default();
    let result = ConfigResolver::resolve(&params, &empty_env(), &ConfigFile::Skip);
    record(error_state, result);
}

#[when("the engine is built")]
fn engine_is_built(error_state: &ErrorState) {
    let params = error_state.params.get().unwrap_or_default();
    let result = Duckdbx::builder()
        .params(params)
        .config_file(ConfigFile::Skip)
        .runtime(Arc::new(NoDaemon))
        .build_with_env(&empty_env());
    if let Some(duckdbx) = record(error_state, result) {
        error_state.duckdbx.set(Arc::new(duckdbx));
    }
}

#[when("the engine is started")]
fn engine_is_started(error_state: &ErrorState) {
    let duckdbx = built(error_state);
    let result = block_on(duckdbx.start());
    record(error_state, result);
}

#[when("a query is sent")]
fn query_is_sent(error_state: &ErrorState) {
    let duckdbx = built(error_state);
    let result = block_on(duckdbx.query("SELECT 1"));
    record(error_state, result);
}

#[then("the outcome is ok")]
fn outcome_is_ok(error_state: &ErrorState) {
    let Some(success) = error_state.success.get() else {
        panic!("success should be set");
    };
    assert!(
        success,
        "expected the operation to succeed, got {:?}",
        error_state.error.get()
    );
}

#[expect(
    clippy::expect_used,
    reason = "test assertion - panic on missing state is intentional"
)]
fn observed(error_state: &ErrorState) -> Observed {
    error_state.error.get().expect("an error should have been raised")
}

#[then("the error message is {expected}")]
fn error_message_is(error_state: &ErrorState, expected: String) {
    assert_eq!(observed(error_state).display, expected);
}

#[then("the report message is {expected}")]
fn report_message_is(error_state: &ErrorState, expected: String) {
    assert_eq!(observed(error_state).report, expected);
}

#[then("the error kind is {kind}")]
fn error_kind_is(error_state: &ErrorState, kind: String) {
    let expected = match kind.as_str() {
        "configuration" => ErrorKind::Configuration,
        "container" => ErrorKind::Container,
        "connection" => ErrorKind::Connection,
        other => panic!("unknown error kind '{other}'"),
    };
    assert_eq!(observed(error_state).kind, expected);
}

#[scenario(
    path = "tests/features/error_handling.feature",
    name = "Valid settings resolve without error"
)]
fn valid_settings_resolve(error_state: ErrorState) {
    let _ = error_state;
}

#[scenario(
    path = "tests/features/error_handling.feature",
    name = "An inverted port range names the offending field"
)]
fn inverted_port_range_is_reported(error_state: ErrorState) {
    let _ = error_state;
}

#[scenario(
    path = "tests/features/error_handling.feature",
    name = "Ambiguous endpoints are reported via eyre"
)]
fn ambiguous_endpoints_are_reported(error_state: ErrorState) {
    let _ = error_state;
}

#[scenario(
    path = "tests/features/error_handling.feature",
    name = "An unreachable container daemon fails the start"
)]
fn unreachable_daemon_fails_start(error_state: ErrorState) {
    let _ = error_state;
}

#[scenario(
    path = "tests/features/error_handling.feature",
    name = "Queries against a stopped engine name the supervisor state"
)]
fn queries_against_stopped_engine(error_state: ErrorState) {
    let _ = error_state;
}
