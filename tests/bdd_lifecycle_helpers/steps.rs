//! Given/when/then steps for lifecycle scenarios.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use duckdbx::api::Duckdbx;
use duckdbx::config::{ConfigFile, ConfigParams};
use duckdbx::engine::{ContainerRuntime, ContainerStatus, LaunchSpec, RuntimeFuture};
use duckdbx::error::ErrorKind;
use duckdbx::session::{
    EngineCallError, EngineClient, EngineConnection, EngineFuture, EngineTarget, ResultSet,
    Statement,
};
use duckdbx::supervisor::{LivenessProbe, ProbeFuture, ProbeStatus, SupervisorState};
use mockable::MockEnv;
use mockall::mock;
use rstest_bdd_macros::{given, then, when};
use serde_json::json;

use super::state::{Counters, LifecycleState};

pub(crate) type StepResult<T> = Result<T, String>;

mock! {
    Runtime {}

    impl ContainerRuntime for Runtime {
        fn ping(&self) -> RuntimeFuture<'_, ()>;
        fn ensure_image(&self, image: &str, pull_retries: u32) -> RuntimeFuture<'_, ()>;
        fn create_container(&self, spec: &LaunchSpec) -> RuntimeFuture<'_, String>;
        fn start_container(&self, id: &str) -> RuntimeFuture<'_, ()>;
        fn inspect_container(&self, id: &str) -> RuntimeFuture<'_, ContainerStatus>;
        fn stop_container(&self, id: &str, grace: Duration) -> RuntimeFuture<'_, ()>;
        fn remove_container(&self, id: &str) -> RuntimeFuture<'_, ()>;
    }
}

mock! {
    Probe {}

    impl LivenessProbe for Probe {
        fn probe(&self, port: u16) -> ProbeFuture<'_>;
    }
}

mock! {
    Client {}

    impl EngineClient for Client {
        fn connect(&self, target: &EngineTarget) -> EngineFuture<'_, Box<dyn EngineConnection>>;
    }
}

mock! {
    Connection {}

    impl EngineConnection for Connection {
        fn execute(&self, statement: &Statement) -> EngineFuture<'_, ResultSet>;
    }
}

fn mock_runtime(counters: &Arc<Counters>, container_exits: bool) -> MockRuntime {
    let mut runtime = MockRuntime::new();
    runtime.expect_ping().returning(|| Box::pin(async { Ok(()) }));
    runtime
        .expect_ensure_image()
        .returning(|_, _| Box::pin(async { Ok(()) }));
    runtime
        .expect_create_container()
        .returning(|spec| {
            let id = format!("{}-id", spec.name());
            Box::pin(async move { Ok(id) })
        });
    runtime
        .expect_start_container()
        .returning(|_| Box::pin(async { Ok(()) }));
    runtime.expect_inspect_container().returning(move |_| {
        Box::pin(async move {
            Ok(ContainerStatus {
                running: !container_exits,
                exit_code: container_exits.then_some(1),
            })
        })
    });
    runtime
        .expect_stop_container()
        .returning(|_, _| Box::pin(async { Ok(()) }));
    let removes = Arc::clone(counters);
    runtime.expect_remove_container().returning(move |_| {
        removes.removes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    });
    runtime
}

fn mock_client(counters: &Arc<Counters>, rejects_statements: bool) -> MockClient {
    let connects = Arc::clone(counters);
    let mut client = MockClient::new();
    client.expect_connect().returning(move |_| {
        connects.connects.fetch_add(1, Ordering::SeqCst);
        let mut connection = MockConnection::new();
        connection.expect_execute().returning(move |_| {
            let result = if rejects_statements {
                Err(EngineCallError::Rejected(String::from("Binder Error")))
            } else {
                Ok(ResultSet::new(
                    vec![String::from("answer")],
                    vec![vec![json!(42)]],
                    None,
                ))
            };
            Box::pin(async move { result })
        });
        let boxed: Box<dyn EngineConnection> = Box::new(connection);
        Box::pin(async move { Ok(boxed) })
    });
    client
}

fn free_port_range() -> StepResult<(u16, u16)> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .map_err(|error| error.to_string())?;
    let port = listener
        .local_addr()
        .map_err(|error| error.to_string())?
        .port();
    Ok((port.saturating_sub(16), port))
}

fn runtime(state: &LifecycleState) -> StepResult<Arc<tokio::runtime::Runtime>> {
    state
        .runtime
        .get()
        .ok_or_else(|| String::from("runtime should be set"))
}

fn counters(state: &LifecycleState) -> StepResult<Arc<Counters>> {
    state
        .counters
        .get()
        .ok_or_else(|| String::from("counters should be set"))
}

/// Return the facade, building it from the scenario's engine behaviour on
/// first use.
fn duckdbx(state: &LifecycleState) -> StepResult<Arc<Duckdbx>> {
    if let Some(existing) = state.duckdbx.get() {
        return Ok(existing);
    }
    let counters = counters(state)?;
    let (start, end) = free_port_range()?;
    let params = ConfigParams {
        delta_sharing_server_url: Some(String::from("https://sharing.example.com")),
        port_range_start: Some(start),
        port_range_end: Some(end),
        health_interval_ms: Some(5),
        startup_timeout_secs: Some(2),
        stop_grace_secs: Some(1),
        ..ConfigParams::default()
    };
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    let mut probe = MockProbe::new();
    probe
        .expect_probe()
        .returning(|_| Box::pin(async { Ok(ProbeStatus::Ready) }));

    let built = Duckdbx::builder()
        .params(params)
        .config_file(ConfigFile::Skip)
        .runtime(Arc::new(mock_runtime(
            &counters,
            state.container_exits.get().unwrap_or(false),
        )))
        .probe(Arc::new(probe))
        .engine_client(Arc::new(mock_client(
            &counters,
            state.rejects_statements.get().unwrap_or(false),
        )))
        .build_with_env(&env)
        .map_err(|error| error.to_string())?;
    let shared = Arc::new(built);
    state.duckdbx.set(Arc::clone(&shared));
    Ok(shared)
}

fn record<T>(state: &LifecycleState, result: duckdbx::error::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            state.last_error.set((error.kind(), error.to_string()));
            None
        }
    }
}

#[given("a mock container engine")]
fn mock_container_engine(lifecycle_state: &LifecycleState) {
    lifecycle_state.container_exits.set(false);
}

#[given("a mock container engine whose container exits during start-up")]
fn container_exits_during_start_up(lifecycle_state: &LifecycleState) {
    lifecycle_state.container_exits.set(true);
}

#[given("a mock container engine that rejects every statement")]
fn engine_rejects_statements(lifecycle_state: &LifecycleState) {
    lifecycle_state.rejects_statements.set(true);
}

#[when("the engine is started")]
fn engine_is_started(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    let result = runtime(lifecycle_state)?.block_on(facade.start());
    record(lifecycle_state, result);
    Ok(())
}

#[when("the engine is stopped")]
fn engine_is_stopped(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    let result = runtime(lifecycle_state)?.block_on(facade.stop());
    record(lifecycle_state, result);
    Ok(())
}

#[when("the engine is restarted")]
fn engine_is_restarted(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    let result = runtime(lifecycle_state)?.block_on(facade.restart());
    record(lifecycle_state, result);
    Ok(())
}

#[when("a query runs")]
fn a_query_runs(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    let result = runtime(lifecycle_state)?.block_on(facade.query("SELECT 42 AS answer"));
    if let Some(rows) = record(lifecycle_state, result) {
        lifecycle_state.rows.set(rows.len());
    }
    Ok(())
}

#[when("a query runs in a scope")]
fn a_query_runs_in_a_scope(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    let result = runtime(lifecycle_state)?.block_on(
        facade.scoped(|db| async move { db.query("SELECT 42 AS answer").await }),
    );
    if let Some(rows) = record(lifecycle_state, result) {
        lifecycle_state.rows.set(rows.len());
    }
    Ok(())
}

#[then("the engine is running")]
fn engine_is_running(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    if facade.is_running() {
        Ok(())
    } else {
        Err(format!("expected running, state is {}", facade.state()))
    }
}

#[then("the engine is stopped")]
fn engine_is_stopped_state(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let facade = duckdbx(lifecycle_state)?;
    if facade.state() == SupervisorState::Stopped {
        Ok(())
    } else {
        Err(format!("expected stopped, state is {}", facade.state()))
    }
}

#[then("the generation is {expected}")]
fn generation_is(lifecycle_state: &LifecycleState, expected: u64) -> StepResult<()> {
    let actual = duckdbx(lifecycle_state)?.generation();
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected generation {expected}, got {actual}"))
    }
}

#[then("the container was removed {expected} time")]
fn container_was_removed(lifecycle_state: &LifecycleState, expected: usize) -> StepResult<()> {
    let actual = counters(lifecycle_state)?.removes();
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} removals, got {actual}"))
    }
}

#[then("the session connected {expected} times")]
fn session_connected(lifecycle_state: &LifecycleState, expected: usize) -> StepResult<()> {
    let actual = counters(lifecycle_state)?.connects();
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} connects, got {actual}"))
    }
}

#[then("the query returned {expected} row")]
fn query_returned_rows(lifecycle_state: &LifecycleState, expected: usize) -> StepResult<()> {
    match lifecycle_state.rows.get() {
        Some(actual) if actual == expected => Ok(()),
        other => Err(format!("expected {expected} rows, got {other:?}")),
    }
}

#[then("no error was raised")]
fn no_error_was_raised(lifecycle_state: &LifecycleState) -> StepResult<()> {
    lifecycle_state
        .last_error
        .get()
        .map_or(Ok(()), |(_, message)| Err(format!("unexpected error: {message}")))
}

fn assert_failed_with(lifecycle_state: &LifecycleState, expected: ErrorKind) -> StepResult<()> {
    match lifecycle_state.last_error.get() {
        Some((kind, _)) if kind == expected => Ok(()),
        other => Err(format!("expected a {expected:?} error, got {other:?}")),
    }
}

#[then("the last operation failed with a container error")]
fn failed_with_container_error(lifecycle_state: &LifecycleState) -> StepResult<()> {
    assert_failed_with(lifecycle_state, ErrorKind::Container)
}

#[then("the last operation failed with a connection error")]
fn failed_with_connection_error(lifecycle_state: &LifecycleState) -> StepResult<()> {
    assert_failed_with(lifecycle_state, ErrorKind::Connection)
}
