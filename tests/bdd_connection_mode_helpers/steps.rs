//! Given/when/then steps for connection mode scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use duckdbx::config::{ConfigFile, ConfigParams, ConfigResolver, ConnectionMode};
use duckdbx::endpoint::{ConnectionModeResolver, EndpointDescriptor};
use duckdbx::error::ErrorKind;
use mockable::MockEnv;
use rstest_bdd_macros::{given, then, when};
use tempfile::TempDir;

use super::state::{ModeOutcome, ModeState};

pub(crate) type StepResult<T> = Result<T, String>;

fn update_params(mode_state: &ModeState, update: impl FnOnce(&mut ConfigParams)) {
    let mut params = mode_state.params.get().unwrap_or_default();
    update(&mut params);
    mode_state.params.set(params);
}

fn write_profile(mode_state: &ModeState, content: &str) -> StepResult<()> {
    let dir = TempDir::new().map_err(|error| error.to_string())?;
    let path = Utf8PathBuf::try_from(dir.path().join("profile.share"))
        .map_err(|error| error.to_string())?;
    std::fs::write(&path, content).map_err(|error| error.to_string())?;
    update_params(mode_state, |params| params.profile_path = Some(path));
    mode_state.profile_dir.set(Arc::new(dir));
    Ok(())
}

fn outcome(mode_state: &ModeState) -> StepResult<ModeOutcome> {
    mode_state
        .outcome
        .get()
        .ok_or_else(|| String::from("the endpoint has not been resolved"))
}

#[given("no endpoint configuration")]
fn no_endpoint_configuration(mode_state: &ModeState) {
    mode_state.params.set(ConfigParams::default());
}

#[given("a Databricks host {host} with token {token}")]
fn databricks_host_with_token(mode_state: &ModeState, host: String, token: String) {
    update_params(mode_state, |params| {
        params.databricks_host = Some(host);
        params.databricks_token = Some(token);
    });
}

#[given("a standalone server URL {url}")]
fn standalone_server_url(mode_state: &ModeState, url: String) {
    update_params(mode_state, |params| params.delta_sharing_server_url = Some(url));
}

#[given("the connection mode is set to {mode}")]
fn connection_mode_is_set(mode_state: &ModeState, mode: ConnectionMode) {
    update_params(mode_state, |params| params.connection_mode = Some(mode));
}

#[given("a profile file with token {token}")]
fn profile_file_with_token(mode_state: &ModeState, token: String) -> StepResult<()> {
    let profile = serde_json::json!({
        "shareCredentialsVersion": 1,
        "endpoint": "https://profile.example.com/delta-sharing/",
        "bearerToken": token,
    });
    write_profile(mode_state, &profile.to_string())
}

#[given("a malformed profile file")]
fn malformed_profile_file(mode_state: &ModeState) -> StepResult<()> {
    write_profile(mode_state, "{ not json")
}

#[when("the endpoint is resolved")]
fn endpoint_is_resolved(mode_state: &ModeState) {
    let params = mode_state.params.get().unwrap_or_default();
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);

    let result = ConfigResolver::resolve(&params, &env, &ConfigFile::Skip)
        .and_then(|settings| ConnectionModeResolver::default().resolve(&settings));
    let resolved = match result {
        Ok(descriptor) => {
            let token = match &descriptor {
                EndpointDescriptor::Databricks { token, .. } => Some(token.clone()),
                EndpointDescriptor::Standalone { bearer_token, .. } => bearer_token.clone(),
            };
            ModeOutcome::Resolved {
                mode: descriptor.mode(),
                connection_string: descriptor.connection_string(),
                token,
            }
        }
        Err(error) => ModeOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        },
    };
    mode_state.outcome.set(resolved);
}

fn assert_mode(mode_state: &ModeState, expected: ConnectionMode) -> StepResult<()> {
    match outcome(mode_state)? {
        ModeOutcome::Resolved { mode, .. } if mode == expected => Ok(()),
        other => Err(format!("expected {expected} mode, got {other:?}")),
    }
}

#[then("the Databricks mode is selected")]
fn databricks_mode_is_selected(mode_state: &ModeState) -> StepResult<()> {
    assert_mode(mode_state, ConnectionMode::Databricks)
}

#[then("the standalone mode is selected")]
fn standalone_mode_is_selected(mode_state: &ModeState) -> StepResult<()> {
    assert_mode(mode_state, ConnectionMode::Standalone)
}

#[then("the endpoint token is {expected}")]
fn endpoint_token_is(mode_state: &ModeState, expected: String) -> StepResult<()> {
    match outcome(mode_state)? {
        ModeOutcome::Resolved { token, .. } if token.as_deref() == Some(expected.as_str()) => {
            Ok(())
        }
        other => Err(format!("expected token {expected}, got {other:?}")),
    }
}

#[then("the connection string is {expected}")]
fn connection_string_is(mode_state: &ModeState, expected: String) -> StepResult<()> {
    match outcome(mode_state)? {
        ModeOutcome::Resolved {
            connection_string, ..
        } if connection_string == expected => Ok(()),
        other => Err(format!("expected connection string {expected}, got {other:?}")),
    }
}

fn assert_failure(mode_state: &ModeState, expected: ErrorKind) -> StepResult<()> {
    match outcome(mode_state)? {
        ModeOutcome::Failed { kind, .. } if kind == expected => Ok(()),
        other => Err(format!("expected a {expected:?} error, got {other:?}")),
    }
}

#[then("resolution fails with a configuration error")]
fn fails_with_configuration_error(mode_state: &ModeState) -> StepResult<()> {
    assert_failure(mode_state, ErrorKind::Configuration)
}

#[then("resolution fails with a connection error")]
fn fails_with_connection_error(mode_state: &ModeState) -> StepResult<()> {
    assert_failure(mode_state, ErrorKind::Connection)
}

#[then("the error mentions {text}")]
fn error_mentions(mode_state: &ModeState, text: String) -> StepResult<()> {
    match outcome(mode_state)? {
        ModeOutcome::Failed { message, .. } if message.contains(&text) => Ok(()),
        other => Err(format!("expected an error mentioning '{text}', got {other:?}")),
    }
}
