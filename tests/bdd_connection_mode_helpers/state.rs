//! Scenario state for connection mode behavioural tests.

use std::sync::Arc;

use duckdbx::config::{ConfigParams, ConnectionMode};
use duckdbx::error::ErrorKind;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use tempfile::TempDir;

/// What a resolution attempt produced.
#[derive(Debug, Clone)]
pub(crate) enum ModeOutcome {
    /// An endpoint descriptor was produced.
    Resolved {
        mode: ConnectionMode,
        connection_string: String,
        token: Option<String>,
    },
    /// Resolution failed.
    Failed { kind: ErrorKind, message: String },
}

#[derive(Default, ScenarioState)]
pub(crate) struct ModeState {
    pub(crate) params: Slot<ConfigParams>,
    /// Keeps profile files alive for the scenario.
    pub(crate) profile_dir: Slot<Arc<TempDir>>,
    pub(crate) outcome: Slot<ModeOutcome>,
}

#[fixture]
pub(crate) fn mode_state() -> ModeState {
    let state = ModeState::default();
    state.params.set(ConfigParams::default());
    state
}
