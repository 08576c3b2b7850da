//! Scenario state for lifecycle behavioural tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use duckdbx::api::Duckdbx;
use duckdbx::error::ErrorKind;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;

/// Engine calls observed during a scenario.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) removes: AtomicUsize,
    pub(crate) connects: AtomicUsize,
}

impl Counters {
    pub(crate) fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[derive(Default, ScenarioState)]
pub(crate) struct LifecycleState {
    pub(crate) runtime: Slot<Arc<tokio::runtime::Runtime>>,
    pub(crate) counters: Slot<Arc<Counters>>,
    pub(crate) container_exits: Slot<bool>,
    pub(crate) rejects_statements: Slot<bool>,
    pub(crate) duckdbx: Slot<Arc<Duckdbx>>,
    pub(crate) last_error: Slot<(ErrorKind, String)>,
    pub(crate) rows: Slot<usize>,
}

#[fixture]
#[expect(clippy::expect_used, reason = "fixture setup failure should abort the test")]
pub(crate) fn lifecycle_state() -> LifecycleState {
    let state = LifecycleState::default();
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime should start");
    state.runtime.set(Arc::new(runtime));
    state.counters.set(Arc::new(Counters::default()));
    state.container_exits.set(false);
    state.rejects_statements.set(false);
    state
}
