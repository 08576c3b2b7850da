//! Behavioural test helpers for the engine lifecycle.

mod state;
mod steps;

pub(crate) use state::{LifecycleState, lifecycle_state};
