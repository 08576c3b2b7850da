//! Behavioural test helpers for connection mode resolution.

mod state;
mod steps;

pub(crate) use state::{ModeState, mode_state};
