//! Lifecycle state machine definitions
//!
//! This module provides:
//! - [`ExecutionState`] - totally ordered lifecycle states
//! - [`StateGraph`] / [`TransitionState`] - the immutable transition graph
//! - [`Outcome`] - control-flow results returned by module hooks
//! - [`Verification`] - the success / advised-empty / failure classification

mod outcome;
mod state;

pub use outcome::{Outcome, Verification};
pub use state::{Action, ExecutionState, GraphError, StateGraph, TransitionState};
