//! Lifecycle engine
//!
//! The engine module provides the [`LifecycleRunner`] which drives one
//! module through the state graph, and the [`RunSummary`] it reports.

mod runner;

use std::time::Duration;

use serde::Serialize;

pub use runner::{LifecycleRunner, RunnableModule};

use crate::checkpoint::ErrorInfo;
use crate::lifecycle::{ExecutionState, Verification};

/// Result of one module run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub module: String,
    pub final_state: ExecutionState,
    /// States visited, starting with CREATED and ending with `final_state`
    pub transitions: Vec<ExecutionState>,
    pub verification: Option<Verification>,
    pub error: Option<ErrorInfo>,
    pub pending_work: bool,
    pub data_elements: Option<u64>,
    pub inserted_elements: Option<u64>,
    #[serde(with = "crate::reliability::duration_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Summary for a module that could not even be constructed
    pub fn not_started(module: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            module: module.into(),
            final_state: ExecutionState::Aborted,
            transitions: vec![ExecutionState::Created, ExecutionState::Aborted],
            verification: None,
            error: Some(error),
            pending_work: false,
            data_elements: None,
            inserted_elements: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn finished(&self) -> bool {
        self.final_state == ExecutionState::Finished
    }

    pub fn aborted(&self) -> bool {
        self.final_state == ExecutionState::Aborted
    }

    /// Finished and verified as successful
    pub fn successful(&self) -> bool {
        self.finished()
            && self
                .verification
                .as_ref()
                .is_some_and(Verification::is_successful)
    }

    /// Transition log as `CREATED -> INITIALIZED -> ...`
    pub fn path(&self) -> String {
        self.transitions
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
