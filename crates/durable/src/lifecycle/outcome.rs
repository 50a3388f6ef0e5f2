//! Hook outcomes and run verification

use serde::{Deserialize, Serialize};

use super::state::ExecutionState;

/// What a hook asks the lifecycle to do next
///
/// Hooks signal control flow through this value instead of through errors;
/// errors are reserved for genuine stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed to the next state of the graph
    Continue,
    /// Skip ahead, running the action that enters `target`
    Redirect(ExecutionState),
    /// The source has no older data for the current entity; proceed normally
    BoundaryReached,
}

impl Outcome {
    /// Skip straight to the checkpoint write
    pub fn skip_to_checkpoint() -> Self {
        Self::Redirect(ExecutionState::StateSaved)
    }
}

/// Result of verifying a run
///
/// Distinguishes "advisedly nothing to do" from genuine partial failure so
/// supervisors only alert on the latter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    /// Everything fetched was stored
    Success,
    /// Nothing was fetched, and that is expected (rate limit, no entities, ...)
    AdvisedlyEmpty,
    /// Some but not all fetched elements were stored
    PartialFailure { expected: u64, saved: u64 },
    /// The run failed
    Failure { reason: String },
}

impl Verification {
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::AdvisedlyEmpty)
    }

    /// Classify a run from its counters
    pub fn evaluate(
        failed: bool,
        pending_work: bool,
        advisedly_no_data: bool,
        data_elements: Option<u64>,
        inserted_elements: Option<u64>,
    ) -> Self {
        if failed {
            return Self::Failure {
                reason: "an error was recorded during the run".to_string(),
            };
        }
        if !pending_work {
            return Self::Success;
        }
        let data = data_elements.unwrap_or(0);
        let saved = inserted_elements.unwrap_or(0);
        if data == saved {
            if data == 0 && advisedly_no_data {
                Self::AdvisedlyEmpty
            } else {
                Self::Success
            }
        } else if saved == 0 {
            Self::Failure {
                reason: format!("none of the {data} fetched elements were saved"),
            }
        } else {
            Self::PartialFailure {
                expected: data,
                saved,
            }
        }
    }
}
