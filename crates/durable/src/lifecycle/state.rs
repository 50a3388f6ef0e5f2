//! Execution states and the transition graph

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A state of the module lifecycle
///
/// States compare by their ordinal, so clean states slot between the stage
/// states they compensate without disturbing comparisons. `Aborted` sorts
/// below `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Aborted,
    Created,
    Initialized,
    StateRestored,
    PendingWorkChecked,
    DataFetched,
    CleanOnFetch,
    DataSaved,
    CleanOnSave,
    StateSaved,
    CleanOnSaveState,
    ExecutionVerified,
    CleanOnVerify,
    Finished,
}

impl ExecutionState {
    /// Every state, in ordinal order
    pub const ALL: [ExecutionState; 14] = [
        Self::Aborted,
        Self::Created,
        Self::Initialized,
        Self::StateRestored,
        Self::PendingWorkChecked,
        Self::DataFetched,
        Self::CleanOnFetch,
        Self::DataSaved,
        Self::CleanOnSave,
        Self::StateSaved,
        Self::CleanOnSaveState,
        Self::ExecutionVerified,
        Self::CleanOnVerify,
        Self::Finished,
    ];

    /// Position in the total order
    pub const fn order(self) -> i32 {
        match self {
            Self::Aborted => -1,
            Self::Created => 0,
            Self::Initialized => 10,
            Self::StateRestored => 20,
            Self::PendingWorkChecked => 30,
            Self::DataFetched => 40,
            Self::CleanOnFetch => 45,
            Self::DataSaved => 50,
            Self::CleanOnSave => 55,
            Self::StateSaved => 60,
            Self::CleanOnSaveState => 65,
            Self::ExecutionVerified => 70,
            Self::CleanOnVerify => 75,
            Self::Finished => 80,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Aborted => "ABORTED",
            Self::Created => "CREATED",
            Self::Initialized => "INITIALIZED",
            Self::StateRestored => "STATE_RESTORED",
            Self::PendingWorkChecked => "PENDING_WORK_CHECKED",
            Self::DataFetched => "DATA_FETCHED",
            Self::CleanOnFetch => "CLEAN_ON_FETCH",
            Self::DataSaved => "DATA_SAVED",
            Self::CleanOnSave => "CLEAN_ON_SAVE",
            Self::StateSaved => "STATE_SAVED",
            Self::CleanOnSaveState => "CLEAN_ON_SAVE_STATE",
            Self::ExecutionVerified => "EXECUTION_VERIFIED",
            Self::CleanOnVerify => "CLEAN_ON_VERIFY",
            Self::Finished => "FINISHED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    pub fn is_clean(self) -> bool {
        matches!(
            self,
            Self::CleanOnFetch | Self::CleanOnSave | Self::CleanOnSaveState | Self::CleanOnVerify
        )
    }
}

impl PartialOrd for ExecutionState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExecutionState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order().cmp(&other.order())
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work performed to leave a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    RestoreState,
    CheckPendingWork,
    Fetch,
    Save,
    SaveState,
    Verify,
    Finish,
    CleanOnFetch,
    CleanOnSave,
    CleanOnSaveState,
    CleanOnVerify,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RestoreState => "restore_state",
            Self::CheckPendingWork => "has_pending_work",
            Self::Fetch => "fetch",
            Self::Save => "save",
            Self::SaveState => "save_state",
            Self::Verify => "verify_execution",
            Self::Finish => "finish",
            Self::CleanOnFetch => "clean_on_fetch",
            Self::CleanOnSave => "clean_on_save",
            Self::CleanOnSaveState => "clean_on_save_state",
            Self::CleanOnVerify => "clean_on_verify",
        };
        f.write_str(name)
    }
}

/// A node of the lifecycle graph
///
/// `action` runs to leave the state; on success the lifecycle moves to `next`,
/// on failure to `error_state`. Clean states carry a `clean_action` that runs
/// on entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionState {
    pub state: ExecutionState,
    pub action: Option<Action>,
    pub next: Option<ExecutionState>,
    pub error_state: ExecutionState,
    pub clean_action: Option<Action>,
}

impl TransitionState {
    fn stage(
        state: ExecutionState,
        action: Option<Action>,
        next: ExecutionState,
        error_state: ExecutionState,
    ) -> Self {
        Self {
            state,
            action,
            next: Some(next),
            error_state,
            clean_action: None,
        }
    }

    fn clean(state: ExecutionState, clean_action: Action, next: ExecutionState) -> Self {
        Self {
            state,
            action: None,
            next: Some(next),
            error_state: ExecutionState::Aborted,
            clean_action: Some(clean_action),
        }
    }

    fn terminal(state: ExecutionState) -> Self {
        Self {
            state,
            action: None,
            next: None,
            error_state: ExecutionState::Aborted,
            clean_action: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.name()
    }
}

/// Graph validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("state {0} is referenced but not defined")]
    Undefined(ExecutionState),

    #[error("graph has no start state CREATED")]
    MissingStart,

    #[error("terminal state {0} must not have an action or successor")]
    NonTerminal(ExecutionState),

    #[error("clean state {0} has no clean action")]
    MissingCleanAction(ExecutionState),

    #[error("state {0} moves backwards to {1}")]
    Backwards(ExecutionState, ExecutionState),
}

/// Immutable lifecycle graph
#[derive(Debug, Clone)]
pub struct StateGraph {
    states: BTreeMap<ExecutionState, TransitionState>,
}

impl StateGraph {
    /// The graph every module runs through
    ///
    /// ```text
    /// CREATED -> INITIALIZED -> STATE_RESTORED -> PENDING_WORK_CHECKED
    ///   -> DATA_FETCHED -> DATA_SAVED -> STATE_SAVED -> EXECUTION_VERIFIED -> FINISHED
    ///
    /// fetch fails       -> CLEAN_ON_FETCH      -> DATA_FETCHED
    /// save fails        -> CLEAN_ON_SAVE       -> DATA_SAVED
    /// save_state fails  -> CLEAN_ON_SAVE_STATE -> STATE_SAVED
    /// verify fails      -> CLEAN_ON_VERIFY     -> EXECUTION_VERIFIED
    /// anything else / failed clean -> ABORTED
    /// ```
    pub fn standard() -> Self {
        use Action as A;
        use ExecutionState as S;

        let states = [
            TransitionState::stage(S::Created, None, S::Initialized, S::Aborted),
            TransitionState::stage(S::Initialized, Some(A::RestoreState), S::StateRestored, S::Aborted),
            TransitionState::stage(
                S::StateRestored,
                Some(A::CheckPendingWork),
                S::PendingWorkChecked,
                S::Aborted,
            ),
            TransitionState::stage(S::PendingWorkChecked, Some(A::Fetch), S::DataFetched, S::CleanOnFetch),
            TransitionState::stage(S::DataFetched, Some(A::Save), S::DataSaved, S::CleanOnSave),
            TransitionState::stage(S::DataSaved, Some(A::SaveState), S::StateSaved, S::CleanOnSaveState),
            TransitionState::stage(S::StateSaved, Some(A::Verify), S::ExecutionVerified, S::CleanOnVerify),
            TransitionState::stage(S::ExecutionVerified, Some(A::Finish), S::Finished, S::Aborted),
            TransitionState::clean(S::CleanOnFetch, A::CleanOnFetch, S::DataFetched),
            TransitionState::clean(S::CleanOnSave, A::CleanOnSave, S::DataSaved),
            TransitionState::clean(S::CleanOnSaveState, A::CleanOnSaveState, S::StateSaved),
            TransitionState::clean(S::CleanOnVerify, A::CleanOnVerify, S::ExecutionVerified),
            TransitionState::terminal(S::Finished),
            TransitionState::terminal(S::Aborted),
        ];

        Self {
            states: states.into_iter().map(|t| (t.state, t)).collect(),
        }
    }

    pub fn get(&self, state: ExecutionState) -> Option<&TransitionState> {
        self.states.get(&state)
    }

    /// The stage state whose action leads into `target`
    pub fn entering(&self, target: ExecutionState) -> Option<&TransitionState> {
        self.states
            .values()
            .find(|t| !t.state.is_clean() && t.action.is_some() && t.next == Some(target))
    }

    pub fn states(&self) -> impl Iterator<Item = &TransitionState> {
        self.states.values()
    }

    /// Check the graph is well formed
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.states.contains_key(&ExecutionState::Created) {
            return Err(GraphError::MissingStart);
        }
        for transition in self.states.values() {
            let state = transition.state;
            if state.is_terminal() {
                if transition.action.is_some() || transition.next.is_some() {
                    return Err(GraphError::NonTerminal(state));
                }
                continue;
            }
            if state.is_clean() && transition.clean_action.is_none() {
                return Err(GraphError::MissingCleanAction(state));
            }
            for referenced in transition.next.iter().chain([&transition.error_state]) {
                if !self.states.contains_key(referenced) {
                    return Err(GraphError::Undefined(*referenced));
                }
            }
            if let Some(next) = transition.next {
                if next <= state && !state.is_clean() {
                    return Err(GraphError::Backwards(state, next));
                }
            }
        }
        Ok(())
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::standard()
    }
}
