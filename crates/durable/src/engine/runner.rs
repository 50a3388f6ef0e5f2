//! Lifecycle runner
//!
//! The `LifecycleRunner` is responsible for:
//! - Walking the state graph from INITIALIZED to FINISHED or ABORTED
//! - Running the base behavior of each stage before the module hook
//! - Consuming `Redirect` outcomes without mutating the graph
//! - Branching to clean states on stage failure and escalating to ABORTED
//! - Leaving a checkpoint that reflects the most recent terminal attempt

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{self, CheckpointStore, ErrorInfo};
use crate::lifecycle::{Action, ExecutionState, Outcome, StateGraph, TransitionState, Verification};
use crate::module::{DataModule, ModuleError, RunContext};
use crate::reliability::{is_due_at, BackoffPolicy};

use super::RunSummary;

/// Drives one module through the lifecycle graph
///
/// # Example
///
/// ```ignore
/// use climate_durable::prelude::*;
///
/// let store = Arc::new(FileCheckpointStore::new("./state"));
/// let mut runner = LifecycleRunner::new(MyModule::new(), store)
///     .with_cancellation(shutdown.child_token());
///
/// let summary = runner.run().await;
/// if !summary.successful() {
///     warn!(module = %summary.module, "run needs attention");
/// }
/// ```
pub struct LifecycleRunner<M: DataModule> {
    module: M,
    name: String,
    store: Arc<dyn CheckpointStore>,
    graph: StateGraph,
    backoff: BackoffPolicy,
    state: ExecutionState,
    transitions: Vec<ExecutionState>,
    ctx: RunContext<M::Fields>,
    verification: Option<Verification>,
    error: Option<ErrorInfo>,
    restored: bool,
    attempted: bool,
    failure_persisted: bool,
    unpersisted_error: bool,
    elapsed: Duration,
}

impl<M: DataModule> LifecycleRunner<M> {
    /// Create a runner; the lifecycle starts at INITIALIZED
    pub fn new(module: M, store: Arc<dyn CheckpointStore>) -> Self {
        let name = module.name().to_string();
        let ctx = RunContext::new(
            name.clone(),
            module.default_checkpoint(),
            CancellationToken::new(),
        );
        Self {
            module,
            name,
            store,
            graph: StateGraph::standard(),
            backoff: BackoffPolicy::default(),
            state: ExecutionState::Initialized,
            transitions: vec![ExecutionState::Created, ExecutionState::Initialized],
            ctx,
            verification: None,
            error: None,
            restored: false,
            attempted: false,
            failure_persisted: false,
            unpersisted_error: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Stop between fetch iterations when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        let checkpoint = self.module.default_checkpoint();
        self.ctx = RunContext::new(self.name.clone(), checkpoint, token);
        self
    }

    /// Set the restart backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// States visited so far, in order
    pub fn transitions(&self) -> &[ExecutionState] {
        &self.transitions
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Checkpoint as currently held in memory
    pub fn checkpoint(&self) -> &checkpoint::Checkpoint<M::Fields> {
        &self.ctx.checkpoint
    }

    pub fn context(&self) -> &RunContext<M::Fields> {
        &self.ctx
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Run the lifecycle to FINISHED or ABORTED
    ///
    /// Never panics on module failure. Calling `run` again after a terminal
    /// state only returns the summary.
    #[instrument(skip(self), fields(module = %self.name))]
    pub async fn run(&mut self) -> RunSummary {
        if self.state.is_terminal() {
            debug!(state = %self.state, "module already ran");
            return self.summary();
        }

        let started = Instant::now();
        info!(module = %self.name, "starting module execution");

        let mut redirect: Option<ExecutionState> = None;
        while self.state > ExecutionState::Created && self.state != ExecutionState::Finished {
            let dispatch = match redirect.take() {
                Some(target) => self.graph.entering(target).cloned(),
                None => self.graph.get(self.state).cloned(),
            };
            let Some(dispatch) = dispatch else {
                error!(state = %self.state, "state is not part of the lifecycle graph");
                self.enter(ExecutionState::Aborted);
                break;
            };
            let (Some(action), Some(next)) = (dispatch.action, dispatch.next) else {
                error!(state = %dispatch.state, "state has no action to leave it");
                self.enter(ExecutionState::Aborted);
                break;
            };

            match self.invoke(action).await {
                Ok(Outcome::Redirect(target)) => match self.check_redirect(&dispatch, target) {
                    Ok(()) => {
                        debug!(from = %self.state, to = %target, "redirecting");
                        redirect = Some(target);
                    }
                    Err(e) => self.fail(&dispatch, action, e).await,
                },
                Ok(outcome) => {
                    if outcome == Outcome::BoundaryReached {
                        info!(action = %action, "history boundary reached");
                    }
                    debug!(from = %self.state, to = %next, action = %action, "transition");
                    self.enter(next);
                }
                Err(e) => self.fail(&dispatch, action, e).await,
            }
        }

        self.elapsed = started.elapsed();
        self.complete().await;
        self.summary()
    }

    fn enter(&mut self, state: ExecutionState) {
        self.state = state;
        self.transitions.push(state);
    }

    fn check_redirect(
        &self,
        dispatch: &TransitionState,
        target: ExecutionState,
    ) -> Result<(), ModuleError> {
        let invalid = || ModuleError::InvalidRedirect {
            from: dispatch.state,
            to: target,
        };
        let entering = self.graph.entering(target).ok_or_else(invalid)?;
        if target <= self.state || entering.state <= dispatch.state {
            return Err(invalid());
        }
        Ok(())
    }

    // =========================================================================
    // Stage dispatch
    // =========================================================================

    async fn invoke(&mut self, action: Action) -> Result<Outcome, ModuleError> {
        match action {
            Action::RestoreState => self.restore().await,
            Action::CheckPendingWork => self.check_pending_work().await,
            Action::Fetch => self.fetch().await,
            Action::Save => self.module.save(&mut self.ctx).await,
            Action::SaveState => {
                let outcome = self.module.save_state(&mut self.ctx).await?;
                self.write_checkpoint().await?;
                Ok(outcome)
            }
            Action::Verify => {
                let verification = self.module.verify_execution(&self.ctx).await?;
                if verification.is_successful() {
                    info!(?verification, "execution verified");
                } else {
                    warn!(?verification, "execution was not fully successful");
                }
                self.verification = Some(verification);
                Ok(Outcome::Continue)
            }
            Action::Finish => Ok(Outcome::Continue),
            Action::CleanOnFetch
            | Action::CleanOnSave
            | Action::CleanOnSaveState
            | Action::CleanOnVerify => Err(ModuleError::InvalidData(format!(
                "{action} is a clean action and cannot leave a stage"
            ))),
        }
    }

    async fn restore(&mut self) -> Result<Outcome, ModuleError> {
        let default = self.module.default_checkpoint();
        let (mut checkpoint, how) =
            checkpoint::restore(self.store.as_ref(), &self.name, &default).await?;
        checkpoint.error = None;
        if !checkpoint.counters_consistent() {
            warn!(
                data_elements = ?checkpoint.data_elements,
                inserted_elements = ?checkpoint.inserted_elements,
                "checkpoint has only one element counter, clearing both"
            );
            checkpoint.data_elements = None;
            checkpoint.inserted_elements = None;
        }
        self.ctx.checkpoint = checkpoint;
        self.restored = true;
        debug!(restored = ?how, "checkpoint restored");
        self.module.restore_state(&mut self.ctx).await
    }

    async fn check_pending_work(&mut self) -> Result<Outcome, ModuleError> {
        let now = Utc::now();
        let checkpoint = &self.ctx.checkpoint;
        let pending = if checkpoint.failures.restart_required {
            checkpoint.failures.restart_due_at(now)
        } else {
            is_due_at(checkpoint.last_request, &checkpoint.update_frequency, now)
        };
        self.ctx.set_pending_work(pending);

        let outcome = self.module.has_pending_work(&mut self.ctx).await?;
        info!(
            pending_work = self.ctx.pending_work(),
            last_request = ?self.ctx.checkpoint.last_request,
            update_frequency = %self.ctx.checkpoint.update_frequency,
            "pending work checked"
        );
        Ok(outcome)
    }

    async fn fetch(&mut self) -> Result<Outcome, ModuleError> {
        if !self.ctx.pending_work() {
            info!("no pending work, skipping to checkpoint write");
            return Ok(Outcome::skip_to_checkpoint());
        }
        if self.ctx.is_cancelled() {
            warn!("cancelled before fetch, skipping to checkpoint write");
            return Ok(Outcome::skip_to_checkpoint());
        }

        self.attempted = true;
        self.ctx.set_advisedly_no_data(false);
        self.ctx.checkpoint.last_request = Some(Utc::now());
        self.ctx.checkpoint.data_elements = Some(0);
        self.ctx.checkpoint.inserted_elements = Some(0);
        self.module.fetch(&mut self.ctx).await
    }

    async fn write_checkpoint(&mut self) -> Result<(), ModuleError> {
        let recorded = match &self.ctx.checkpoint.error {
            Some(error) if !self.failure_persisted => {
                let class = error.class.clone();
                self.ctx
                    .checkpoint
                    .failures
                    .record_failure(&class, &self.backoff, Utc::now());
                true
            }
            Some(_) => false,
            None => {
                if self.attempted {
                    self.ctx.checkpoint.failures.record_success(&self.backoff);
                }
                false
            }
        };

        debug_assert!(self.ctx.checkpoint.counters_consistent());
        checkpoint::persist(self.store.as_ref(), &self.name, &self.ctx.checkpoint).await?;
        self.unpersisted_error = false;
        if recorded {
            self.failure_persisted = true;
        }
        debug!(
            data_elements = ?self.ctx.checkpoint.data_elements,
            inserted_elements = ?self.ctx.checkpoint.inserted_elements,
            "checkpoint saved"
        );
        Ok(())
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    async fn fail(&mut self, failed: &TransitionState, action: Action, error: ModuleError) {
        let info = error.to_info();
        error!(
            state = %failed.state,
            action = %action,
            class = error.class(),
            error = %error,
            "stage failed"
        );
        if failed.state >= ExecutionState::StateRestored {
            self.ctx.checkpoint.error = Some(info.clone());
            self.unpersisted_error = true;
        }
        self.error = Some(info.clone());

        let error_state = failed.error_state;
        let clean = self.graph.get(error_state).cloned();
        self.enter(error_state);

        let Some(clean) = clean else {
            self.enter(ExecutionState::Aborted);
            return;
        };
        let (Some(clean_action), Some(resume)) = (clean.clean_action, clean.next) else {
            return;
        };

        match self.invoke_clean(clean_action, &error).await {
            Ok(()) => {
                info!(clean = %clean_action, resume = %resume, "compensation succeeded");
                self.enter(resume);
            }
            Err(clean_error) if clean_error.is_not_implemented() => {
                warn!(clean = %clean_action, "no compensation registered, aborting");
                self.enter(clean.error_state);
            }
            Err(clean_error) => {
                let proximate = clean_error.to_info().caused_by(info);
                error!(
                    clean = %clean_action,
                    error = %clean_error,
                    "compensation failed, aborting"
                );
                if failed.state >= ExecutionState::StateRestored {
                    self.ctx.checkpoint.error = Some(proximate.clone());
                    self.unpersisted_error = true;
                }
                self.error = Some(proximate);
                self.enter(clean.error_state);
            }
        }
    }

    async fn invoke_clean(&mut self, action: Action, cause: &ModuleError) -> Result<(), ModuleError> {
        match action {
            Action::CleanOnFetch => self.module.clean_on_fetch(&mut self.ctx, cause).await,
            Action::CleanOnSave => self.module.clean_on_save(&mut self.ctx, cause).await,
            Action::CleanOnSaveState => self.module.clean_on_save_state(&mut self.ctx, cause).await,
            Action::CleanOnVerify => self.module.clean_on_verify(&mut self.ctx, cause).await,
            other => Err(ModuleError::InvalidData(format!(
                "{other} is not a clean action"
            ))),
        }
    }

    // =========================================================================
    // Terminal handling
    // =========================================================================

    async fn complete(&mut self) {
        if self.state != ExecutionState::Finished && self.state != ExecutionState::Aborted {
            self.enter(ExecutionState::Aborted);
        }
        if self.transitions.last() != Some(&self.state) {
            self.transitions.push(self.state);
        }

        let path = self
            .transitions
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(" -> ");

        match self.state {
            ExecutionState::Finished => {
                if self.unpersisted_error {
                    if let Err(e) = self.write_checkpoint().await {
                        error!(error = %e, "failed to save checkpoint after compensation");
                    }
                }
                info!(
                    transitions = %path,
                    elapsed_ms = self.elapsed.as_millis() as u64,
                    "module execution finished"
                );
            }
            _ => {
                if self.ctx.checkpoint.error.is_some() {
                    self.persist_abort().await;
                }
                error!(
                    transitions = %path,
                    error = ?self.error,
                    "module execution aborted"
                );
            }
        }
    }

    /// Keep the last persisted checkpoint, updating only the error fields
    async fn persist_abort(&mut self) {
        let default = self.module.default_checkpoint();
        let mut last_good = match checkpoint::restore(self.store.as_ref(), &self.name, &default).await {
            Ok((checkpoint, _)) => checkpoint,
            Err(e) => {
                error!(error = %e, "could not reload checkpoint after abort");
                return;
            }
        };

        last_good.error = self.ctx.checkpoint.error.clone();
        if !self.failure_persisted {
            if let Some(error) = &last_good.error {
                let class = error.class.clone();
                last_good
                    .failures
                    .record_failure(&class, &self.backoff, Utc::now());
            }
        }

        match checkpoint::persist(self.store.as_ref(), &self.name, &last_good).await {
            Ok(()) => debug!("error recorded into last good checkpoint"),
            Err(e) => error!(error = %e, "could not record error into checkpoint"),
        }
    }

    /// Summary of the run so far
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            module: self.name.clone(),
            final_state: self.state,
            transitions: self.transitions.clone(),
            verification: self.verification.clone(),
            error: self.error.clone(),
            pending_work: self.ctx.pending_work(),
            data_elements: self.ctx.checkpoint.data_elements,
            inserted_elements: self.ctx.checkpoint.inserted_elements,
            elapsed: self.elapsed,
        }
    }
}

/// Type-erased runner, as held by the coordinator
#[async_trait]
pub trait RunnableModule: Send {
    fn name(&self) -> &str;

    async fn run(&mut self) -> RunSummary;
}

#[async_trait]
impl<M: DataModule> RunnableModule for LifecycleRunner<M> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> RunSummary {
        LifecycleRunner::run(self).await
    }
}
