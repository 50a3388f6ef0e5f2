//! Per-run context handed to module hooks

use tokio_util::sync::CancellationToken;

use crate::checkpoint::Checkpoint;
use crate::lifecycle::Verification;

/// Context provided to module hooks during one run
///
/// The context provides:
/// - The module checkpoint, mutable by every hook
/// - The pending-work decision and the advisedly-no-data flag
/// - Cancellation detection for graceful shutdown
///
/// # Example
///
/// ```ignore
/// async fn fetch(&mut self, ctx: &mut RunContext<MyFields>) -> Result<Outcome, ModuleError> {
///     for page in 0..self.pages {
///         // Stop between requests when shutting down
///         if ctx.is_cancelled() {
///             break;
///         }
///         self.data.extend(self.client.page(page).await?);
///     }
///     ctx.checkpoint.data_elements = Some(self.data.len() as u64);
///     Ok(Outcome::Continue)
/// }
/// ```
#[derive(Debug)]
pub struct RunContext<F> {
    /// Module checkpoint, written back at STATE_SAVED
    pub checkpoint: Checkpoint<F>,

    module: String,
    pending_work: bool,
    advisedly_no_data: bool,
    cancel: CancellationToken,
}

impl<F> RunContext<F> {
    pub fn new(module: impl Into<String>, checkpoint: Checkpoint<F>, cancel: CancellationToken) -> Self {
        Self {
            checkpoint,
            module: module.into(),
            pending_work: false,
            advisedly_no_data: false,
            cancel,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Module-specific checkpoint fields
    pub fn fields(&self) -> &F {
        &self.checkpoint.fields
    }

    pub fn fields_mut(&mut self) -> &mut F {
        &mut self.checkpoint.fields
    }

    /// Whether this run has work to do
    pub fn pending_work(&self) -> bool {
        self.pending_work
    }

    pub fn set_pending_work(&mut self, pending: bool) {
        self.pending_work = pending;
    }

    /// Whether an empty fetch is expected rather than a failure
    pub fn advisedly_no_data(&self) -> bool {
        self.advisedly_no_data
    }

    pub fn set_advisedly_no_data(&mut self, advised: bool) {
        self.advisedly_no_data = advised;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Verification from the checkpoint counters and recorded error
    pub fn default_verification(&self) -> Verification {
        Verification::evaluate(
            self.checkpoint.error.is_some(),
            self.pending_work,
            self.advisedly_no_data,
            self.checkpoint.data_elements,
            self.checkpoint.inserted_elements,
        )
    }
}
