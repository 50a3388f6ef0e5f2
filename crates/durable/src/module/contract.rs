//! DataModule trait definition

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::{ModuleError, RunContext};
use crate::checkpoint::Checkpoint;
use crate::lifecycle::{Outcome, Verification};

/// A collector or converter driven by the lifecycle runner
///
/// The runner owns the base behavior of every stage (checkpoint restore and
/// repair, the work-due decision, the checkpoint write) and calls the
/// matching hook after it:
///
/// | state left             | base behavior                         | hook                 |
/// |------------------------|---------------------------------------|----------------------|
/// | INITIALIZED            | load + repair checkpoint, clear error | `restore_state`      |
/// | STATE_RESTORED         | work-due policy with restart backoff  | `has_pending_work`   |
/// | PENDING_WORK_CHECKED   | skip when no work or cancelled        | `fetch`              |
/// | DATA_FETCHED           |                                       | `save`               |
/// | DATA_SAVED             | write checkpoint after the hook       | `save_state`         |
/// | STATE_SAVED            |                                       | `verify_execution`   |
///
/// Stage failures go to the matching `clean_on_*` hook. The defaults report
/// `NotImplemented`, which aborts the run.
///
/// # Example
///
/// ```ignore
/// use climate_durable::prelude::*;
///
/// struct Countries { store: Arc<dyn DocumentStore>, data: Vec<(NaturalKey, Document)> }
///
/// #[async_trait]
/// impl DataModule for Countries {
///     type Fields = ();
///
///     fn name(&self) -> &str { "countries" }
///
///     fn default_checkpoint(&self) -> Checkpoint<()> {
///         Checkpoint::new(TimeDelta::months(1), ())
///     }
///
///     async fn fetch(&mut self, ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
///         self.data = download().await?;
///         ctx.checkpoint.data_elements = Some(self.data.len() as u64);
///         Ok(Outcome::Continue)
///     }
///
///     async fn save(&mut self, ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
///         let counts = self.store.bulk_upsert("countries", std::mem::take(&mut self.data)).await?;
///         ctx.checkpoint.inserted_elements = Some(counts.total());
///         Ok(Outcome::Continue)
///     }
/// }
/// ```
#[async_trait]
pub trait DataModule: Send + 'static {
    /// Module-specific checkpoint fields
    type Fields: Serialize + DeserializeOwned + Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// Unique module name, also the checkpoint identity
    fn name(&self) -> &str;

    /// Shape used on first run and to repair stale checkpoints
    fn default_checkpoint(&self) -> Checkpoint<Self::Fields>;

    /// Adjust the freshly restored checkpoint
    async fn restore_state(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
    ) -> Result<Outcome, ModuleError> {
        Ok(Outcome::Continue)
    }

    /// Override the work-due decision (`ctx.set_pending_work`)
    async fn has_pending_work(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
    ) -> Result<Outcome, ModuleError> {
        Ok(Outcome::Continue)
    }

    /// Fetch or convert data into memory, setting `data_elements`
    async fn fetch(&mut self, ctx: &mut RunContext<Self::Fields>) -> Result<Outcome, ModuleError>;

    /// Persist what `fetch` produced, setting `inserted_elements`
    ///
    /// Must accept an empty result, and should drop the in-memory result on
    /// success.
    async fn save(&mut self, ctx: &mut RunContext<Self::Fields>) -> Result<Outcome, ModuleError>;

    /// Last changes to the checkpoint before it is written
    async fn save_state(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
    ) -> Result<Outcome, ModuleError> {
        Ok(Outcome::Continue)
    }

    /// Decide whether the run counts as successful
    async fn verify_execution(
        &mut self,
        ctx: &RunContext<Self::Fields>,
    ) -> Result<Verification, ModuleError> {
        Ok(ctx.default_verification())
    }

    /// Compensate a failed `fetch`
    async fn clean_on_fetch(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
        _cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        Err(ModuleError::NotImplemented("clean_on_fetch"))
    }

    /// Compensate a failed `save`
    async fn clean_on_save(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
        _cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        Err(ModuleError::NotImplemented("clean_on_save"))
    }

    /// Compensate a failed checkpoint write
    async fn clean_on_save_state(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
        _cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        Err(ModuleError::NotImplemented("clean_on_save_state"))
    }

    /// Compensate a failed verification
    async fn clean_on_verify(
        &mut self,
        _ctx: &mut RunContext<Self::Fields>,
        _cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        Err(ModuleError::NotImplemented("clean_on_verify"))
    }
}
