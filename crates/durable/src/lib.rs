//! # Durable Module Lifecycle
//!
//! A lifecycle engine for periodic data-collection modules that must survive
//! crashes, partial failures and restarts without losing their place.
//!
//! ## Features
//!
//! - **Explicit state graph**: every run walks the same ordered states, with a
//!   clean (compensation) state per stage and escalation to ABORTED
//! - **Persisted checkpoints**: one JSON document per module, repaired against
//!   the module's declared shape when stale or corrupt
//! - **Work-due policy**: calendar-aware update frequencies plus exponential
//!   restart backoff after failures
//! - **Concurrent cycles**: all registered modules run in parallel under an
//!   optional time limit, reporting to a single supervisor
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │  (one task per module, time limit, cancellation)            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │     LifecycleRunner      │ ───▶ │        Supervisor        │
//! │ (state graph, hooks,     │ mpsc │  (ExecutionReport)       │
//! │  clean escalation)       │      └──────────────────────────┘
//! └──────────────────────────┘
//!          │                 │
//!          ▼                 ▼
//! ┌──────────────────┐ ┌──────────────────┐
//! │ CheckpointStore  │ │  DocumentStore   │
//! │ (<module>.state) │ │  (natural keys)  │
//! └──────────────────┘ └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use climate_durable::prelude::*;
//!
//! struct Countries {
//!     documents: Arc<dyn DocumentStore>,
//!     data: Vec<(NaturalKey, Document)>,
//! }
//!
//! #[async_trait]
//! impl DataModule for Countries {
//!     type Fields = ();
//!
//!     fn name(&self) -> &str {
//!         "countries"
//!     }
//!
//!     fn default_checkpoint(&self) -> Checkpoint<()> {
//!         Checkpoint::new(TimeDelta::months(1), ())
//!     }
//!
//!     async fn fetch(&mut self, ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
//!         // ... download into self.data
//!         ctx.checkpoint.data_elements = Some(self.data.len() as u64);
//!         Ok(Outcome::Continue)
//!     }
//!
//!     async fn save(&mut self, ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
//!         let counts = self
//!             .documents
//!             .bulk_upsert("countries", std::mem::take(&mut self.data))
//!             .await?;
//!         ctx.checkpoint.inserted_elements = Some(counts.total());
//!         Ok(Outcome::Continue)
//!     }
//! }
//! ```

pub mod checkpoint;
pub mod coordinator;
pub mod engine;
pub mod lifecycle;
pub mod module;
pub mod persistence;
pub mod reliability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::checkpoint::{
        Checkpoint, CheckpointError, CheckpointStore, ErrorInfo, FileCheckpointStore,
        InMemoryCheckpointStore,
    };
    pub use crate::coordinator::{
        Coordinator, CoordinatorConfig, ExecutionReport, ModuleEnv, ModuleRegistry,
    };
    pub use crate::engine::{LifecycleRunner, RunSummary, RunnableModule};
    pub use crate::lifecycle::{ExecutionState, Outcome, Verification};
    pub use crate::module::{DataModule, ModuleError, RunContext};
    pub use crate::persistence::{
        Document, DocumentStore, Filter, InMemoryDocumentStore, KeyPart, NaturalKey, Pagination,
        StorageError, WriteCounts,
    };
    pub use crate::reliability::{BackoffPolicy, CallTimeout, TimeDelta, TimeUnit};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}

// Re-export key types at crate root
pub use checkpoint::{Checkpoint, CheckpointStore, ErrorInfo, FileCheckpointStore, InMemoryCheckpointStore};
pub use coordinator::{Coordinator, CoordinatorConfig, ExecutionReport, ModuleEnv, ModuleRegistry};
pub use engine::{LifecycleRunner, RunSummary, RunnableModule};
pub use lifecycle::{ExecutionState, Outcome, StateGraph, Verification};
pub use module::{DataModule, ModuleError, RunContext};
pub use persistence::{DocumentStore, InMemoryDocumentStore, NaturalKey, WriteCounts};
pub use reliability::{BackoffPolicy, CallTimeout, TimeDelta};
