//! Module coordination
//!
//! This module provides:
//! - [`ModuleRegistry`] - named factories building a runner per cycle
//! - [`Coordinator`] - runs all modules concurrently under an optional time limit
//! - [`Supervisor`] - collects runner outcomes into an [`ExecutionReport`]

mod pool;
mod registry;
mod supervisor;

pub use pool::{Coordinator, CoordinatorConfig};
pub use registry::{ModuleEnv, ModuleFactory, ModuleRegistry, RegistryError};
pub use supervisor::{ExecutionReport, ModuleReport, Supervisor, SupervisorMessage};
