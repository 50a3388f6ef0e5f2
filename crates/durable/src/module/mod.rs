//! Module contract
//!
//! This module provides:
//! - [`DataModule`] trait implemented by every collector/converter
//! - [`RunContext`] passed to hooks during a run
//! - [`ModuleError`] returned by failing hooks

mod context;
mod contract;
mod error;

pub use context::RunContext;
pub use contract::DataModule;
pub use error::ModuleError;
