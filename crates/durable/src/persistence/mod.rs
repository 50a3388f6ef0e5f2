//! Persistence layer for fetched data
//!
//! This module provides:
//! - [`DocumentStore`] trait, the storage collaborator modules write through
//! - [`InMemoryDocumentStore`] for testing and local runs

mod memory;
mod store;

pub use memory::InMemoryDocumentStore;
pub use store::{
    compare, lookup, Document, DocumentStore, Filter, KeyPart, NaturalKey, Pagination,
    StorageError, WriteCounts,
};
