//! In-memory implementation of DocumentStore for testing

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::store::*;

/// Documents in insertion order, indexed by natural key
#[derive(Default)]
struct Collection {
    keys: BTreeSet<NaturalKey>,
    documents: Vec<Document>,
}

impl Collection {
    fn len(&self) -> usize {
        self.documents.len()
    }

    fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }
}

/// In-memory implementation of DocumentStore
///
/// This is primarily for testing and local runs. It provides the same
/// insert-if-absent semantics a document database gives with `$setOnInsert`
/// upserts, and returns documents in insertion order like a natural-order
/// scan.
///
/// # Example
///
/// ```
/// use climate_durable::InMemoryDocumentStore;
///
/// let store = InMemoryDocumentStore::new();
/// assert_eq!(store.len("locations"), 0);
/// ```
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    fail_writes: AtomicBool,
}

impl InMemoryDocumentStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Make every subsequent write fail with a backend error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Snapshot of a collection in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.collections.write().clear();
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::Backend("writes are disabled".to_string()));
        }
        Ok(())
    }

    fn upsert_one(collection: &mut Collection, key: NaturalKey, mut document: Document) -> WriteCounts {
        if collection.keys.contains(&key) {
            return WriteCounts {
                matched: 1,
                ..Default::default()
            };
        }
        for (field, part) in key.fields() {
            document.insert(field.clone(), Value::from(part));
        }
        collection.keys.insert(key);
        collection.documents.push(document);
        WriteCounts {
            upserted: 1,
            ..Default::default()
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        key: NaturalKey,
        document: Document,
    ) -> Result<WriteCounts, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("natural key has no fields".into()));
        }
        self.check_writable()?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        Ok(Self::upsert_one(target, key, document))
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        items: Vec<(NaturalKey, Document)>,
    ) -> Result<WriteCounts, StorageError> {
        if items.iter().any(|(key, _)| key.is_empty()) {
            return Err(StorageError::InvalidKey("natural key has no fields".into()));
        }
        self.check_writable()?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let mut counts = WriteCounts::default();
        for (key, document) in items {
            counts.merge(Self::upsert_one(target, key, document));
        }
        Ok(counts)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        page: Pagination,
    ) -> Result<Vec<Document>, StorageError> {
        let collections = self.collections.read();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(documents
            .iter()
            .filter(|d| filter.matches(d))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> Result<Vec<Value>, StorageError> {
        let collections = self.collections.read();
        let mut values: Vec<Value> = Vec::new();
        if let Some(documents) = collections.get(collection) {
            for document in documents.iter().filter(|d| filter.matches(d)) {
                if let Some(value) = lookup(document, field).filter(|v| !v.is_null()) {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    async fn max_by_group(
        &self,
        collection: &str,
        group_field: &str,
        value_field: &str,
    ) -> Result<Vec<(Value, Value)>, StorageError> {
        let collections = self.collections.read();
        let mut groups: Vec<(Value, Value)> = Vec::new();
        let Some(documents) = collections.get(collection) else {
            return Ok(groups);
        };
        for document in documents.iter() {
            let (Some(group), Some(value)) =
                (lookup(document, group_field), lookup(document, value_field))
            else {
                continue;
            };
            match groups.iter_mut().find(|(g, _)| g == group) {
                Some((_, max)) => {
                    if compare(value, max) == Some(std::cmp::Ordering::Greater) {
                        *max = value.clone();
                    }
                }
                None => groups.push((group.clone(), value.clone())),
            }
        }
        Ok(groups)
    }
}
