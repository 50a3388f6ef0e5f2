//! DocumentStore trait definition

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored document
pub type Document = Map<String, Value>;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend failure (connection, write rejected, ...)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Natural key is empty or not an object
    #[error("invalid natural key: {0}")]
    InvalidKey(String),
}

/// Fields that identify a document within a collection
///
/// Writes through [`DocumentStore`] are matched on this key, which makes them
/// idempotent: writing the same key twice never creates a second document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NaturalKey(BTreeMap<String, KeyPart>);

/// Scalar part of a natural key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&KeyPart> for Value {
    fn from(part: &KeyPart) -> Self {
        match part {
            KeyPart::Int(value) => Value::from(*value),
            KeyPart::Text(value) => Value::from(value.as_str()),
        }
    }
}

impl NaturalKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<KeyPart>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &KeyPart)> {
        self.0.iter()
    }

    /// The key as a filter matching exactly this document
    pub fn to_filter(&self) -> Filter {
        Filter::And(
            self.0
                .iter()
                .map(|(field, part)| Filter::Eq(field.clone(), Value::from(part)))
                .collect(),
        )
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, part)| match part {
                KeyPart::Int(value) => format!("{field}={value}"),
                KeyPart::Text(value) => format!("{field}={value:?}"),
            })
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Counts reported by a write
///
/// Mirrors what document databases report for insert-if-absent upserts:
/// new documents are `upserted`, documents already present are `matched`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub inserted: u64,
    pub matched: u64,
    pub upserted: u64,
}

impl WriteCounts {
    /// Every document the write accounted for
    pub fn total(&self) -> u64 {
        self.inserted + self.matched + self.upserted
    }

    pub fn merge(&mut self, other: WriteCounts) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.upserted += other.upserted;
    }
}

/// Query filter over dotted field paths
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document
    All,
    Eq(String, Value),
    /// Field present and not null (`true`) or absent/null (`false`)
    Exists(String, bool),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Lt(String, Value),
    Lte(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists(field.into(), true)
    }

    /// Evaluate this filter against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, expected) => {
                lookup(document, field).is_some_and(|v| compare(v, expected) == Some(Ordering::Equal))
            }
            Self::Exists(field, wanted) => {
                let present = lookup(document, field).is_some_and(|v| !v.is_null());
                present == *wanted
            }
            Self::In(field, values) => lookup(document, field).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| compare(v, candidate) == Some(Ordering::Equal))
            }),
            Self::NotIn(field, values) => !lookup(document, field).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| compare(v, candidate) == Some(Ordering::Equal))
            }),
            Self::Lt(field, bound) => {
                lookup(document, field).is_some_and(|v| compare(v, bound) == Some(Ordering::Less))
            }
            Self::Lte(field, bound) => lookup(document, field).is_some_and(|v| {
                matches!(compare(v, bound), Some(Ordering::Less | Ordering::Equal))
            }),
            Self::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }
}

/// Resolve a dotted path (`history.dailysummary`) inside a document
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Order two JSON scalars of the same kind
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// Storage collaborator used by modules to persist what they fetch
///
/// Writes are insert-if-absent upserts matched on a [`NaturalKey`], so two
/// overlapping runs of the same module can only duplicate effort, never
/// corrupt each other's data. Implementations must be thread-safe.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert `document` under `key` unless a document with that key exists
    async fn upsert(
        &self,
        collection: &str,
        key: NaturalKey,
        document: Document,
    ) -> Result<WriteCounts, StorageError>;

    /// [`upsert`](Self::upsert) for a batch, reporting aggregated counts
    async fn bulk_upsert(
        &self,
        collection: &str,
        items: Vec<(NaturalKey, Document)>,
    ) -> Result<WriteCounts, StorageError>;

    // =========================================================================
    // Reads
    // =========================================================================

    /// First document matching `filter`
    async fn find_one(&self, collection: &str, filter: &Filter)
        -> Result<Option<Document>, StorageError>;

    /// Documents matching `filter`, in insertion order
    ///
    /// Documents inserted after a page was read land after it, so offset
    /// paging never skips them.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        page: Pagination,
    ) -> Result<Vec<Document>, StorageError>;

    /// Number of documents matching `filter`
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StorageError>;

    /// Distinct non-null values of `field` among documents matching `filter`
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> Result<Vec<Value>, StorageError>;

    /// Greatest `value_field` per distinct `group_field`
    async fn max_by_group(
        &self,
        collection: &str,
        group_field: &str,
        value_field: &str,
    ) -> Result<Vec<(Value, Value)>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_lookup_dotted_path() {
        let document = doc(json!({"history": {"dailysummary": [{"fog": "0"}]}}));
        assert_eq!(
            lookup(&document, "history.dailysummary.0.fog"),
            Some(&json!("0"))
        );
        assert_eq!(lookup(&document, "history.observations"), None);
    }

    #[test]
    fn test_filters() {
        let document = doc(json!({"location_id": 3, "wunderground_loc_id": null, "name": "Oslo"}));

        assert!(Filter::eq("location_id", 3).matches(&document));
        assert!(!Filter::exists("wunderground_loc_id").matches(&document));
        assert!(Filter::Exists("wunderground_loc_id".into(), false).matches(&document));
        assert!(Filter::In("location_id".into(), vec![json!(1), json!(3)]).matches(&document));
        assert!(!Filter::NotIn("location_id".into(), vec![json!(3)]).matches(&document));
        assert!(Filter::Lt("location_id".into(), json!(4)).matches(&document));
        assert!(Filter::Lte("location_id".into(), json!(3)).matches(&document));
        assert!(!Filter::And(vec![Filter::All, Filter::eq("name", "Lima")]).matches(&document));
    }

    #[test]
    fn test_natural_key_filter_and_display() {
        let key = NaturalKey::new()
            .with("location_id", 1)
            .with("date_utc", 1_500_000_000_000i64);
        let document = doc(json!({"location_id": 1, "date_utc": 1_500_000_000_000i64}));

        assert!(key.to_filter().matches(&document));
        assert_eq!(key.to_string(), "{date_utc=1500000000000, location_id=1}");
    }

    #[test]
    fn test_write_counts_total() {
        let mut counts = WriteCounts {
            inserted: 1,
            matched: 2,
            upserted: 3,
        };
        counts.merge(WriteCounts {
            inserted: 0,
            matched: 1,
            upserted: 0,
        });
        assert_eq!(counts.total(), 7);
    }
}
