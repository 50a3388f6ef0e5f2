//! Checkpoint stores
//!
//! A store persists one JSON document per module name. It does not know the
//! checkpoint shape; typed loading and repair live in [`super::restore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Error type for checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure
    #[error("checkpoint I/O error for {module}: {source}")]
    Io {
        module: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored document is not valid JSON
    #[error("checkpoint for {module} is corrupt: {reason}")]
    Corrupt { module: String, reason: String },

    /// Encoding failure
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Module name cannot be used as a file name
    #[error("invalid module name: {0:?}")]
    InvalidName(String),
}

/// Persistence for module checkpoints
///
/// Each module exclusively owns its entry; implementations must still be
/// thread-safe since modules run on separate tasks.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Read the raw checkpoint of `module`, `None` if there is none
    async fn read(&self, module: &str) -> Result<Option<Value>, CheckpointError>;

    /// Replace the checkpoint of `module`
    async fn write(&self, module: &str, checkpoint: &Value) -> Result<(), CheckpointError>;

    /// Delete the checkpoint of `module`; returns whether one existed
    async fn remove(&self, module: &str) -> Result<bool, CheckpointError>;
}

fn validate_name(module: &str) -> Result<(), CheckpointError> {
    let valid = !module.is_empty()
        && module
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidName(module.to_string()))
    }
}

// =============================================================================
// File store
// =============================================================================

/// Stores each checkpoint as `<root>/<module>.state`
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous checkpoint readable.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the checkpoint file for `module`
    pub fn path_for(&self, module: &str) -> PathBuf {
        self.root.join(format!("{module}.state"))
    }

    /// Modules with a checkpoint file under the root, sorted by name
    pub async fn stored_modules(&self) -> std::io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut modules = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(module) = name.to_str().and_then(|n| n.strip_suffix(".state")) else {
                continue;
            };
            if !module.starts_with('.') {
                modules.push(module.to_string());
            }
        }
        modules.sort();
        Ok(modules)
    }

    fn io_error(module: &str, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            module: module.to_string(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self, module: &str) -> Result<Option<Value>, CheckpointError> {
        validate_name(module)?;
        let path = self.path_for(module);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(module, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                module: module.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write(&self, module: &str, checkpoint: &Value) -> Result<(), CheckpointError> {
        validate_name(module)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Self::io_error(module, e))?;

        let path = self.path_for(module);
        let tmp = self.root.join(format!(".{module}.state.tmp"));
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::io_error(module, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::io_error(module, e))?;

        debug!(module, path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn remove(&self, module: &str) -> Result<bool, CheckpointError> {
        validate_name(module)?;
        match tokio::fs::remove_file(self.path_for(module)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(module, e)),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory checkpoint store for testing
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Value>>,
    writes: RwLock<HashMap<String, usize>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current checkpoint of `module`
    pub fn get(&self, module: &str) -> Option<Value> {
        self.checkpoints.read().get(module).cloned()
    }

    /// Seed a raw (possibly stale) checkpoint
    pub fn insert_raw(&self, module: &str, checkpoint: Value) {
        self.checkpoints
            .write()
            .insert(module.to_string(), checkpoint);
    }

    /// Number of writes performed for `module`
    pub fn write_count(&self, module: &str) -> usize {
        self.writes.read().get(module).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn read(&self, module: &str) -> Result<Option<Value>, CheckpointError> {
        validate_name(module)?;
        Ok(self.get(module))
    }

    async fn write(&self, module: &str, checkpoint: &Value) -> Result<(), CheckpointError> {
        validate_name(module)?;
        self.checkpoints
            .write()
            .insert(module.to_string(), checkpoint.clone());
        *self.writes.write().entry(module.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn remove(&self, module: &str) -> Result<bool, CheckpointError> {
        validate_name(module)?;
        Ok(self.checkpoints.write().remove(module).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_round_trip_and_remove() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let store = FileCheckpointStore::new(dir.path().join("state"));

        assert!(store.read("historical_weather").await.expect("should read").is_none());

        store
            .write("historical_weather", &json!({"data_elements": 3}))
            .await
            .expect("should write");
        let read = store
            .read("historical_weather")
            .await
            .expect("should read")
            .expect("checkpoint should exist");
        assert_eq!(read["data_elements"], json!(3));

        assert!(store.remove("historical_weather").await.expect("should remove"));
        assert!(!store.remove("historical_weather").await.expect("should remove"));
    }

    #[tokio::test]
    async fn test_file_store_lists_stored_modules() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let store = FileCheckpointStore::new(dir.path().join("state"));
        assert!(store.stored_modules().await.expect("should list").is_empty());

        for module in ["historical_weather_converter", "historical_weather"] {
            store.write(module, &json!({})).await.expect("should write");
        }
        std::fs::write(store.root().join(".historical_weather.state.tmp"), b"{}")
            .expect("should write temp file");
        std::fs::write(store.root().join("notes.txt"), b"")
            .expect("should write unrelated file");

        assert_eq!(
            store.stored_modules().await.expect("should list"),
            vec!["historical_weather", "historical_weather_converter"]
        );
    }

    #[tokio::test]
    async fn test_file_store_reports_corruption() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(store.path_for("broken"), b"{not json").expect("should write broken file");

        let result = store.read("broken").await;
        assert!(matches!(result, Err(CheckpointError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let store = InMemoryCheckpointStore::new();
        let result = store.write("../etc/passwd", &json!({})).await;
        assert!(matches!(result, Err(CheckpointError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_memory_store_counts_writes() {
        let store = InMemoryCheckpointStore::new();
        store.write("m", &json!({})).await.expect("should write");
        store.write("m", &json!({"a": 1})).await.expect("should write");
        assert_eq!(store.write_count("m"), 2);
        assert_eq!(store.get("m"), Some(json!({"a": 1})));
    }
}
