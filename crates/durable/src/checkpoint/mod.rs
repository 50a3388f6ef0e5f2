//! Module checkpoints
//!
//! This module provides:
//! - [`Checkpoint`] - the persisted run state of one module
//! - [`CheckpointStore`] trait with [`FileCheckpointStore`] and [`InMemoryCheckpointStore`]
//! - [`restore`] / [`persist`] - typed loading with repair against a default shape
//!
//! A missing checkpoint is normal on a module's first run. A corrupt or stale
//! one is repaired from the module's declared default shape and logged as a
//! warning; it never fails the run.

mod model;
mod store;

pub use model::{Checkpoint, ErrorInfo};
pub use store::{CheckpointError, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// How a checkpoint was obtained by [`restore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// Stored checkpoint matched the declared shape
    Loaded,
    /// No checkpoint existed; the default shape was used
    Missing,
    /// Stored checkpoint lacked some fields, filled from the default shape
    Repaired { fields: Vec<String> },
    /// Stored checkpoint was unusable; the default shape was used
    Reset { reason: String },
}

/// Load the checkpoint of `module`, repairing it against `default`
///
/// Only I/O failures are returned as errors.
pub async fn restore<F>(
    store: &dyn CheckpointStore,
    module: &str,
    default: &Checkpoint<F>,
) -> Result<(Checkpoint<F>, Restored), CheckpointError>
where
    F: Serialize + DeserializeOwned + Clone,
{
    let raw = match store.read(module).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            info!(module, "no checkpoint found, starting from the default shape");
            return Ok((default.clone(), Restored::Missing));
        }
        Err(CheckpointError::Corrupt { reason, .. }) => {
            warn!(module, %reason, "corrupt checkpoint, repairing from the default shape");
            return Ok((default.clone(), Restored::Reset { reason }));
        }
        Err(e) => return Err(e),
    };

    let Value::Object(mut stored) = raw else {
        let reason = "checkpoint is not a JSON object".to_string();
        warn!(module, %reason, "stale checkpoint, repairing from the default shape");
        return Ok((default.clone(), Restored::Reset { reason }));
    };

    let mut filled = Vec::new();
    if let Value::Object(defaults) = serde_json::to_value(default)? {
        for (field, value) in defaults {
            if !stored.contains_key(&field) {
                stored.insert(field.clone(), value);
                filled.push(field);
            }
        }
    }

    match serde_json::from_value::<Checkpoint<F>>(Value::Object(stored)) {
        Ok(checkpoint) if filled.is_empty() => Ok((checkpoint, Restored::Loaded)),
        Ok(checkpoint) => {
            warn!(module, fields = ?filled, "checkpoint missing fields, filled from the default shape");
            Ok((checkpoint, Restored::Repaired { fields: filled }))
        }
        Err(e) => {
            let reason = e.to_string();
            warn!(module, %reason, "checkpoint does not match the declared shape, repairing from the default shape");
            Ok((default.clone(), Restored::Reset { reason }))
        }
    }
}

/// Serialize and write the checkpoint of `module`
pub async fn persist<F>(
    store: &dyn CheckpointStore,
    module: &str,
    checkpoint: &Checkpoint<F>,
) -> Result<(), CheckpointError>
where
    F: Serialize,
{
    let value = serde_json::to_value(checkpoint)?;
    store.write(module, &value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::TimeDelta;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Fields {
        missing_data_check: bool,
        pending: Vec<i64>,
    }

    fn default_checkpoint() -> Checkpoint<Fields> {
        Checkpoint::new(
            TimeDelta::minutes(1),
            Fields {
                missing_data_check: true,
                pending: vec![],
            },
        )
    }

    #[tokio::test]
    async fn test_missing_checkpoint_uses_default() {
        let store = InMemoryCheckpointStore::new();
        let (checkpoint, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert_eq!(how, Restored::Missing);
        assert_eq!(checkpoint, default_checkpoint());
    }

    #[tokio::test]
    async fn test_persist_then_restore() {
        let store = InMemoryCheckpointStore::new();
        let mut checkpoint = default_checkpoint();
        checkpoint.data_elements = Some(4);
        checkpoint.inserted_elements = Some(4);
        checkpoint.fields.pending = vec![3, 1];

        persist(&store, "m", &checkpoint).await.expect("should persist");
        let (restored, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert_eq!(how, Restored::Loaded);
        assert_eq!(restored, checkpoint);
    }

    #[tokio::test]
    async fn test_stale_shape_is_filled_from_default() {
        let store = InMemoryCheckpointStore::new();
        store.insert_raw(
            "m",
            json!({
                "last_request": null,
                "data_elements": 2,
                "inserted_elements": 2,
                "error": null,
                "missing_data_check": false,
                "pending": [7]
            }),
        );

        let (restored, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert_eq!(
            how,
            Restored::Repaired {
                fields: vec!["failures".to_string(), "update_frequency".to_string()]
            }
        );
        assert_eq!(restored.update_frequency, TimeDelta::minutes(1));
        assert_eq!(restored.fields.pending, vec![7]);
        assert_eq!(restored.data_elements, Some(2));
    }

    #[tokio::test]
    async fn test_mismatched_shape_resets() {
        let store = InMemoryCheckpointStore::new();
        store.insert_raw("m", json!({"pending": "not a list"}));
        let (restored, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert!(matches!(how, Restored::Reset { .. }));
        assert_eq!(restored, default_checkpoint());

        store.insert_raw("m", json!([1, 2, 3]));
        let (_, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert!(matches!(how, Restored::Reset { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_file_resets() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(store.path_for("m"), "}}garbage").expect("should write garbage");

        let (restored, how) = restore(&store, "m", &default_checkpoint()).await.expect("should restore");
        assert!(matches!(how, Restored::Reset { .. }));
        assert_eq!(restored, default_checkpoint());
    }
}
