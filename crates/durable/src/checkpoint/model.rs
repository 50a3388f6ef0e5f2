//! Checkpoint data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reliability::{FailureHistory, TimeDelta};

/// Error recorded into a checkpoint when a stage fails
///
/// When a compensation action fails too, the compensation error is recorded
/// and the stage error that triggered it is kept as `cause`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub class: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn caused_by(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The error at the bottom of the cause chain
    pub fn root_cause(&self) -> &ErrorInfo {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

/// Persisted run state of one module
///
/// Module-specific fields (`F`) are flattened into the same JSON object, so a
/// checkpoint file reads as a single flat document:
///
/// ```json
/// {
///   "last_request": "2024-03-01T10:00:00Z",
///   "update_frequency": {"value": 1, "units": "days"},
///   "data_elements": 10,
///   "inserted_elements": 10,
///   "error": null,
///   "failures": {"restart_required": false, "...": "..."},
///   "current_date": "20240227"
/// }
/// ```
///
/// `data_elements` and `inserted_elements` are either both `None` (no attempt
/// happened yet) or both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<F> {
    pub last_request: Option<DateTime<Utc>>,
    pub update_frequency: TimeDelta,
    pub data_elements: Option<u64>,
    pub inserted_elements: Option<u64>,
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub failures: FailureHistory,
    #[serde(flatten)]
    pub fields: F,
}

impl<F> Checkpoint<F> {
    /// A fresh checkpoint, as written the first time a module runs
    pub fn new(update_frequency: TimeDelta, fields: F) -> Self {
        Self {
            last_request: None,
            update_frequency,
            data_elements: None,
            inserted_elements: None,
            error: None,
            failures: FailureHistory::default(),
            fields,
        }
    }

    /// Whether a fetch attempt has been recorded
    pub fn attempted(&self) -> bool {
        self.data_elements.is_some()
    }

    /// Element counters are either both unset or both set
    pub fn counters_consistent(&self) -> bool {
        self.data_elements.is_some() == self.inserted_elements.is_some()
    }
}

impl<F: Default> Default for Checkpoint<F> {
    fn default() -> Self {
        Self::new(TimeDelta::days(1), F::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Fields {
        #[serde(default)]
        current_date: Option<String>,
    }

    #[test]
    fn test_fields_are_flattened() {
        let mut checkpoint = Checkpoint::new(TimeDelta::days(1), Fields::default());
        checkpoint.fields.current_date = Some("20240227".into());

        let value = serde_json::to_value(&checkpoint).expect("should serialize");
        assert_eq!(value["current_date"], json!("20240227"));
        assert_eq!(value["update_frequency"], json!({"value": 1, "units": "days"}));
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn test_timestamps_serialize_as_utc() {
        let mut checkpoint: Checkpoint<Fields> = Checkpoint::default();
        checkpoint.last_request = Some("2024-03-01T10:00:00Z".parse().expect("valid timestamp"));
        let value = serde_json::to_value(&checkpoint).expect("should serialize");
        assert_eq!(value["last_request"], json!("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn test_error_chain() {
        let root = ErrorInfo::new("TransportError", "connection reset");
        let error = ErrorInfo::new("StorageError", "rollback failed").caused_by(root.clone());

        assert_eq!(error.root_cause(), &root);
        assert_eq!(
            error.to_string(),
            "StorageError: rollback failed (caused by TransportError: connection reset)"
        );
    }

    #[test]
    fn test_counters_consistency() {
        let mut checkpoint: Checkpoint<Fields> = Checkpoint::default();
        assert!(checkpoint.counters_consistent());
        assert!(!checkpoint.attempted());

        checkpoint.data_elements = Some(3);
        assert!(!checkpoint.counters_consistent());
        checkpoint.inserted_elements = Some(2);
        assert!(checkpoint.counters_consistent());
    }
}
