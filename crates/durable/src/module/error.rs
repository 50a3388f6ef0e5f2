//! Errors raised by module hooks

use crate::checkpoint::{CheckpointError, ErrorInfo};
use crate::lifecycle::ExecutionState;
use crate::persistence::StorageError;
use crate::reliability::TimeoutError;

/// Error type for module hook failures
///
/// Any error returned from a stage hook sends the lifecycle to the stage's
/// clean state. `NotImplemented` is what the default clean hooks return.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Storage collaborator failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checkpoint read/write failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Network failure talking to a source
    #[error("transport error: {0}")]
    Transport(String),

    /// Guarded call timed out
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Source or stored data could not be interpreted
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Module configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// A hook redirected somewhere the graph cannot go
    #[error("invalid redirect from {from} to {to}")]
    InvalidRedirect {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// Optional hook with no implementation
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ModuleError {
    /// Stable class name recorded into checkpoints and failure counts
    pub fn class(&self) -> &'static str {
        match self {
            Self::Storage(_) => "StorageError",
            Self::Checkpoint(_) => "CheckpointError",
            Self::Transport(_) => "TransportError",
            Self::Timeout(_) => "TimeoutError",
            Self::InvalidData(_) => "InvalidDataError",
            Self::Config(_) => "ConfigError",
            Self::InvalidRedirect { .. } => "InvalidRedirectError",
            Self::NotImplemented(_) => "NotImplementedError",
            Self::Other(_) => "Error",
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }

    /// `{class, message}` form for the checkpoint
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.class(), self.to_string())
    }
}
