//! Engine error taxonomy.

use thiserror::Error;

use stepflow_core::{CoreError, ProcessId, TaskId};

use crate::checks::CheckKind;
use crate::config::ConfigError;
use crate::script::ScriptError;

/// Persistence collaborator errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The task is not in the status the operation requires, typically
    /// because another actor got there first.
    #[error("Conflict on task {task}: {reason}")]
    Conflict { task: TaskId, reason: String },

    /// Closing was blocked by failing content checks. Nothing was written.
    #[error("Validation failed for task {task}: {failed:?}")]
    Validation { task: TaskId, failed: Vec<CheckKind> },

    /// A task, process or correction target could not be resolved.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Script failed for task {task}: {source}")]
    ScriptFailure {
        task: TaskId,
        #[source]
        source: ScriptError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// Returns true for errors the caller can recover from by retrying or
    /// fixing data.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Validation { .. })
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidStateTransition { task, from, to } => Self::Conflict {
                task,
                reason: format!("cannot move from {from} to {to}"),
            },
            CoreError::TaskNotFound(id) => Self::NotFound(format!("task {id}")),
            CoreError::UnknownStatusCode(code) => {
                Self::InvalidInput(format!("unknown status code {code}"))
            }
            CoreError::InvalidInput(msg) => Self::InvalidInput(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProcessNotFound(id) => Self::NotFound(format!("process {id}")),
            StoreError::TaskNotFound(id) => Self::NotFound(format!("task {id}")),
            other @ StoreError::Backend(_) => Self::Storage(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::TaskStatus;

    #[test]
    fn test_state_transition_maps_to_conflict() {
        let err: EngineError = CoreError::InvalidStateTransition {
            task: TaskId::new("t1"),
            from: TaskStatus::Inwork,
            to: TaskStatus::Inwork,
        }
        .into();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: EngineError = StoreError::ProcessNotFound(ProcessId::new("p")).into();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err: EngineError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_recoverable());
    }
}
