//! Core domain errors.

use thiserror::Error;

use crate::{TaskId, TaskStatus};

/// Core domain errors for stepflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Task not found in its process.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task is not in a status that allows the requested transition.
    #[error("Invalid state transition for task {task}: {from} -> {to}")]
    InvalidStateTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Unknown numeric status code.
    #[error("Unknown task status code: {0}")]
    UnknownStatusCode(u8),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
