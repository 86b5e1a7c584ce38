//! Engine events broadcast to subscribers.

use serde::{Deserialize, Serialize};

use stepflow_core::{Actor, ProcessId, TaskId};

/// Something that happened to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The cascade or a correction opened a task.
    TaskOpened { process_id: ProcessId, task_id: TaskId },

    TaskTakenOver {
        process_id: ProcessId,
        task_id: TaskId,
        actor: Actor,
    },

    TaskClosed { process_id: ProcessId, task_id: TaskId },

    /// A task went back to OPEN without a correction.
    TaskReturned { process_id: ProcessId, task_id: TaskId },

    /// An automatic task's script failed; the task stays OPEN.
    ScriptFailed {
        process_id: ProcessId,
        task_id: TaskId,
        reason: String,
    },

    ProblemReported {
        process_id: ProcessId,
        reporter: TaskId,
        target: TaskId,
    },

    ProblemSolved {
        process_id: ProcessId,
        from: TaskId,
        target: TaskId,
    },
}

impl EngineEvent {
    /// The process the event belongs to.
    pub fn process_id(&self) -> &ProcessId {
        match self {
            Self::TaskOpened { process_id, .. }
            | Self::TaskTakenOver { process_id, .. }
            | Self::TaskClosed { process_id, .. }
            | Self::TaskReturned { process_id, .. }
            | Self::ScriptFailed { process_id, .. }
            | Self::ProblemReported { process_id, .. }
            | Self::ProblemSolved { process_id, .. } => process_id,
        }
    }
}
