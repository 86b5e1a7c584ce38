//! Process history events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProcessId, Task};

/// Type of history event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventType {
    /// A task was opened by the cascade or a correction.
    TaskOpen,
    /// A task was closed.
    TaskDone,
    /// A problem was reported against a task.
    TaskError,
    /// A problem was solved.
    TaskCorrected,
}

/// An entry in a process history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Ordering of the task the event refers to.
    pub ordering: i32,
    /// Title of the task the event refers to.
    pub title: String,
    /// Type of event.
    pub event_type: HistoryEventType,
    /// Process this event belongs to.
    pub process_id: ProcessId,
}

impl HistoryEvent {
    /// Create a new history event stamped with the current time.
    pub fn new(
        ordering: i32,
        title: impl Into<String>,
        event_type: HistoryEventType,
        process_id: ProcessId,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            ordering,
            title: title.into(),
            event_type,
            process_id,
        }
    }

    /// Create an event describing the given task.
    pub fn for_task(task: &Task, event_type: HistoryEventType) -> Self {
        Self::new(task.ordering, &task.title, event_type, task.process_id.clone())
    }
}
