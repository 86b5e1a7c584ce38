//! The Process aggregate: an ordered set of tasks plus derived status.

use serde::{Deserialize, Serialize};

use crate::{BatchId, CoreError, ProcessId, Progress, Task, TaskId, TaskStatus};

/// A workflow instance owning its tasks.
///
/// The task list is fixed at creation and kept sorted by ordering. Tasks
/// are only changed through the engine, which takes the process lock first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Unique process identifier.
    pub id: ProcessId,

    /// Human-readable title.
    pub title: String,

    /// Links sibling processes handled together.
    pub batch_id: Option<BatchId>,

    tasks: Vec<Task>,

    /// Derived from task statuses after every transition.
    pub progress: Progress,

    /// Number of images last seen for this process.
    pub image_count: Option<u32>,
}

impl Process {
    /// Create a process from its tasks. The lowest ordering group starts
    /// OPEN, everything else LOCKED.
    pub fn new(title: impl Into<String>, tasks: Vec<Task>) -> Result<Self, CoreError> {
        Self::with_id(ProcessId::generate(), title, tasks)
    }

    /// Create a process with a specific ID.
    pub fn with_id(
        id: ProcessId,
        title: impl Into<String>,
        mut tasks: Vec<Task>,
    ) -> Result<Self, CoreError> {
        for (i, task) in tasks.iter().enumerate() {
            if tasks[..i].iter().any(|other| other.id == task.id) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
        }

        tasks.sort_by_key(|t| t.ordering);
        let first = tasks.first().map(|t| t.ordering);
        for task in &mut tasks {
            task.process_id = id.clone();
            task.status = if Some(task.ordering) == first {
                TaskStatus::Open
            } else {
                TaskStatus::Locked
            };
        }

        let progress = Progress::of(&tasks);
        Ok(Self {
            id,
            title: title.into(),
            batch_id: None,
            tasks,
            progress,
            image_count: None,
        })
    }

    /// Builder method to put the process into a batch.
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// All tasks in ordering order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Mutable access to all tasks; the order must not be changed.
    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Look up a task by id for mutation.
    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Look up a task by id or fail.
    pub fn require_task(&self, id: &TaskId) -> Result<&Task, CoreError> {
        self.task(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))
    }

    /// Look up a task by id for mutation or fail.
    pub fn require_task_mut(&mut self, id: &TaskId) -> Result<&mut Task, CoreError> {
        self.task_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.clone()))
    }

    /// Replace the stored copy of a task with the same id.
    pub fn replace_task(&mut self, task: Task) -> Result<(), CoreError> {
        let slot = self
            .task_mut(&task.id)
            .ok_or_else(|| CoreError::TaskNotFound(task.id.clone()))?;
        if slot.ordering != task.ordering {
            return Err(CoreError::InvalidInput(format!(
                "task {} cannot change ordering",
                task.id
            )));
        }
        *slot = task;
        Ok(())
    }

    /// Tasks at exactly the given ordering.
    pub fn tasks_at(&self, ordering: i32) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.ordering == ordering)
    }

    /// Tasks that are OPEN or INWORK.
    pub fn current_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status.is_current())
    }

    /// The highest ordering strictly below the given one.
    pub fn previous_ordering(&self, ordering: i32) -> Option<i32> {
        self.tasks
            .iter()
            .map(|t| t.ordering)
            .filter(|o| *o < ordering)
            .max()
    }

    /// The smallest ordering among tasks that are not DONE.
    pub fn frontier(&self) -> Option<i32> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Done)
            .map(|t| t.ordering)
            .min()
    }

    /// The highest ordering whose tasks include a DONE one.
    pub fn last_done_ordering(&self) -> Option<i32> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.ordering)
            .max()
    }

    /// The task with the given title closest below `ordering`.
    pub fn nearest_before(&self, title: &str, ordering: i32) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.title == title && t.ordering < ordering)
            .max_by_key(|t| t.ordering)
    }

    /// The task with the given title closest above `ordering`.
    pub fn nearest_after(&self, title: &str, ordering: i32) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.title == title && t.ordering > ordering)
            .min_by_key(|t| t.ordering)
    }

    /// Returns true while a correction target at or below `ordering` is
    /// still OPEN or INWORK.
    pub fn correction_pending_up_to(&self, ordering: i32) -> bool {
        self.tasks
            .iter()
            .any(|t| t.ordering <= ordering && t.is_correction_target())
    }

    /// Returns true while any task is flagged by an open correction.
    pub fn has_open_correction(&self) -> bool {
        self.tasks.iter().any(|t| t.is_correction_locked())
    }

    /// Recompute the derived progress.
    pub fn refresh_progress(&mut self) -> Progress {
        self.progress = Progress::of(&self.tasks);
        self.progress
    }
}
