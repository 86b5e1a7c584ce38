//! Task records and their single-task transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Actor, CoreError, EditType, ProcessId, TaskId, TaskStatus};

/// Script attached to an automatic task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Display name, used to select scripts in batch runs.
    pub name: String,

    /// Command line, may contain `{processid}`, `{processtitle}`,
    /// `{taskid}` and `{tasktitle}` placeholders.
    pub command: String,
}

impl ScriptSpec {
    /// Create a new ScriptSpec.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// A unit of work within a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Human-readable name, not unique within a process.
    pub title: String,

    /// Sequence position; equal values mark parallel tasks.
    pub ordering: i32,

    /// Current processing status.
    pub status: TaskStatus,

    /// Run by a script instead of a human once opened.
    #[serde(default)]
    pub is_automatic: bool,

    /// Reopened or frozen by an open problem report.
    #[serde(default)]
    pub is_correction_flagged: bool,

    /// Takes part in cross-process batch operations.
    #[serde(default)]
    pub is_batch_eligible: bool,

    /// Closed by the engine as soon as it is opened.
    #[serde(default)]
    pub is_finish_immediately: bool,

    /// Closing runs the content checks first.
    #[serde(default)]
    pub requires_validation_on_close: bool,

    /// The task edits metadata, so a validated close checks metadata.
    #[serde(default)]
    pub edits_metadata: bool,

    /// The task produces images, so a validated close checks images.
    #[serde(default)]
    pub writes_images: bool,

    /// Script for automatic tasks.
    #[serde(default)]
    pub script: Option<ScriptSpec>,

    #[serde(default)]
    pub priority: u8,

    /// First time the task went into work. Only cleared by corrections.
    pub processing_begin_at: Option<DateTime<Utc>>,

    /// When the task was last closed.
    pub processing_end_at: Option<DateTime<Utc>>,

    /// Time of the last transition.
    pub edit_timestamp: Option<DateTime<Utc>>,

    /// How the last transition was made.
    #[serde(default)]
    pub edit_type: EditType,

    /// Who made the last transition.
    pub processing_user: Option<Actor>,

    /// Owning process.
    pub process_id: ProcessId,
}

impl Task {
    /// Create a new locked Task.
    pub fn new(process_id: ProcessId, title: impl Into<String>, ordering: i32) -> Self {
        Self {
            id: TaskId::generate(),
            title: title.into(),
            ordering,
            status: TaskStatus::Locked,
            is_automatic: false,
            is_correction_flagged: false,
            is_batch_eligible: false,
            is_finish_immediately: false,
            requires_validation_on_close: false,
            edits_metadata: false,
            writes_images: false,
            script: None,
            priority: 0,
            processing_begin_at: None,
            processing_end_at: None,
            edit_timestamp: None,
            edit_type: EditType::Unset,
            processing_user: None,
            process_id,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to make the task automatic with the given script.
    pub fn automatic(mut self, script: ScriptSpec) -> Self {
        self.is_automatic = true;
        self.script = Some(script);
        self
    }

    /// Builder method to close the task as soon as it opens.
    pub fn finish_immediately(mut self) -> Self {
        self.is_finish_immediately = true;
        self
    }

    /// Builder method to allow batch operations.
    pub fn batch_eligible(mut self) -> Self {
        self.is_batch_eligible = true;
        self
    }

    /// Builder method to require content checks on close.
    pub fn validated_on_close(mut self) -> Self {
        self.requires_validation_on_close = true;
        self
    }

    /// Builder method to mark the task as a metadata task.
    pub fn editing_metadata(mut self) -> Self {
        self.edits_metadata = true;
        self
    }

    /// Builder method to mark the task as producing images.
    pub fn writing_images(mut self) -> Self {
        self.writes_images = true;
        self
    }

    /// Returns true if `close` is currently allowed.
    pub fn can_close(&self) -> bool {
        match self.status {
            TaskStatus::Inwork => true,
            TaskStatus::Open => self.is_automatic || self.is_finish_immediately,
            _ => false,
        }
    }

    /// Returns true if the task is frozen by an open correction.
    pub fn is_correction_locked(&self) -> bool {
        self.status == TaskStatus::Locked && self.is_correction_flagged
    }

    /// Returns true if the task is the one a correction sent the process
    /// back to and it is still being worked on.
    pub fn is_correction_target(&self) -> bool {
        self.is_correction_flagged && self.status.is_current()
    }

    /// LOCKED -> OPEN for a task frozen by a correction that has since been
    /// worked off. Returns false if the task was not frozen.
    pub fn release_correction(&mut self) -> bool {
        if !self.is_correction_locked() {
            return false;
        }
        self.is_correction_flagged = false;
        self.unlock()
    }

    /// OPEN -> INWORK for the given actor.
    pub fn take_over(&mut self, actor: &Actor, edit_type: EditType) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Open, TaskStatus::Inwork)?;
        let now = Utc::now();
        self.status = TaskStatus::Inwork;
        if self.processing_begin_at.is_none() {
            self.processing_begin_at = Some(now);
        }
        self.touch(Some(actor.clone()), edit_type, now);
        Ok(())
    }

    /// Mark the task DONE. Automatic closes carry no actor.
    pub fn complete(&mut self, actor: Option<&Actor>, edit_type: EditType) -> Result<(), CoreError> {
        if !self.can_close() {
            return Err(self.invalid(TaskStatus::Done));
        }
        let now = Utc::now();
        self.status = TaskStatus::Done;
        self.processing_end_at = Some(now);
        self.touch(actor.cloned(), edit_type, now);
        Ok(())
    }

    /// LOCKED -> OPEN as done by the cascade. Returns false if the task was
    /// not locked, in which case nothing changes.
    pub fn unlock(&mut self) -> bool {
        if self.status != TaskStatus::Locked {
            return false;
        }
        self.status = TaskStatus::Open;
        self.touch(None, EditType::Automatic, Utc::now());
        true
    }

    /// Put the task back to OPEN from any status.
    pub fn reopen(&mut self, actor: &Actor, clear_begin: bool) {
        self.status = TaskStatus::Open;
        if clear_begin {
            self.processing_begin_at = None;
        }
        self.touch(Some(actor.clone()), EditType::Manual, Utc::now());
    }

    /// INWORK -> OPEN when a user hands the task back.
    pub fn give_back(&mut self, edit_type: EditType) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Inwork, TaskStatus::Open)?;
        self.status = TaskStatus::Open;
        if self.is_correction_flagged {
            self.processing_begin_at = None;
        }
        self.touch(None, edit_type, Utc::now());
        Ok(())
    }

    /// Freeze the task while a correction is open.
    pub fn lock_for_correction(&mut self, actor: &Actor) {
        self.status = TaskStatus::Locked;
        self.is_correction_flagged = true;
        self.processing_end_at = None;
        self.touch(Some(actor.clone()), EditType::Manual, Utc::now());
    }

    /// Mark the task DONE as part of a correction replay.
    pub fn replay_done(&mut self, actor: &Actor, at: DateTime<Utc>) {
        self.status = TaskStatus::Done;
        self.processing_end_at = Some(at);
        self.is_correction_flagged = false;
        self.priority = 0;
        self.touch(Some(actor.clone()), EditType::Manual, at);
    }

    /// Set a status directly as an administrative override.
    pub fn force_status(&mut self, status: TaskStatus, actor: &Actor) {
        let now = Utc::now();
        if status == TaskStatus::Inwork && self.processing_begin_at.is_none() {
            self.processing_begin_at = Some(now);
        }
        self.status = status;
        self.touch(Some(actor.clone()), EditType::Admin, now);
    }

    /// Record who changed the task, when and how.
    pub fn touch(&mut self, actor: Option<Actor>, edit_type: EditType, at: DateTime<Utc>) {
        self.processing_user = actor;
        self.edit_type = edit_type;
        self.edit_timestamp = Some(at);
    }

    fn expect_status(&self, expected: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: TaskStatus) -> CoreError {
        CoreError::InvalidStateTransition {
            task: self.id.clone(),
            from: self.status,
            to,
        }
    }
}
