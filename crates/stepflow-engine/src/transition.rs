//! Single-task transitions and administrative status stepping.

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use stepflow_core::{Actor, EditType, Process, ProcessId, Progress, Task, TaskId, TaskStatus};

use crate::cascade;
use crate::checks::run_close_checks;
use crate::engine::{Effects, Engine};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;

/// How a close was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// A user closing a task, alone or as part of a batch.
    Manual(EditType),
    /// The automatic worker after a successful script run. Only closes a
    /// task still held by the system actor.
    Automatic,
    /// Administrative override; content checks are skipped.
    Admin,
}

impl CloseMode {
    fn edit_type(&self) -> EditType {
        match self {
            Self::Manual(edit_type) => *edit_type,
            Self::Automatic => EditType::Automatic,
            Self::Admin => EditType::Admin,
        }
    }

    fn validates(&self) -> bool {
        !matches!(self, Self::Admin)
    }
}

/// Result of a successful close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseReport {
    /// The closed task.
    pub task: Task,
    /// Tasks opened by the cascade.
    pub opened: Vec<TaskId>,
    /// Finish-immediately tasks the cascade closed along the way.
    pub closed: Vec<TaskId>,
    /// Automatic tasks handed to the background worker.
    pub dispatched: Vec<TaskId>,
    pub progress: Progress,
}

impl Engine {
    /// OPEN -> INWORK. The only place double assignment is prevented: a
    /// caller losing the race gets [`EngineError::Conflict`].
    pub async fn take_over(&self, task: &TaskId, actor: &Actor) -> EngineResult<Task> {
        self.take_over_as(task, actor, EditType::Manual).await
    }

    pub(crate) async fn take_over_as(
        &self,
        task_id: &TaskId,
        actor: &Actor,
        edit_type: EditType,
    ) -> EngineResult<Task> {
        let process_id = self.process_of(task_id).await?;
        let _guard = self.lock(&process_id).await;
        let mut process = self.inner.store.load_process(&process_id).await?;

        let task = process.require_task_mut(task_id)?;
        if let Err(err) = task.take_over(actor, edit_type) {
            warn!(task_id = %task_id, actor = %actor, status = %task.status, "Take over rejected");
            return Err(err.into());
        }
        let task = task.clone();

        let mut effects = Effects::default();
        effects.events.push(EngineEvent::TaskTakenOver {
            process_id: process_id.clone(),
            task_id: task_id.clone(),
            actor: actor.clone(),
        });
        self.inner.store.save_task(&task).await?;
        self.commit(&mut process, &mut effects).await?;

        info!(task_id = %task_id, process_id = %process_id, actor = %actor, "Task taken over");
        Ok(task)
    }

    /// Close a task and advance its process.
    ///
    /// INWORK tasks close for anyone; OPEN tasks only when automatic or
    /// finish-immediately. Failing content checks abort the close with
    /// [`EngineError::Validation`] and nothing is written.
    pub async fn close(&self, task: &TaskId, actor: &Actor) -> EngineResult<CloseReport> {
        self.close_with(task, Some(actor), CloseMode::Manual(EditType::Manual))
            .await
    }

    pub(crate) async fn close_with(
        &self,
        task_id: &TaskId,
        actor: Option<&Actor>,
        mode: CloseMode,
    ) -> EngineResult<CloseReport> {
        let process_id = self.process_of(task_id).await?;
        let (report, jobs) = {
            let _guard = self.lock(&process_id).await;
            let mut process = self.inner.store.load_process(&process_id).await?;
            let mut effects = Effects::default();

            let task = self
                .close_in(&mut process, task_id, actor, mode, &mut effects)
                .await?;
            let jobs = self.commit(&mut process, &mut effects).await?;

            let report = CloseReport {
                task,
                opened: effects.opened,
                closed: effects.closed,
                dispatched: jobs.iter().map(|j| j.task_id.clone()).collect(),
                progress: process.progress,
            };
            (report, jobs)
        };

        info!(
            task_id = %task_id,
            process_id = %process_id,
            opened = report.opened.len(),
            done = report.progress.done,
            "Task closed"
        );
        self.dispatch(jobs).await;
        Ok(report)
    }

    /// Close `task_id` inside an already locked process and run the cascade.
    async fn close_in(
        &self,
        process: &mut Process,
        task_id: &TaskId,
        actor: Option<&Actor>,
        mode: CloseMode,
        effects: &mut Effects,
    ) -> EngineResult<Task> {
        let task = process.require_task(task_id)?.clone();
        if !task.can_close() {
            warn!(task_id = %task_id, status = %task.status, "Close rejected");
            return Err(EngineError::Conflict {
                task: task_id.clone(),
                reason: format!("task is {} and cannot be closed", task.status),
            });
        }

        if mode == CloseMode::Automatic && task.processing_user.as_ref() != Some(&self.inner.system) {
            warn!(task_id = %task_id, status = %task.status, "Automatic close rejected, task changed hands");
            return Err(EngineError::Conflict {
                task: task_id.clone(),
                reason: "task is no longer held by its script".into(),
            });
        }

        if mode.validates() && task.requires_validation_on_close {
            let failed =
                run_close_checks(self.inner.checks.as_ref(), &self.inner.config, process, &task)
                    .await;
            if !failed.is_empty() {
                warn!(task_id = %task_id, ?failed, "Close blocked by validation");
                return Err(EngineError::Validation {
                    task: task_id.clone(),
                    failed,
                });
            }
        }

        let task = process.require_task_mut(task_id)?;
        task.complete(actor, mode.edit_type())?;
        effects.task_closed(task);
        let task = task.clone();
        self.inner.store.save_task(&task).await?;

        let opened = cascade::resolve(process, task.ordering);
        self.settle(process, opened, effects).await?;
        Ok(task)
    }

    /// INWORK -> OPEN when the current user hands a task back.
    pub async fn give_back(&self, task: &TaskId, actor: &Actor) -> EngineResult<Task> {
        self.give_back_as(task, actor, EditType::Manual).await
    }

    pub(crate) async fn give_back_as(
        &self,
        task_id: &TaskId,
        actor: &Actor,
        edit_type: EditType,
    ) -> EngineResult<Task> {
        let process_id = self.process_of(task_id).await?;
        let _guard = self.lock(&process_id).await;
        let mut process = self.inner.store.load_process(&process_id).await?;

        let task = process.require_task_mut(task_id)?;
        task.give_back(edit_type)?;
        let task = task.clone();

        let mut effects = Effects::default();
        effects.events.push(EngineEvent::TaskReturned {
            process_id: process_id.clone(),
            task_id: task_id.clone(),
        });
        self.commit(&mut process, &mut effects).await?;

        info!(task_id = %task_id, actor = %actor, "Task given back");
        Ok(task)
    }

    /// Put a task back to OPEN from any status, optionally clearing its
    /// processing begin.
    pub async fn reopen(
        &self,
        task_id: &TaskId,
        actor: &Actor,
        clear_begin: bool,
    ) -> EngineResult<Task> {
        let process_id = self.process_of(task_id).await?;
        let _guard = self.lock(&process_id).await;
        let mut process = self.inner.store.load_process(&process_id).await?;

        let task = process.require_task_mut(task_id)?;
        task.reopen(actor, clear_begin);
        let task = task.clone();

        let mut effects = Effects::default();
        effects.task_opened(&task);
        effects.events.push(EngineEvent::TaskReturned {
            process_id: process_id.clone(),
            task_id: task_id.clone(),
        });
        self.commit(&mut process, &mut effects).await?;

        info!(task_id = %task_id, actor = %actor, clear_begin, "Task reopened");
        Ok(task)
    }

    /// Move a task one status forward as an administrator.
    ///
    /// The INWORK -> DONE step is a full close with cascade, without
    /// content checks.
    pub async fn set_status_up(&self, task_id: &TaskId, actor: &Actor) -> EngineResult<Task> {
        let process_id = self.process_of(task_id).await?;
        let (task, jobs) = {
            let _guard = self.lock(&process_id).await;
            let mut process = self.inner.store.load_process(&process_id).await?;
            let mut effects = Effects::default();
            let task = self
                .step_up_in(&mut process, task_id, actor, &mut effects)
                .await?;
            let jobs = self.commit(&mut process, &mut effects).await?;
            (task, jobs)
        };

        info!(task_id = %task_id, actor = %actor, status = %task.status, "Status stepped up");
        self.dispatch(jobs).await;
        Ok(task)
    }

    async fn step_up_in(
        &self,
        process: &mut Process,
        task_id: &TaskId,
        actor: &Actor,
        effects: &mut Effects,
    ) -> EngineResult<Task> {
        let status = process.require_task(task_id)?.status;
        match status {
            TaskStatus::Locked => {
                process
                    .require_task_mut(task_id)?
                    .force_status(TaskStatus::Open, actor);
                self.settle(process, vec![task_id.clone()], effects).await?;
            }
            TaskStatus::Open => {
                let task = process.require_task_mut(task_id)?;
                task.force_status(TaskStatus::Inwork, actor);
                effects.events.push(EngineEvent::TaskTakenOver {
                    process_id: task.process_id.clone(),
                    task_id: task_id.clone(),
                    actor: actor.clone(),
                });
            }
            TaskStatus::Inwork => {
                self.close_in(process, task_id, Some(actor), CloseMode::Admin, effects)
                    .await?;
            }
            TaskStatus::Done => {
                return Err(EngineError::Conflict {
                    task: task_id.clone(),
                    reason: "task is already DONE".into(),
                })
            }
        }
        Ok(process.require_task(task_id)?.clone())
    }

    /// Move a task one status back as an administrator.
    ///
    /// A task dropping to LOCKED also steps the previous ordering group
    /// back from DONE to INWORK, so the frontier moves back with it.
    pub async fn set_status_down(&self, task_id: &TaskId, actor: &Actor) -> EngineResult<Task> {
        let process_id = self.process_of(task_id).await?;
        let _guard = self.lock(&process_id).await;
        let mut process = self.inner.store.load_process(&process_id).await?;
        let mut effects = Effects::default();

        let task = step_down_in(&mut process, task_id, actor, &mut effects)?;
        if task.status == TaskStatus::Locked {
            if let Some(previous) = process.previous_ordering(task.ordering) {
                let done: Vec<TaskId> = process
                    .tasks_at(previous)
                    .filter(|t| t.status == TaskStatus::Done)
                    .map(|t| t.id.clone())
                    .collect();
                for id in done {
                    step_down_in(&mut process, &id, actor, &mut effects)?;
                }
            }
        }
        self.commit(&mut process, &mut effects).await?;

        info!(task_id = %task_id, actor = %actor, status = %task.status, "Status stepped down");
        Ok(task)
    }

    /// Step every current task of a process up; with no current task, open
    /// the lowest unfinished group.
    pub async fn advance_process(&self, process_id: &ProcessId, actor: &Actor) -> EngineResult<Process> {
        let (process, jobs) = {
            let _guard = self.lock(process_id).await;
            let mut process = self.inner.store.load_process(process_id).await?;
            let mut effects = Effects::default();

            let current: Vec<TaskId> = process.current_tasks().map(|t| t.id.clone()).collect();
            if current.is_empty() {
                if let Some(frontier) = process.frontier() {
                    let opened = cascade::open_group(&mut process, frontier);
                    self.settle(&mut process, opened, &mut effects).await?;
                }
            } else {
                for id in current {
                    // An earlier step may already have moved it
                    if process.require_task(&id)?.status.is_current() {
                        self.step_up_in(&mut process, &id, actor, &mut effects)
                            .await?;
                    }
                }
            }

            let jobs = self.commit(&mut process, &mut effects).await?;
            (process, jobs)
        };

        info!(process_id = %process_id, actor = %actor, done = process.progress.done, "Process advanced");
        self.dispatch(jobs).await;
        Ok(process)
    }

    /// Step every current task of a process down; with no current task,
    /// step the last closed group back to INWORK.
    pub async fn rewind_process(&self, process_id: &ProcessId, actor: &Actor) -> EngineResult<Process> {
        let _guard = self.lock(process_id).await;
        let mut process = self.inner.store.load_process(process_id).await?;
        let mut effects = Effects::default();

        let mut targets: Vec<TaskId> = process.current_tasks().map(|t| t.id.clone()).collect();
        if targets.is_empty() {
            if let Some(last) = process.last_done_ordering() {
                targets = process
                    .tasks_at(last)
                    .filter(|t| t.status == TaskStatus::Done)
                    .map(|t| t.id.clone())
                    .collect();
            }
        }
        for id in targets {
            step_down_in(&mut process, &id, actor, &mut effects)?;
        }
        self.commit(&mut process, &mut effects).await?;

        info!(process_id = %process_id, actor = %actor, "Process rewound");
        Ok(process)
    }

    /// [`Engine::advance_process`] for several processes, each with its own
    /// outcome.
    pub async fn advance_processes(
        &self,
        processes: &[ProcessId],
        actor: &Actor,
    ) -> Vec<(ProcessId, EngineResult<Process>)> {
        let results = join_all(processes.iter().map(|id| self.advance_process(id, actor))).await;
        processes.iter().cloned().zip(results).collect()
    }

    /// [`Engine::rewind_process`] for several processes, each with its own
    /// outcome.
    pub async fn rewind_processes(
        &self,
        processes: &[ProcessId],
        actor: &Actor,
    ) -> Vec<(ProcessId, EngineResult<Process>)> {
        let results = join_all(processes.iter().map(|id| self.rewind_process(id, actor))).await;
        processes.iter().cloned().zip(results).collect()
    }
}

fn step_down_in(
    process: &mut Process,
    task_id: &TaskId,
    actor: &Actor,
    effects: &mut Effects,
) -> EngineResult<Task> {
    let task = process.require_task_mut(task_id)?;
    let Some(lower) = task.status.down() else {
        return Err(EngineError::Conflict {
            task: task_id.clone(),
            reason: "task is already LOCKED".into(),
        });
    };
    if task.status == TaskStatus::Done {
        task.processing_end_at = None;
    }
    task.force_status(lower, actor);
    if lower == TaskStatus::Open {
        effects.events.push(EngineEvent::TaskReturned {
            process_id: task.process_id.clone(),
            task_id: task_id.clone(),
        });
    }
    Ok(task.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::store::WorkflowStore;
    use stepflow_core::{HistoryEventType, ScriptSpec};

    async fn started(h: &Harness, d: Task) {
        h.engine.start_process(abcd("p", "", d)).await.unwrap();
    }

    async fn work_and_close(h: &Harness, id: &str) -> CloseReport {
        let id = TaskId::new(id);
        h.engine.take_over(&id, &actor()).await.unwrap();
        h.engine.close(&id, &actor()).await.unwrap()
    }

    /// No task above a non-DONE group may be anything but LOCKED.
    fn assert_frontier_invariant(process: &Process) {
        for task in process.tasks() {
            if task.status == TaskStatus::Done {
                continue;
            }
            for later in process.tasks().iter().filter(|t| t.ordering > task.ordering) {
                assert_eq!(
                    later.status,
                    TaskStatus::Locked,
                    "{} is {} while {} is {}",
                    later.id,
                    later.status,
                    task.id,
                    task.status
                );
            }
        }
    }

    #[tokio::test]
    async fn test_parallel_group_scenario() {
        let h = harness();
        started(&h, plain_d()).await;

        let report = work_and_close(&h, "a").await;
        assert_eq!(report.opened, vec![TaskId::new("b"), TaskId::new("c")]);
        assert_eq!(status(&h.store, "b").await, TaskStatus::Open);
        assert_eq!(status(&h.store, "c").await, TaskStatus::Open);
        assert_eq!(status(&h.store, "d").await, TaskStatus::Locked);

        let report = work_and_close(&h, "b").await;
        assert!(report.opened.is_empty());
        assert_eq!(status(&h.store, "d").await, TaskStatus::Locked);

        let report = work_and_close(&h, "c").await;
        assert_eq!(report.opened, vec![TaskId::new("d")]);
        assert_eq!(status(&h.store, "d").await, TaskStatus::Open);

        let process = h.engine.load_process(&ProcessId::new("p")).await.unwrap();
        assert_frontier_invariant(&process);
        assert_eq!(process.progress.done, 75);
    }

    #[tokio::test]
    async fn test_automatic_task_finishes_unattended() {
        let h = harness();
        started(&h, plain_d().automatic(ScriptSpec::new("export", "true"))).await;

        work_and_close(&h, "a").await;
        work_and_close(&h, "b").await;
        let report = work_and_close(&h, "c").await;
        assert_eq!(report.dispatched, vec![TaskId::new("d")]);

        settle(&h.engine).await;
        let d = task(&h.store, "d").await;
        assert_eq!(d.status, TaskStatus::Done);
        assert_eq!(d.edit_type, EditType::Automatic);
        assert!(d.processing_begin_at.is_some());
        assert!(d.processing_user.is_none());

        let process = h.engine.load_process(&ProcessId::new("p")).await.unwrap();
        assert!(process.progress.is_complete());
        assert_eq!(process.progress.sort_key(), "100000000");
    }

    #[tokio::test]
    async fn test_failing_script_leaves_task_open() {
        let h = harness_with(
            ScriptedRunner::default().exiting("export", 2),
            FailingChecks::default(),
        );
        let mut events = h.engine.subscribe();
        started(&h, plain_d().automatic(ScriptSpec::new("export", "false"))).await;

        work_and_close(&h, "a").await;
        work_and_close(&h, "b").await;
        work_and_close(&h, "c").await;
        settle(&h.engine).await;

        assert_eq!(status(&h.store, "d").await, TaskStatus::Open);
        assert_eq!(h.runner.runs(), vec![TaskId::new("d")]);

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ScriptFailed { task_id, .. } = event {
                assert_eq!(task_id, TaskId::new("d"));
                failed = true;
            }
        }
        assert!(failed);

        // Available for manual takeover
        h.engine.take_over(&TaskId::new("d"), &actor()).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_requires_inwork() {
        let h = harness();
        started(&h, plain_d()).await;
        let before = h.engine.load_process(&ProcessId::new("p")).await.unwrap();

        for id in ["a", "b", "d"] {
            let err = h.engine.close(&TaskId::new(id), &actor()).await.unwrap_err();
            assert!(matches!(err, EngineError::Conflict { .. }), "{id}: {err}");
        }
        let after = h.engine.load_process(&ProcessId::new("p")).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_take_over_conflict() {
        let h = harness();
        started(&h, plain_d()).await;
        let a = TaskId::new("a");

        h.engine.take_over(&a, &Actor::new("maria")).await.unwrap();
        let err = h.engine.take_over(&a, &Actor::new("jonas")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(task(&h.store, "a").await.processing_user, Some(Actor::new("maria")));
    }

    #[tokio::test]
    async fn test_concurrent_take_over_has_one_winner() {
        let h = harness();
        started(&h, plain_d()).await;
        let a = TaskId::new("a");

        let attempts = (0..8).map(|i| {
            let engine = h.engine.clone();
            let a = a.clone();
            tokio::spawn(async move { engine.take_over(&a, &Actor::new(format!("user{i}"))).await })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_task_unchanged() {
        let h = harness_with(
            ScriptedRunner::default(),
            FailingChecks {
                tasks: vec![TaskId::new("a")],
            },
        );
        let pid = ProcessId::new("p");
        let process = Process::with_id(
            pid.clone(),
            "Book",
            vec![
                Task::new(pid.clone(), "A", 1).with_id("a").validated_on_close(),
                Task::new(pid.clone(), "B", 2).with_id("b"),
            ],
        )
        .unwrap();
        h.engine.start_process(process).await.unwrap();
        h.engine.take_over(&TaskId::new("a"), &actor()).await.unwrap();
        let before = task(&h.store, "a").await;

        let err = h.engine.close(&TaskId::new("a"), &actor()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert_eq!(task(&h.store, "a").await, before);
        assert_eq!(status(&h.store, "b").await, TaskStatus::Locked);

        // Admin override skips the checks
        h.engine.set_status_up(&TaskId::new("a"), &actor()).await.unwrap();
        assert_eq!(status(&h.store, "a").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "b").await, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_close_records_history() {
        let h = harness();
        started(&h, plain_d()).await;
        work_and_close(&h, "a").await;

        let types: Vec<_> = h
            .store
            .history_of(&ProcessId::new("p"))
            .await
            .into_iter()
            .map(|e| (e.title, e.event_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("A".to_string(), HistoryEventType::TaskOpen),
                ("A".to_string(), HistoryEventType::TaskDone),
                ("B".to_string(), HistoryEventType::TaskOpen),
                ("C".to_string(), HistoryEventType::TaskOpen),
            ]
        );
        let a = task(&h.store, "a").await;
        assert!(a.processing_end_at.is_some());
    }

    #[tokio::test]
    async fn test_give_back_and_reopen() {
        let h = harness();
        started(&h, plain_d()).await;
        let a = TaskId::new("a");

        h.engine.take_over(&a, &actor()).await.unwrap();
        let begin = task(&h.store, "a").await.processing_begin_at;
        let given = h.engine.give_back(&a, &actor()).await.unwrap();
        assert_eq!(given.status, TaskStatus::Open);
        assert_eq!(given.processing_begin_at, begin);
        assert!(given.processing_user.is_none());

        assert!(matches!(
            h.engine.give_back(&a, &actor()).await,
            Err(EngineError::Conflict { .. })
        ));

        h.engine.take_over(&a, &actor()).await.unwrap();
        let reopened = h.engine.reopen(&a, &actor(), true).await.unwrap();
        assert_eq!(reopened.status, TaskStatus::Open);
        assert!(reopened.processing_begin_at.is_none());
    }

    #[tokio::test]
    async fn test_status_stepping() {
        let h = harness();
        started(&h, plain_d()).await;
        let b = TaskId::new("b");

        // LOCKED -> OPEN -> INWORK -> DONE
        assert_eq!(h.engine.set_status_up(&b, &actor()).await.unwrap().status, TaskStatus::Open);
        assert_eq!(h.engine.set_status_up(&b, &actor()).await.unwrap().status, TaskStatus::Inwork);
        let done = h.engine.set_status_up(&b, &actor()).await.unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.edit_type, EditType::Admin);
        assert!(matches!(
            h.engine.set_status_up(&b, &actor()).await,
            Err(EngineError::Conflict { .. })
        ));

        assert_eq!(h.engine.set_status_down(&b, &actor()).await.unwrap().status, TaskStatus::Inwork);
        assert_eq!(h.engine.set_status_down(&b, &actor()).await.unwrap().status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_status_down_to_locked_steps_previous_group_back() {
        let h = harness();
        started(&h, plain_d()).await;
        work_and_close(&h, "a").await;

        let b = h.engine.set_status_down(&TaskId::new("b"), &actor()).await.unwrap();
        assert_eq!(b.status, TaskStatus::Locked);
        let a = task(&h.store, "a").await;
        assert_eq!(a.status, TaskStatus::Inwork);
        assert!(a.processing_end_at.is_none());
    }

    #[tokio::test]
    async fn test_advance_and_rewind_process() {
        let h = harness();
        started(&h, plain_d()).await;
        let pid = ProcessId::new("p");

        // A: OPEN -> INWORK -> DONE (opens B and C)
        h.engine.advance_process(&pid, &actor()).await.unwrap();
        assert_eq!(status(&h.store, "a").await, TaskStatus::Inwork);
        let process = h.engine.advance_process(&pid, &actor()).await.unwrap();
        assert_eq!(status(&h.store, "a").await, TaskStatus::Done);
        assert_eq!(process.current_tasks().count(), 2);

        // B and C: OPEN -> LOCKED, then A: DONE -> INWORK
        h.engine.rewind_process(&pid, &actor()).await.unwrap();
        assert_eq!(status(&h.store, "b").await, TaskStatus::Locked);
        assert_eq!(status(&h.store, "c").await, TaskStatus::Locked);
        assert_eq!(status(&h.store, "a").await, TaskStatus::Done);

        let process = h.engine.rewind_process(&pid, &actor()).await.unwrap();
        assert_eq!(status(&h.store, "a").await, TaskStatus::Inwork);
        assert_frontier_invariant(&process);
    }

    #[tokio::test]
    async fn test_advance_processes_reports_each() {
        let h = harness();
        h.engine.start_process(abcd("p1", "p1-", plain_d())).await.unwrap();
        h.engine.start_process(abcd("p2", "p2-", plain_d())).await.unwrap();

        let ids = [ProcessId::new("p1"), ProcessId::new("missing"), ProcessId::new("p2")];
        let results = h.engine.advance_processes(&ids, &actor()).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(EngineError::NotFound(_))));
        assert!(results[2].1.is_ok());
        assert_eq!(status(&h.store, "p2-a").await, TaskStatus::Inwork);

        let results = h.engine.rewind_processes(&ids[..1], &actor()).await;
        assert!(results[0].1.is_ok());
        assert_eq!(status(&h.store, "p1-a").await, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_invariant_holds_over_close_sequence() {
        let h = harness();
        let pid = ProcessId::new("p");
        let process = Process::with_id(
            pid.clone(),
            "Book",
            (0..9)
                .map(|i| Task::new(pid.clone(), format!("T{i}"), i / 3).with_id(format!("t{i}")))
                .collect(),
        )
        .unwrap();
        h.engine.start_process(process).await.unwrap();

        for i in [2, 0, 1, 4, 3, 5, 8, 6, 7] {
            work_and_close(&h, &format!("t{i}")).await;
            let process = h.store.load_process(&pid).await.unwrap();
            assert_frontier_invariant(&process);
        }
        let process = h.store.load_process(&pid).await.unwrap();
        assert!(process.progress.is_complete());
    }
}
