//! The engine handle and its shared plumbing.
//!
//! Every operation follows the same shape: take the process lock, load the
//! process, change tasks in memory while collecting [`Effects`], commit
//! (progress, persistence, history, events), release the lock and finally
//! hand automatic tasks to the background worker.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::{error, info, warn};

use stepflow_core::{
    Actor, EditType, HistoryEvent, HistoryEventType, Process, ProcessId, Task, TaskId, TaskStatus,
};

use crate::automatic::{self, AutomaticJob, AutomaticQueue};
use crate::cascade;
use crate::checks::{run_close_checks, AcceptAll, ContentChecks};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::events::EngineEvent;
use crate::locks::ProcessLocks;
use crate::script::{CommandScriptRunner, ScriptRunner};
use crate::store::{HistorySink, MemoryStore, PropertyStore, WorkflowStore};

/// External collaborators the engine works through.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn WorkflowStore>,
    pub history: Arc<dyn HistorySink>,
    pub properties: Arc<dyn PropertyStore>,
    pub checks: Arc<dyn ContentChecks>,
    pub scripts: Arc<dyn ScriptRunner>,
}

impl Collaborators {
    /// Use one [`MemoryStore`] for persistence, history and properties,
    /// with checks that always pass.
    pub fn in_memory(store: Arc<MemoryStore>, scripts: Arc<dyn ScriptRunner>) -> Self {
        Self {
            store: store.clone(),
            history: store.clone(),
            properties: store,
            checks: Arc::new(AcceptAll),
            scripts,
        }
    }

    /// In-memory collaborators running scripts through the shell.
    pub fn in_memory_with_shell(store: Arc<MemoryStore>, config: &EngineConfig) -> Self {
        Self::in_memory(store, Arc::new(CommandScriptRunner::new(config.script.clone())))
    }

    /// Replace the content checks.
    pub fn with_checks(mut self, checks: Arc<dyn ContentChecks>) -> Self {
        self.checks = checks;
        self
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) system: Actor,
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) history: Arc<dyn HistorySink>,
    pub(crate) properties: Arc<dyn PropertyStore>,
    pub(crate) checks: Arc<dyn ContentChecks>,
    pub(crate) scripts: Arc<dyn ScriptRunner>,
    pub(crate) locks: ProcessLocks,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) queue: AutomaticQueue,
}

/// Task progression engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

/// Side-effects collected while a process is changed under its lock.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) history: Vec<HistoryEvent>,
    pub(crate) events: Vec<EngineEvent>,
    pub(crate) opened: Vec<TaskId>,
    pub(crate) closed: Vec<TaskId>,
    pub(crate) dispatch: Vec<TaskId>,
}

impl Effects {
    pub(crate) fn task_opened(&mut self, task: &Task) {
        self.history
            .push(HistoryEvent::for_task(task, HistoryEventType::TaskOpen));
        self.events.push(EngineEvent::TaskOpened {
            process_id: task.process_id.clone(),
            task_id: task.id.clone(),
        });
        self.opened.push(task.id.clone());
    }

    pub(crate) fn task_closed(&mut self, task: &Task) {
        self.history
            .push(HistoryEvent::for_task(task, HistoryEventType::TaskDone));
        self.events.push(EngineEvent::TaskClosed {
            process_id: task.process_id.clone(),
            task_id: task.id.clone(),
        });
        self.closed.push(task.id.clone());
    }
}

impl Engine {
    /// Create an engine and start its automatic task worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let (queue, jobs) = AutomaticQueue::new(config.queue_capacity);
        let max_concurrent = config.script.max_concurrent;

        let inner = Arc::new(EngineInner {
            system: Actor::new(config.system_actor.clone()),
            config,
            store: collaborators.store,
            history: collaborators.history,
            properties: collaborators.properties,
            checks: collaborators.checks,
            scripts: collaborators.scripts,
            locks: ProcessLocks::new(),
            events,
            queue,
        });
        automatic::spawn_worker(Arc::downgrade(&inner), jobs, max_concurrent);

        info!(
            max_concurrent,
            metadata_validation = inner.config.metadata_validation,
            "Engine started"
        );
        Ok(Self { inner })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves once no automatic task is queued or running.
    pub async fn wait_idle(&self) {
        self.inner.queue.wait_idle().await;
    }

    /// Load a process.
    pub async fn load_process(&self, id: &ProcessId) -> EngineResult<Process> {
        Ok(self.inner.store.load_process(id).await?)
    }

    /// Load a task.
    pub async fn load_task(&self, id: &TaskId) -> EngineResult<Task> {
        Ok(self.inner.store.load_task(id).await?)
    }

    /// Persist a freshly created process and apply the opening side-effects
    /// to its first group.
    pub async fn start_process(&self, process: Process) -> EngineResult<Process> {
        let (process, jobs) = {
            let _guard = self.lock(&process.id).await;
            match self.inner.store.load_process(&process.id).await {
                Ok(_) => {
                    return Err(EngineError::InvalidInput(format!(
                        "process {} already exists",
                        process.id
                    )))
                }
                Err(StoreError::ProcessNotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }

            let mut process = process;
            self.inner.store.save_process(&process).await?;

            let mut effects = Effects::default();
            let opened: Vec<TaskId> = process
                .tasks()
                .iter()
                .filter(|t| t.status == TaskStatus::Open)
                .map(|t| t.id.clone())
                .collect();
            self.settle(&mut process, opened, &mut effects).await?;
            let jobs = self.commit(&mut process, &mut effects).await?;
            (process, jobs)
        };

        info!(process_id = %process.id, tasks = process.tasks().len(), "Process started");
        self.dispatch(jobs).await;
        Ok(process)
    }

    pub(crate) async fn lock(&self, process: &ProcessId) -> OwnedMutexGuard<()> {
        self.inner.locks.acquire(process).await
    }

    /// Owning process of a task.
    pub(crate) async fn process_of(&self, task: &TaskId) -> EngineResult<ProcessId> {
        Ok(self.inner.store.load_task(task).await?.process_id)
    }

    /// Apply the opening side-effects to tasks that just became OPEN and
    /// keep cascading while finish-immediately tasks close.
    pub(crate) async fn settle(
        &self,
        process: &mut Process,
        opened: Vec<TaskId>,
        effects: &mut Effects,
    ) -> EngineResult<()> {
        let mut pending = VecDeque::new();
        self.handle_opened(process, opened, effects, &mut pending)
            .await?;

        while let Some(ordering) = pending.pop_front() {
            let opened = cascade::resolve(process, ordering);
            self.handle_opened(process, opened, effects, &mut pending)
                .await?;
        }
        Ok(())
    }

    async fn handle_opened(
        &self,
        process: &mut Process,
        opened: Vec<TaskId>,
        effects: &mut Effects,
        pending: &mut VecDeque<i32>,
    ) -> EngineResult<()> {
        for id in opened {
            let task = process.require_task(&id)?.clone();
            effects.task_opened(&task);

            if task.is_automatic {
                effects.dispatch.push(id);
            } else if task.is_finish_immediately && self.finish(process, &id, effects).await? {
                pending.push_back(task.ordering);
            }
        }
        Ok(())
    }

    /// Close a finish-immediately task. Content checks still apply; a task
    /// that fails them stays OPEN.
    async fn finish(
        &self,
        process: &mut Process,
        id: &TaskId,
        effects: &mut Effects,
    ) -> EngineResult<bool> {
        let task = process.require_task(id)?.clone();
        if task.requires_validation_on_close {
            let failed =
                run_close_checks(self.inner.checks.as_ref(), &self.inner.config, process, &task)
                    .await;
            if !failed.is_empty() {
                warn!(task_id = %id, ?failed, "Finish-immediately task failed validation, left open");
                return Ok(false);
            }
        }

        let task = process.require_task_mut(id)?;
        task.complete(None, EditType::Automatic)?;
        effects.task_closed(task);
        info!(task_id = %id, "Finish-immediately task closed");
        Ok(true)
    }

    /// Refresh derived fields, persist the process, record history and
    /// publish events. Returns the automatic jobs to dispatch once the lock
    /// is released.
    pub(crate) async fn commit(
        &self,
        process: &mut Process,
        effects: &mut Effects,
    ) -> EngineResult<Vec<AutomaticJob>> {
        if let Some(count) = self.inner.checks.count_images(process).await {
            process.image_count = Some(count);
        }
        process.refresh_progress();

        if let Err(err) = self.inner.store.save_process(process).await {
            error!(process_id = %process.id, error = %err, "Failed to save process");
            return Err(err.into());
        }

        for event in effects.history.drain(..) {
            if let Err(err) = self.inner.history.append_event(event).await {
                error!(process_id = %process.id, error = %err, "Failed to append history event");
                return Err(err.into());
            }
        }

        for event in effects.events.drain(..) {
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }

        Ok(effects
            .dispatch
            .drain(..)
            .map(|task_id| AutomaticJob {
                process_id: process.id.clone(),
                task_id,
            })
            .collect())
    }

    pub(crate) async fn dispatch(&self, jobs: Vec<AutomaticJob>) {
        for job in jobs {
            self.inner.queue.enqueue(job).await;
        }
    }

    pub(crate) fn notify(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use stepflow_core::ScriptSpec;

    #[tokio::test]
    async fn test_start_process_persists_and_opens_first_group() {
        let h = harness();
        let process = h
            .engine
            .start_process(abcd("p", "", plain_d()))
            .await
            .unwrap();
        assert_eq!(process.progress.open, 25);
        assert_eq!(status(&h.store, "a").await, TaskStatus::Open);

        let history = h.store.history_of(&ProcessId::new("p")).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, HistoryEventType::TaskOpen);

        let again = h.engine.start_process(abcd("p", "", plain_d())).await;
        assert!(matches!(again, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_start_process_runs_finish_immediately_chain() {
        let h = harness();
        let pid = ProcessId::new("p");
        let process = Process::with_id(
            pid.clone(),
            "Book",
            vec![
                Task::new(pid.clone(), "Created", 1).with_id("m").finish_immediately(),
                Task::new(pid.clone(), "Registered", 2).with_id("r").finish_immediately(),
                Task::new(pid, "Scan", 3).with_id("s"),
            ],
        )
        .unwrap();
        h.engine.start_process(process).await.unwrap();

        assert_eq!(status(&h.store, "m").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "r").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "s").await, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_start_process_dispatches_automatic_first_task() {
        let h = harness();
        let pid = ProcessId::new("p");
        let process = Process::with_id(
            pid.clone(),
            "Book",
            vec![
                Task::new(pid.clone(), "Import", 1)
                    .with_id("i")
                    .automatic(ScriptSpec::new("import", "true")),
                Task::new(pid.clone(), "Scan", 2).with_id("s"),
            ],
        )
        .unwrap();
        h.engine.start_process(process).await.unwrap();
        settle(&h.engine).await;

        assert_eq!(status(&h.store, "i").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "s").await, TaskStatus::Open);
        assert_eq!(h.runner.runs(), vec![TaskId::new("i")]);
        let process = h.engine.load_process(&pid).await.unwrap();
        assert_eq!(process.image_count, Some(12));
    }

    #[tokio::test]
    async fn test_failed_process_save_keeps_earlier_task_write() {
        let (h, flaky) = flaky_harness();
        h.engine
            .start_process(abcd("p", "", plain_d()))
            .await
            .unwrap();
        let a = TaskId::new("a");
        h.engine.take_over(&a, &actor()).await.unwrap();

        flaky.fail_process_saves.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = h.engine.close(&a, &actor()).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(StoreError::Backend(_))), "{err}");
        assert!(!err.is_recoverable());

        // The task write went through before the process save failed
        assert_eq!(status(&h.store, "a").await, TaskStatus::Done);
        assert_eq!(status(&h.store, "b").await, TaskStatus::Locked);
        let history = h.store.history_of(&ProcessId::new("p")).await;
        assert!(history.iter().all(|e| e.event_type != HistoryEventType::TaskDone));
    }

    #[tokio::test]
    async fn test_failed_history_append_surfaces_as_storage_error() {
        let (h, flaky) = flaky_harness();
        h.engine
            .start_process(abcd("p", "", plain_d()))
            .await
            .unwrap();
        for id in ["a", "b", "c"] {
            let id = TaskId::new(id);
            h.engine.take_over(&id, &actor()).await.unwrap();
            h.engine.close(&id, &actor()).await.unwrap();
        }

        flaky.fail_history.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = h
            .engine
            .report_problem(&TaskId::new("d"), "B", "pages missing", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)), "{err}");

        // The saved process is not rolled back
        let b = task(&h.store, "b").await;
        assert_eq!(b.status, TaskStatus::Open);
        assert!(b.is_correction_flagged);
        let history = h.store.history_of(&ProcessId::new("p")).await;
        assert!(history.iter().all(|e| e.event_type != HistoryEventType::TaskError));
    }
}
