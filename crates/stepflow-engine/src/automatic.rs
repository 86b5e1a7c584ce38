//! Background execution of automatic tasks.
//!
//! Opening an automatic task only queues a job. The worker runs each job on
//! its own Tokio task, bounded by a semaphore, outside any process lock.
//! While its script runs the task is INWORK under the system actor. A
//! script exiting with code 0 closes the task through the normal close
//! path; any other outcome hands it back to OPEN for manual takeover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, info, warn};

use stepflow_core::{EditType, Process, ProcessId, Task, TaskId};

use crate::engine::{Effects, Engine, EngineInner};
use crate::events::EngineEvent;
use crate::script::ScriptError;
use crate::transition::CloseMode;

/// An automatic task waiting for its script to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomaticJob {
    pub process_id: ProcessId,
    pub task_id: TaskId,
}

/// Counts queued and running jobs so callers can wait for quiescence.
#[derive(Default)]
struct PendingTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl PendingTracker {
    fn begin(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Sending side of the automatic job queue.
pub(crate) struct AutomaticQueue {
    tx: mpsc::Sender<AutomaticJob>,
    tracker: Arc<PendingTracker>,
}

impl AutomaticQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<AutomaticJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            tracker: Arc::new(PendingTracker::default()),
        };
        (queue, rx)
    }

    pub(crate) async fn enqueue(&self, job: AutomaticJob) {
        self.tracker.begin();
        debug!(process_id = %job.process_id, task_id = %job.task_id, "Queueing automatic task");
        if let Err(err) = self.tx.send(job).await {
            error!(task_id = %err.0.task_id, "Automatic worker is gone, task stays open");
            self.tracker.finish();
        }
    }

    pub(crate) async fn wait_idle(&self) {
        self.tracker.wait_idle().await;
    }
}

/// Start the worker draining the job queue. The worker stops once the
/// engine is dropped.
pub(crate) fn spawn_worker(
    engine: Weak<EngineInner>,
    mut jobs: mpsc::Receiver<AutomaticJob>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let Some(inner) = engine.upgrade() else {
                break;
            };
            let permits = permits.clone();
            tokio::spawn(async move {
                let tracker = inner.queue.tracker.clone();
                match permits.acquire_owned().await {
                    Ok(_permit) => Engine { inner }.run_automatic(job).await,
                    Err(_) => warn!(task_id = %job.task_id, "Script permits closed, job dropped"),
                }
                tracker.finish();
            });
        }
        debug!("Automatic worker stopped");
    });
}

impl Engine {
    /// Run the script of an automatic task and close the task on success.
    pub(crate) async fn run_automatic(&self, job: AutomaticJob) {
        let Some((process, task)) = self.claim_automatic(&job).await else {
            return;
        };

        let outcome = self.inner.scripts.run_script(&process, &task).await;
        let failure = match outcome {
            Ok(0) => None,
            Ok(code) => Some(ScriptError::NonZeroExit(code)),
            Err(err) => Some(err),
        };

        if let Some(err) = failure {
            error!(
                process_id = %job.process_id,
                task_id = %job.task_id,
                error = %err,
                "Automatic task script failed, task handed back"
            );
            self.release_automatic(&job).await;
            self.notify(EngineEvent::ScriptFailed {
                process_id: job.process_id,
                task_id: job.task_id,
                reason: err.to_string(),
            });
            return;
        }

        match self
            .close_with(&job.task_id, None, CloseMode::Automatic)
            .await
        {
            Ok(report) => info!(
                task_id = %job.task_id,
                opened = report.opened.len(),
                "Automatic task closed"
            ),
            Err(err) => warn!(task_id = %job.task_id, error = %err, "Automatic task could not be closed"),
        }
    }

    /// Take the task over as the system actor while its script runs, so no
    /// user can take it over in the meantime.
    async fn claim_automatic(&self, job: &AutomaticJob) -> Option<(Process, Task)> {
        let _guard = self.lock(&job.process_id).await;
        let mut process = match self.inner.store.load_process(&job.process_id).await {
            Ok(process) => process,
            Err(err) => {
                error!(process_id = %job.process_id, error = %err, "Cannot load process for automatic task");
                return None;
            }
        };

        let system = &self.inner.system;
        let task = process.task_mut(&job.task_id)?;
        if !task.is_automatic || task.take_over(system, EditType::Automatic).is_err() {
            debug!(task_id = %job.task_id, status = %task.status, "Automatic task no longer waiting");
            return None;
        }
        let task = task.clone();

        let mut effects = Effects::default();
        effects.events.push(EngineEvent::TaskTakenOver {
            process_id: job.process_id.clone(),
            task_id: job.task_id.clone(),
            actor: system.clone(),
        });
        let saved = match self.inner.store.save_task(&task).await {
            Ok(()) => self.commit(&mut process, &mut effects).await.map(|_| ()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = saved {
            error!(task_id = %task.id, error = %err, "Cannot mark automatic task as started");
            return None;
        }
        Some((process, task))
    }

    /// Hand a task whose script failed back to OPEN, unless someone else
    /// changed it while the script ran.
    async fn release_automatic(&self, job: &AutomaticJob) {
        let _guard = self.lock(&job.process_id).await;
        let mut process = match self.inner.store.load_process(&job.process_id).await {
            Ok(process) => process,
            Err(err) => {
                error!(process_id = %job.process_id, error = %err, "Cannot load process for automatic task");
                return;
            }
        };

        let Some(task) = process.task_mut(&job.task_id) else {
            return;
        };
        if task.processing_user.as_ref() != Some(&self.inner.system)
            || task.give_back(EditType::Automatic).is_err()
        {
            debug!(task_id = %job.task_id, status = %task.status, "Automatic task changed while its script ran");
            return;
        }
        let task = task.clone();

        let mut effects = Effects::default();
        effects.events.push(EngineEvent::TaskReturned {
            process_id: job.process_id.clone(),
            task_id: job.task_id.clone(),
        });
        let saved = match self.inner.store.save_task(&task).await {
            Ok(()) => self.commit(&mut process, &mut effects).await.map(|_| ()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = saved {
            error!(task_id = %task.id, error = %err, "Cannot hand automatic task back");
        }
    }
}
