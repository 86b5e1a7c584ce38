//! Problem reports and solutions.
//!
//! A report rewinds a process to an earlier task and freezes everything up
//! to the reporting task. A solution replays the frozen range back to DONE
//! and reopens the task that reported the problem.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use stepflow_core::{
    Actor, EditType, HistoryEvent, HistoryEventType, Process, Property, PropertyOwner,
    PropertyType, Task, TaskId, TaskStatus,
};

use crate::engine::{Effects, Engine};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;

/// Priority given to a task reopened by a problem report.
pub const CORRECTION_PRIORITY: u8 = 10;

/// What a problem report changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemReport {
    pub reporter: TaskId,
    /// The reopened task.
    pub target: TaskId,
    /// Tasks frozen until the problem is solved, reporter included.
    pub locked: Vec<TaskId>,
}

/// What a problem solution changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemSolution {
    pub from: TaskId,
    /// The task that resumes forward progress.
    pub target: TaskId,
    /// Tasks replayed to DONE.
    pub done: Vec<TaskId>,
    /// Tasks reopened, target first.
    pub reopened: Vec<TaskId>,
}

/// Rewind `process` from `reporter` to the nearest earlier task titled
/// `target_title`. The reporter must be OPEN or INWORK. Nothing changes if
/// the target cannot be resolved.
pub fn apply_report(
    process: &mut Process,
    reporter: &TaskId,
    target_title: &str,
    actor: &Actor,
) -> EngineResult<ProblemReport> {
    let reporting = process.require_task(reporter)?;
    if !reporting.status.is_current() {
        return Err(EngineError::Conflict {
            task: reporter.clone(),
            reason: format!("task is {} and cannot report a problem", reporting.status),
        });
    }
    let reporter_ordering = reporting.ordering;
    let target = process
        .nearest_before(target_title, reporter_ordering)
        .map(|t| (t.id.clone(), t.ordering))
        .ok_or_else(|| {
            EngineError::NotFound(format!(
                "no task titled '{target_title}' before ordering {reporter_ordering}"
            ))
        })?;
    let (target_id, target_ordering) = target;

    let mut locked = Vec::new();
    for task in process.tasks_mut() {
        if task.id == target_id {
            task.reopen(actor, true);
            task.processing_end_at = None;
            task.is_correction_flagged = true;
            task.priority = CORRECTION_PRIORITY;
        } else if task.ordering >= target_ordering && task.ordering <= reporter_ordering {
            task.lock_for_correction(actor);
            if &task.id == reporter {
                task.processing_begin_at = None;
            }
            locked.push(task.id.clone());
        }
    }

    Ok(ProblemReport {
        reporter: reporter.clone(),
        target: target_id,
        locked,
    })
}

/// Replay `process` from `from` up to the nearest later task titled
/// `target_title`. Nothing changes if the target cannot be resolved.
pub fn apply_solution(
    process: &mut Process,
    from: &TaskId,
    target_title: &str,
    actor: &Actor,
    at: DateTime<Utc>,
) -> EngineResult<ProblemSolution> {
    let from_task = process.require_task(from)?;
    if !from_task.status.is_current() {
        return Err(EngineError::Conflict {
            task: from.clone(),
            reason: format!("task is {} and has no problem to solve", from_task.status),
        });
    }
    let from_ordering = from_task.ordering;
    let (target_id, target_ordering) = process
        .nearest_after(target_title, from_ordering)
        .map(|t| (t.id.clone(), t.ordering))
        .ok_or_else(|| {
            EngineError::NotFound(format!(
                "no task titled '{target_title}' after ordering {from_ordering}"
            ))
        })?;

    let mut done = Vec::new();
    let mut reopened = vec![target_id.clone()];
    for task in process.tasks_mut() {
        if task.ordering >= from_ordering && task.ordering < target_ordering {
            task.replay_done(actor, at);
            done.push(task.id.clone());
        } else if task.id == target_id {
            reopen_solved(task, actor, at);
        } else if task.ordering == target_ordering && task.is_correction_locked() {
            reopen_solved(task, actor, at);
            reopened.push(task.id.clone());
        }
    }

    Ok(ProblemSolution {
        from: from.clone(),
        target: target_id,
        done,
        reopened,
    })
}

fn reopen_solved(task: &mut Task, actor: &Actor, at: DateTime<Utc>) {
    task.status = TaskStatus::Open;
    task.is_correction_flagged = false;
    task.priority = 0;
    task.touch(Some(actor.clone()), EditType::Manual, at);
}

fn stamped(actor: &Actor, at: DateTime<Utc>, message: &str) -> String {
    format!("[{}, {}] {}", at.format("%Y-%m-%d %H:%M:%S"), actor, message)
}

impl Engine {
    /// Report a problem found at `reporter`, rewinding its process to the
    /// nearest earlier task titled `target_title`.
    pub async fn report_problem(
        &self,
        reporter: &TaskId,
        target_title: &str,
        message: &str,
        actor: &Actor,
    ) -> EngineResult<ProblemReport> {
        let process_id = self.process_of(reporter).await?;
        let (report, jobs) = {
            let _guard = self.lock(&process_id).await;
            let mut process = self.inner.store.load_process(&process_id).await?;

            let report = match apply_report(&mut process, reporter, target_title, actor) {
                Ok(report) => report,
                Err(err) => {
                    warn!(task_id = %reporter, target = target_title, error = %err, "Problem report rejected");
                    return Err(err);
                }
            };

            let now = Utc::now();
            let target = process.require_task(&report.target)?.clone();
            let mut effects = Effects::default();
            effects.history.push(HistoryEvent::new(
                target.ordering,
                &target.title,
                HistoryEventType::TaskError,
                process_id.clone(),
            ));
            effects.events.push(EngineEvent::ProblemReported {
                process_id: process_id.clone(),
                reporter: reporter.clone(),
                target: target.id.clone(),
            });
            self.settle(&mut process, vec![target.id.clone()], &mut effects)
                .await?;
            let jobs = self.commit(&mut process, &mut effects).await?;

            let error = Property::new(
                "Correction required",
                stamped(actor, now, message),
                PropertyType::MessageError,
            );
            self.inner
                .properties
                .put_property(&PropertyOwner::Task(target.id.clone()), error)
                .await?;
            for id in &report.locked {
                let note = Property::new(
                    "Correction pending",
                    stamped(actor, now, &format!("waiting for '{}' to be corrected: {message}", target.title)),
                    PropertyType::MessageImportant,
                );
                self.inner
                    .properties
                    .put_property(&PropertyOwner::Task(id.clone()), note)
                    .await?;
            }
            (report, jobs)
        };

        info!(
            process_id = %process_id,
            reporter = %reporter,
            target = %report.target,
            locked = report.locked.len(),
            actor = %actor,
            "Problem reported"
        );
        self.dispatch(jobs).await;
        Ok(report)
    }

    /// Solve a problem from `from` (usually the task a report reopened),
    /// replaying everything up to the nearest later task titled
    /// `target_title`.
    pub async fn solve_problem(
        &self,
        from: &TaskId,
        target_title: &str,
        message: &str,
        actor: &Actor,
    ) -> EngineResult<ProblemSolution> {
        let process_id = self.process_of(from).await?;
        let (solution, jobs) = {
            let _guard = self.lock(&process_id).await;
            let mut process = self.inner.store.load_process(&process_id).await?;

            let now = Utc::now();
            let solution = match apply_solution(&mut process, from, target_title, actor, now) {
                Ok(solution) => solution,
                Err(err) => {
                    warn!(task_id = %from, target = target_title, error = %err, "Problem solution rejected");
                    return Err(err);
                }
            };

            let target = process.require_task(&solution.target)?.clone();
            let mut effects = Effects::default();
            effects.history.push(HistoryEvent::new(
                target.ordering,
                &target.title,
                HistoryEventType::TaskCorrected,
                process_id.clone(),
            ));
            effects.events.push(EngineEvent::ProblemSolved {
                process_id: process_id.clone(),
                from: from.clone(),
                target: target.id.clone(),
            });
            self.settle(&mut process, solution.reopened.clone(), &mut effects)
                .await?;
            let jobs = self.commit(&mut process, &mut effects).await?;

            for id in solution.done.iter().chain(&solution.reopened) {
                let note = Property::new(
                    "Correction solved",
                    stamped(actor, now, message),
                    PropertyType::MessageImportant,
                );
                self.inner
                    .properties
                    .put_property(&PropertyOwner::Task(id.clone()), note)
                    .await?;
            }
            (solution, jobs)
        };

        info!(
            process_id = %process_id,
            from = %from,
            target = %solution.target,
            replayed = solution.done.len(),
            actor = %actor,
            "Problem solved"
        );
        self.dispatch(jobs).await;
        Ok(solution)
    }

    /// Tasks a problem can be reported against from `task`.
    pub async fn problem_targets(&self, task: &TaskId) -> EngineResult<Vec<Task>> {
        let current = self.load_task(task).await?;
        let process = self.load_process(&current.process_id).await?;
        Ok(process
            .tasks()
            .iter()
            .filter(|t| t.ordering < current.ordering)
            .cloned()
            .collect())
    }

    /// Tasks a problem can be solved towards from `task`.
    pub async fn solution_targets(&self, task: &TaskId) -> EngineResult<Vec<Task>> {
        let current = self.load_task(task).await?;
        let process = self.load_process(&current.process_id).await?;
        Ok(process
            .tasks()
            .iter()
            .filter(|t| t.ordering > current.ordering)
            .cloned()
            .collect())
    }
}
